//! # Fleet Testing Utils
//!
//! 各crate共享的测试工具：
//!
//! - **FakeNode**: 在临时端口上运行的节点协议模拟服务器，可切换错误模式、记录请求
//! - **Artifact Builders**: 固定输出、必定失败、慢速的构建器替身
//! - **Test Data Builders**: 任务草稿构建器
//! - **Helpers**: 不可达地址、节点注册、条件等待
//!
//! ```toml
//! [dev-dependencies]
//! fleet-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod fake_node;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use fake_node::*;
pub use helpers::*;
pub use mocks::*;
