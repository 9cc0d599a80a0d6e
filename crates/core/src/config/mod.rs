//! 配置管理
//!
//! 配置分为数据库、API、调度、部署、安全和可观测性六个部分，
//! 由 [`AppConfig::load`] 按“默认值 -> TOML文件 -> 环境变量”的顺序合并。

pub mod models;

pub use models::*;
