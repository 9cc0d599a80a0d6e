//! 测试辅助函数

use std::future::Future;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fleet_core::{models::Node, traits::NodeDirectory};
use tokio::time::sleep;

pub struct TestEnv;

impl TestEnv {
    /// 轮询等待条件成立，超时返回 false
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(20)).await;
        }

        false
    }
}

/// 返回一个当前没有进程监听的本地地址
pub fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    format!("http://127.0.0.1:{port}")
}

/// 在节点目录中注册一个无凭证节点
pub async fn register_node(directory: &dyn NodeDirectory, name: &str, url: &str) -> Node {
    directory
        .add_node(name, url, None, None)
        .await
        .expect("register node")
}

/// 在目录下写入一个最小的 scrapy.cfg
pub fn write_scrapy_cfg(dir: &Path) -> PathBuf {
    let path = dir.join("scrapy.cfg");
    std::fs::write(&path, "[settings]\ndefault = demo.settings\n\n[deploy]\nproject = demo\n")
        .expect("write scrapy.cfg");
    path
}
