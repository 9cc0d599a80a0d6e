use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use fleet_core::{traits::ArtifactBuilder, FleetError, FleetResult};
use tokio::process::Command;
use tracing::{info, instrument};

const BUILD_SCRIPT: &str = include_str!("../assets/build_egg.py");

/// 调用本地 Python 解释器构建 egg
///
/// 构建脚本内嵌在二进制中，通过 `-c` 传给解释器，`scrapy.cfg` 路径作为唯一参数，
/// egg 字节从标准输出读取。子进程以 `kill_on_drop` 启动，丢弃 future 即终止构建。
#[derive(Debug, Clone)]
pub struct PythonEggBuilder {
    python_path: PathBuf,
}

impl PythonEggBuilder {
    pub fn new(python_path: impl Into<PathBuf>) -> Self {
        Self {
            python_path: python_path.into(),
        }
    }
}

#[async_trait]
impl ArtifactBuilder for PythonEggBuilder {
    #[instrument(skip(self), fields(python = %self.python_path.display()))]
    async fn build(&self, source_path: &Path) -> FleetResult<Vec<u8>> {
        let output = Command::new(&self.python_path)
            .arg("-c")
            .arg(BUILD_SCRIPT)
            .arg(source_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                FleetError::Build(format!(
                    "无法启动Python解释器 {}: {e}",
                    self.python_path.display()
                ))
            })?;

        if !output.status.success() {
            return Err(FleetError::Build(format!(
                "构建脚本退出状态 {}\nStderr: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        if output.stdout.is_empty() {
            return Err(FleetError::Build("构建脚本没有输出egg内容".to_string()));
        }

        info!("egg构建完成，大小 {} 字节", output.stdout.len());
        Ok(output.stdout)
    }
}
