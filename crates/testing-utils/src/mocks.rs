//! 协作方替身实现

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fleet_core::{traits::ArtifactBuilder, FleetError, FleetResult};

/// 总是返回固定字节的构建器，并记录调用
#[derive(Debug, Clone)]
pub struct StaticArtifactBuilder {
    egg: Vec<u8>,
    calls: Arc<AtomicUsize>,
    paths: Arc<Mutex<Vec<PathBuf>>>,
}

impl StaticArtifactBuilder {
    pub fn new(egg: impl Into<Vec<u8>>) -> Self {
        Self {
            egg: egg.into(),
            calls: Arc::new(AtomicUsize::new(0)),
            paths: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactBuilder for StaticArtifactBuilder {
    async fn build(&self, source_path: &Path) -> FleetResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.paths.lock().unwrap().push(source_path.to_path_buf());
        Ok(self.egg.clone())
    }
}

/// 总是失败的构建器
#[derive(Debug, Clone)]
pub struct FailingArtifactBuilder {
    message: String,
}

impl FailingArtifactBuilder {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl ArtifactBuilder for FailingArtifactBuilder {
    async fn build(&self, _source_path: &Path) -> FleetResult<Vec<u8>> {
        Err(FleetError::Build(self.message.clone()))
    }
}

/// 延迟一段时间后返回的构建器，用于超时和取消测试
#[derive(Debug, Clone)]
pub struct SlowArtifactBuilder {
    delay: Duration,
    egg: Vec<u8>,
    finished: Arc<AtomicUsize>,
}

impl SlowArtifactBuilder {
    pub fn new(delay: Duration, egg: impl Into<Vec<u8>>) -> Self {
        Self {
            delay,
            egg: egg.into(),
            finished: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 完整执行完毕（未被取消）的次数
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactBuilder for SlowArtifactBuilder {
    async fn build(&self, _source_path: &Path) -> FleetResult<Vec<u8>> {
        tokio::time::sleep(self.delay).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(self.egg.clone())
    }
}
