use std::path::Path;

use async_trait::async_trait;

use crate::errors::FleetResult;

/// 凭证加解密接口
///
/// 节点密码以密文形式落库，发起远程请求前解密。
pub trait CredentialVault: Send + Sync {
    fn encrypt(&self, plaintext: &str, secret: &[u8]) -> FleetResult<Vec<u8>>;

    fn decrypt(&self, ciphertext: &[u8], secret: &[u8]) -> FleetResult<String>;
}

/// 部署制品构建接口
///
/// 输入为 `scrapy.cfg` 的绝对路径，输出为 egg 字节。
/// 取消通过丢弃返回的 future 实现，实现方需保证此时释放子进程等资源。
#[async_trait]
pub trait ArtifactBuilder: Send + Sync {
    async fn build(&self, source_path: &Path) -> FleetResult<Vec<u8>>;
}
