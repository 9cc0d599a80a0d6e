use aes_gcm::{
    aead::{Aead, KeyInit, Nonce, OsRng},
    Aes128Gcm, Aes256Gcm,
};
use fleet_core::{traits::CredentialVault, FleetError, FleetResult};

const NONCE_LEN: usize = 12;

/// AES-GCM 凭证库
///
/// 密钥长度为16字节时使用 AES-128，32字节时使用 AES-256。
/// 密文格式为 12 字节随机 nonce 后接加密数据。
#[derive(Debug, Default, Clone, Copy)]
pub struct AesGcmVault;

impl AesGcmVault {
    pub fn new() -> Self {
        Self
    }

    fn seal<C: Aead + KeyInit>(secret: &[u8], plaintext: &[u8]) -> FleetResult<Vec<u8>> {
        let cipher = C::new_from_slice(secret)
            .map_err(|e| FleetError::Credential(format!("无效的加密密钥: {e}")))?;
        let nonce = C::generate_nonce(&mut OsRng);
        let sealed = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| FleetError::Credential(format!("加密失败: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn open<C: Aead + KeyInit>(secret: &[u8], data: &[u8]) -> FleetResult<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(FleetError::Credential("密文长度不足".to_string()));
        }
        let cipher = C::new_from_slice(secret)
            .map_err(|e| FleetError::Credential(format!("无效的加密密钥: {e}")))?;
        let (nonce, sealed) = data.split_at(NONCE_LEN);

        cipher
            .decrypt(Nonce::<C>::from_slice(nonce), sealed)
            .map_err(|_| FleetError::Credential("解密失败，密钥错误或密文已损坏".to_string()))
    }

    fn check_secret(secret: &[u8]) -> FleetResult<()> {
        match secret.len() {
            16 | 32 => Ok(()),
            len => Err(FleetError::Credential(format!(
                "密钥长度必须为16或32字节，当前为{len}字节"
            ))),
        }
    }
}

impl CredentialVault for AesGcmVault {
    fn encrypt(&self, plaintext: &str, secret: &[u8]) -> FleetResult<Vec<u8>> {
        Self::check_secret(secret)?;
        if secret.len() == 16 {
            Self::seal::<Aes128Gcm>(secret, plaintext.as_bytes())
        } else {
            Self::seal::<Aes256Gcm>(secret, plaintext.as_bytes())
        }
    }

    fn decrypt(&self, ciphertext: &[u8], secret: &[u8]) -> FleetResult<String> {
        Self::check_secret(secret)?;
        let plain = if secret.len() == 16 {
            Self::open::<Aes128Gcm>(secret, ciphertext)?
        } else {
            Self::open::<Aes256Gcm>(secret, ciphertext)?
        };

        String::from_utf8(plain)
            .map_err(|e| FleetError::Credential(format!("解密结果不是有效的UTF-8: {e}")))
    }
}
