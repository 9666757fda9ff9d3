//! 备份加密模块
//!
//! 口令经 PBKDF2-HMAC-SHA256 派生出 AES-256-GCM 密钥，对整个
//! 压缩包加密。文件布局：`RBK1 || salt(16) || nonce(12) || 密文+tag`，
//! 解密时校验魔数并从文件头恢复 salt 和 nonce。

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use std::path::Path;
use tracing::debug;

use crate::{BackupError, Result};

/// 加密文件的魔数前缀
const MAGIC: &[u8; 4] = b"RBK1";

/// 密钥派生迭代次数
const PBKDF2_ITERATIONS: u32 = 100_000;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

fn derive_key(password: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// 加密 `source` 文件，密文写到 `dest`
pub async fn encrypt_file(source: &Path, dest: &Path, password: &str) -> Result<()> {
    let source = source.to_path_buf();
    let dest = dest.to_path_buf();
    let password = password.to_string();

    debug!("加密文件: {} -> {}", source.display(), dest.display());

    tokio::task::spawn_blocking(move || {
        let plaintext = std::fs::read(&source)?;

        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let key = derive_key(&password, &salt);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|e| BackupError::crypto(format!("加密失败: {e}")))?;

        let mut output = Vec::with_capacity(MAGIC.len() + SALT_LEN + NONCE_LEN + ciphertext.len());
        output.extend_from_slice(MAGIC);
        output.extend_from_slice(&salt);
        output.extend_from_slice(&nonce_bytes);
        output.extend_from_slice(&ciphertext);

        std::fs::write(&dest, output)?;
        Ok::<(), BackupError>(())
    })
    .await??;

    Ok(())
}

/// 解密 `source` 文件，明文写到 `dest`
pub async fn decrypt_file(source: &Path, dest: &Path, password: &str) -> Result<()> {
    let source = source.to_path_buf();
    let dest = dest.to_path_buf();
    let password = password.to_string();

    debug!("解密文件: {} -> {}", source.display(), dest.display());

    tokio::task::spawn_blocking(move || {
        let data = std::fs::read(&source)?;

        let header_len = MAGIC.len() + SALT_LEN + NONCE_LEN;
        if data.len() < header_len || &data[..MAGIC.len()] != MAGIC {
            return Err(BackupError::crypto(format!(
                "不是有效的加密备份文件: {}",
                source.display()
            )));
        }

        let salt = &data[MAGIC.len()..MAGIC.len() + SALT_LEN];
        let nonce_bytes = &data[MAGIC.len() + SALT_LEN..header_len];
        let ciphertext = &data[header_len..];

        let key = derive_key(&password, salt);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| BackupError::crypto("解密失败，口令错误或文件已损坏".to_string()))?;

        std::fs::write(&dest, plaintext)?;
        Ok::<(), BackupError>(())
    })
    .await??;

    Ok(())
}
