//! rclone 传输网关
//!
//! 所有远程存储操作委托给外部 rclone 程序完成，本模块只负责
//! 进程调用、超时控制和输出解析。远程以 `profile:path` 形式寻址，
//! profile 必须在 rclone 配置文件中存在。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::constants::transfer;
use crate::{BackupError, Result};

/// 远程文件条目，对应 rclone lsjson 的输出
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFile {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Size")]
    pub size: i64,
}

/// 远程传输网关
///
/// 执行器与保留策略只依赖这个接口，测试时用内存实现替换。
#[async_trait]
pub trait TransferGateway: Send + Sync {
    /// 上传本地文件到 `profile:remote_dir/`
    async fn upload(&self, local_file: &Path, profile: &str, remote_dir: &str) -> Result<()>;

    /// 列出 `profile:remote_dir` 下的文件（不含子目录内容）
    async fn list(&self, profile: &str, remote_dir: &str) -> Result<Vec<RemoteFile>>;

    /// 删除 `profile:remote_dir/file_name`，文件不存在视为成功
    async fn delete(&self, profile: &str, remote_dir: &str, file_name: &str) -> Result<()>;
}

/// 基于 rclone 命令行的网关实现
#[derive(Debug, Clone)]
pub struct RcloneGateway {
    binary: PathBuf,
    config_path: PathBuf,
}

impl RcloneGateway {
    pub fn new(binary: impl Into<PathBuf>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            config_path: config_path.into(),
        }
    }

    /// 检查 rclone 是否可用（PATH 查找或绝对路径存在）
    pub fn check_available(&self) -> Result<PathBuf> {
        which::which(&self.binary)
            .map_err(|_| BackupError::transfer(format!("找不到 rclone 程序: {}", self.binary.display())))
    }

    fn remote_spec(profile: &str, remote_dir: &str) -> String {
        format!("{}:{}", profile, remote_dir.trim_matches('/'))
    }

    async fn run_rclone(&self, args: &[&str], timeout_secs: u64) -> Result<Output> {
        debug!("执行 rclone {}", args.join(" "));

        let mut command = Command::new(&self.binary);
        command
            .arg("--config")
            .arg(&self.config_path)
            .args(args)
            .kill_on_drop(true);

        let output = tokio::time::timeout(Duration::from_secs(timeout_secs), command.output())
            .await
            .map_err(|_| {
                BackupError::transfer(format!("rclone 执行超时（{timeout_secs}秒）: {}", args.join(" ")))
            })??;

        Ok(output)
    }

    fn stderr_text(output: &Output) -> String {
        String::from_utf8_lossy(&output.stderr).trim().to_string()
    }
}

#[async_trait]
impl TransferGateway for RcloneGateway {
    async fn upload(&self, local_file: &Path, profile: &str, remote_dir: &str) -> Result<()> {
        let remote = Self::remote_spec(profile, remote_dir);

        let local = local_file.to_string_lossy().to_string();
        let output = self
            .run_rclone(
                &["copy", &local, &remote, "--s3-no-check-bucket"],
                transfer::UPLOAD_TIMEOUT,
            )
            .await?;

        if !output.status.success() {
            return Err(BackupError::transfer(format!(
                "上传到 {} 失败: {}",
                remote,
                Self::stderr_text(&output)
            )));
        }

        Ok(())
    }

    async fn list(&self, profile: &str, remote_dir: &str) -> Result<Vec<RemoteFile>> {
        let remote = Self::remote_spec(profile, remote_dir);

        let output = self
            .run_rclone(
                &["lsjson", &remote, "--files-only"],
                transfer::LIST_TIMEOUT,
            )
            .await?;

        if !output.status.success() {
            return Err(BackupError::transfer(format!(
                "列出 {} 失败: {}",
                remote,
                Self::stderr_text(&output)
            )));
        }

        let files: Vec<RemoteFile> = serde_json::from_slice(&output.stdout)?;
        Ok(files)
    }

    async fn delete(&self, profile: &str, remote_dir: &str, file_name: &str) -> Result<()> {
        let remote = format!(
            "{}/{}",
            Self::remote_spec(profile, remote_dir),
            file_name
        );

        let output = self
            .run_rclone(&["deletefile", &remote], transfer::DELETE_TIMEOUT)
            .await?;

        if !output.status.success() {
            let stderr = Self::stderr_text(&output);
            // 文件已经不在远程上，删除目标达成
            if stderr.contains("not found") || stderr.contains("does not exist") {
                warn!("远程文件已不存在，跳过删除: {remote}");
                return Ok(());
            }
            return Err(BackupError::transfer(format!(
                "删除 {} 失败: {}",
                remote, stderr
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_spec_trims_slashes() {
        assert_eq!(
            RcloneGateway::remote_spec("minio", "/backups/app/"),
            "minio:backups/app"
        );
        assert_eq!(RcloneGateway::remote_spec("s3", "backups"), "s3:backups");
    }

    #[test]
    fn test_remote_file_parses_lsjson() {
        let json = r#"[
            {"Path":"app_20240601_120000.tar.gz","Name":"app_20240601_120000.tar.gz","Size":1024,"IsDir":false},
            {"Path":"other.txt","Name":"other.txt","Size":7,"IsDir":false}
        ]"#;
        let files: Vec<RemoteFile> = serde_json::from_str(json).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "app_20240601_120000.tar.gz");
        assert_eq!(files[0].size, 1024);
    }
}
