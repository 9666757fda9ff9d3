//! 远程保留策略
//!
//! 备份上传成功后，按远程目录的真实文件列表做滚动清理：只保留最新的
//! `retention_count` 个本任务产物，其余从旧到新删除。本地数据库不参与
//! 判断，手动上传或历史遗留的同名产物同样会被纳入清理。

use std::sync::Arc;
use tracing::{info, warn};

use crate::Result;
use crate::rclone::TransferGateway;
use crate::store::DestinationBinding;

/// 判断远程文件是否是指定任务的备份产物
///
/// 产物命名为 `{task}_{YYYYMMDD}_{HHMMSS}[.扩展名]`：名称必须以任务名
/// 加下划线开头，且第一个 `.` 之前的末尾两段是 8 位日期和 6 位时间。
pub fn is_task_artifact(task_name: &str, file_name: &str) -> bool {
    let Some(rest) = file_name.strip_prefix(task_name) else {
        return false;
    };
    let Some(rest) = rest.strip_prefix('_') else {
        return false;
    };

    let stem = rest.split('.').next().unwrap_or(rest);
    let tokens: Vec<&str> = stem.split('_').collect();
    if tokens.len() < 2 {
        return false;
    }

    let time_token = tokens[tokens.len() - 1];
    let date_token = tokens[tokens.len() - 2];

    date_token.len() == 8
        && date_token.chars().all(|c| c.is_ascii_digit())
        && time_token.len() == 6
        && time_token.chars().all(|c| c.is_ascii_digit())
}

/// 保留策略引擎
pub struct RetentionEngine {
    gateway: Arc<dyn TransferGateway>,
}

impl RetentionEngine {
    pub fn new(gateway: Arc<dyn TransferGateway>) -> Self {
        Self { gateway }
    }

    /// 清理一个远程目的地上超出保留数量的旧备份
    ///
    /// 删除失败只记日志不中断，留待下一轮清理重试。返回成功删除的数量。
    pub async fn cleanup(
        &self,
        task_name: &str,
        dest: &DestinationBinding,
        retention_count: usize,
    ) -> Result<usize> {
        let files = self.gateway.list(&dest.profile, &dest.remote_path).await?;

        // 时间戳在文件名里按字典序排列即为时间序
        let mut artifacts: Vec<String> = files
            .into_iter()
            .filter(|f| is_task_artifact(task_name, &f.name))
            .map(|f| f.name)
            .collect();
        artifacts.sort();

        if artifacts.len() <= retention_count {
            return Ok(0);
        }

        let excess = artifacts.len() - retention_count;
        let mut deleted = 0;

        for file_name in &artifacts[..excess] {
            match self
                .gateway
                .delete(&dest.profile, &dest.remote_path, file_name)
                .await
            {
                Ok(()) => {
                    info!(
                        "已删除过期备份: {}:{}/{}",
                        dest.profile, dest.remote_path, file_name
                    );
                    deleted += 1;
                }
                Err(e) => {
                    warn!(
                        "删除过期备份失败（下轮重试）: {}:{}/{}: {}",
                        dest.profile, dest.remote_path, file_name, e
                    );
                }
            }
        }

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockGateway;

    #[test]
    fn test_artifact_matching() {
        assert!(is_task_artifact("app", "app_20240601_120000.tar.gz"));
        assert!(is_task_artifact("app", "app_20240601_120000.zip"));
        assert!(is_task_artifact("app", "app_20240601_120000.tar.gz.encrypted"));
        assert!(is_task_artifact("app", "app_20240601_120000"));

        // 任务名自身含下划线
        assert!(is_task_artifact("my_app", "my_app_20240601_120000.tar.gz"));

        // 前缀、时间戳格式不符
        assert!(!is_task_artifact("app", "other_20240601_120000.tar.gz"));
        assert!(!is_task_artifact("app", "app2_20240601_120000.tar.gz"));
        assert!(!is_task_artifact("app", "app_2024_1200.tar.gz"));
        assert!(!is_task_artifact("app", "app_20240601.tar.gz"));
        // 未压缩上传的产物带原始文件名，不参与清理
        assert!(!is_task_artifact("app", "app_20240601_120000_dump.sql"));
    }

    #[tokio::test]
    async fn test_cleanup_deletes_oldest() {
        let gateway = Arc::new(MockGateway::new());
        let dest = DestinationBinding::new("minio", "backups/app");

        for ts in [
            "20240601_010000",
            "20240602_010000",
            "20240603_010000",
            "20240604_010000",
        ] {
            gateway.seed_file(&dest, &format!("app_{ts}.tar.gz"));
        }
        gateway.seed_file(&dest, "unrelated.txt");

        let engine = RetentionEngine::new(gateway.clone());
        let deleted = engine.cleanup("app", &dest, 2).await.unwrap();

        assert_eq!(deleted, 2);
        let remaining = gateway.file_names(&dest);
        assert_eq!(
            remaining,
            vec![
                "app_20240603_010000.tar.gz".to_string(),
                "app_20240604_010000.tar.gz".to_string(),
                "unrelated.txt".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_cleanup_continues_after_delete_failure() {
        let gateway = Arc::new(MockGateway::new());
        let dest = DestinationBinding::new("minio", "backups/app");

        for ts in [
            "20240601_010000",
            "20240602_010000",
            "20240603_010000",
            "20240604_010000",
        ] {
            gateway.seed_file(&dest, &format!("app_{ts}.tar.gz"));
        }
        // 最旧的一个删除失败，不影响其余删除
        gateway.set_delete_failure("app_20240601_010000.tar.gz");

        let engine = RetentionEngine::new(gateway.clone());
        let deleted = engine.cleanup("app", &dest, 1).await.unwrap();

        assert_eq!(deleted, 2);
        let remaining = gateway.file_names(&dest);
        assert_eq!(
            remaining,
            vec![
                "app_20240601_010000.tar.gz".to_string(),
                "app_20240604_010000.tar.gz".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_cleanup_under_limit_is_noop() {
        let gateway = Arc::new(MockGateway::new());
        let dest = DestinationBinding::new("minio", "backups/app");
        gateway.seed_file(&dest, "app_20240601_010000.tar.gz");

        let engine = RetentionEngine::new(gateway.clone());
        let deleted = engine.cleanup("app", &dest, 3).await.unwrap();

        assert_eq!(deleted, 0);
        assert_eq!(gateway.file_names(&dest).len(), 1);
    }
}
