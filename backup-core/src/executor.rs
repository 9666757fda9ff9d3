//! 备份执行器
//!
//! 一次备份运行按目的地严格串行：每个目的地先落一条 running 日志，再走
//! 测量、压缩、按需加密、上传、保留清理的完整流水线。单个目的地失败只
//! 记录在自己的日志上，不影响其余目的地继续执行。

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::PathMapping;
use crate::constants::backup;
use crate::rclone::TransferGateway;
use crate::retention::RetentionEngine;
use crate::store::{BackupTask, CompressionMode, DestinationBinding, RunStatus, TaskStore};
use crate::{BackupError, Result, archive, crypto};

/// 备份执行器
#[derive(Clone)]
pub struct BackupExecutor {
    store: TaskStore,
    gateway: Arc<dyn TransferGateway>,
    retention: Arc<RetentionEngine>,
    temp_dir: PathBuf,
    path_mapping: PathMapping,
}

impl BackupExecutor {
    pub fn new(
        store: TaskStore,
        gateway: Arc<dyn TransferGateway>,
        temp_dir: PathBuf,
        path_mapping: PathMapping,
    ) -> Self {
        let retention = Arc::new(RetentionEngine::new(gateway.clone()));
        Self {
            store,
            gateway,
            retention,
            temp_dir,
            path_mapping,
        }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// 触发任务执行，备份在后台进行
    ///
    /// 返回时任务已通过检查并开始执行。同一任务已在运行时拒绝触发。
    pub async fn run_task(&self, task_id: i64) -> Result<String> {
        let task = self.check_task(task_id).await?;
        let message = format!("备份任务 {} 已开始执行", task.name);

        let executor = self.clone();
        tokio::spawn(async move {
            if let Err(e) = executor.execute_task(task).await {
                error!("备份任务执行失败: {e}");
            }
        });

        Ok(message)
    }

    /// 触发任务执行并等待完成（调度器和测试使用）
    pub async fn run_task_and_wait(&self, task_id: i64) -> Result<()> {
        let task = self.check_task(task_id).await?;
        self.execute_task(task).await
    }

    /// 执行前检查：任务存在、启用且未在运行
    ///
    /// 检查和执行之间没有全局锁，并发触发同一任务存在竞争窗口，
    /// 数据库中的 running 日志是当前唯一的互斥依据。
    async fn check_task(&self, task_id: i64) -> Result<BackupTask> {
        let task = self.store.require_task(task_id).await?;

        if !task.is_active {
            return Err(BackupError::task(format!("任务 {} 已停用", task.name)));
        }

        if self.store.is_task_running(task_id).await? {
            return Err(BackupError::task(format!(
                "任务 {} 正在运行，不能重复触发",
                task.name
            )));
        }

        Ok(task)
    }

    /// 执行一次完整的备份运行
    pub async fn execute_task(&self, task: BackupTask) -> Result<()> {
        info!("开始执行备份任务: {}", task.name);

        let result = self.run_destinations(&task).await;

        if let Err(e) = &result {
            // 安全网：异常跳出目的地循环时不留下 running 状态的日志
            let _ = self
                .store
                .fail_running_runs(task.id, &e.to_string())
                .await;
        }

        result
    }

    async fn run_destinations(&self, task: &BackupTask) -> Result<()> {
        let mut failures: Vec<String> = Vec::new();

        for dest in &task.destinations {
            // 先落日志，进行中的状态对外可见
            let run_id = self.store.create_run(task.id, dest).await?;

            let mut temp_file: Option<PathBuf> = None;
            let result = self
                .backup_to_destination(task, dest, run_id, &mut temp_file)
                .await;

            // 无论成败都清理临时产物
            if let Some(path) = temp_file.take() {
                if path.exists() {
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        warn!("清理临时文件失败: {}: {e}", path.display());
                    }
                }
            }

            match result {
                Ok(()) => {
                    info!(
                        "上传完成: {} -> {}:{}",
                        task.name, dest.profile, dest.remote_path
                    );
                    self.store
                        .finish_run(run_id, RunStatus::Success, None)
                        .await?;
                }
                Err(e) => {
                    error!(
                        "备份失败: {} -> {}:{}: {e}",
                        task.name, dest.profile, dest.remote_path
                    );
                    self.store
                        .finish_run(run_id, RunStatus::Failed, Some(e.to_string()))
                        .await?;
                    failures.push(format!("{}:{}: {e}", dest.profile, dest.remote_path));
                }
            }
        }

        // 部分失败也算跑过一轮，最后运行时间照常更新
        self.store.set_task_last_run(task.id, Utc::now()).await?;

        if failures.is_empty() {
            info!("备份任务 {} 执行完成", task.name);
            Ok(())
        } else {
            Err(BackupError::task(format!(
                "任务 {} 有 {} 个目的地备份失败: {}",
                task.name,
                failures.len(),
                failures.join("; ")
            )))
        }
    }

    /// 对单个目的地执行测量、压缩、加密、上传、保留清理
    async fn backup_to_destination(
        &self,
        task: &BackupTask,
        dest: &DestinationBinding,
        run_id: i64,
        temp_file: &mut Option<PathBuf>,
    ) -> Result<()> {
        let source = self.path_mapping.resolve(&task.source_path);
        if !source.exists() {
            return Err(BackupError::task(format!(
                "源路径不存在: {}",
                source.display()
            )));
        }

        tokio::fs::create_dir_all(&self.temp_dir).await?;

        let original_size = archive::path_size(&source).await?;
        self.store
            .record_run_sizes(run_id, Some(original_size), None, None)
            .await?;

        let timestamp = Utc::now().format(backup::TIMESTAMP_FORMAT).to_string();

        // ========== 压缩阶段 ==========
        let artifact = match task.compression {
            CompressionMode::TarGz => {
                let path = self.temp_dir.join(format!(
                    "{}_{}.{}",
                    task.name,
                    timestamp,
                    backup::TAR_GZ_EXTENSION
                ));
                archive::create_tar_gz(&source, &path).await?;
                *temp_file = Some(path.clone());

                let size = archive::path_size(&path).await?;
                self.store
                    .record_run_sizes(run_id, None, Some(size), None)
                    .await?;
                path
            }
            CompressionMode::Zip => {
                let path = self.temp_dir.join(format!(
                    "{}_{}.{}",
                    task.name,
                    timestamp,
                    backup::ZIP_EXTENSION
                ));
                archive::create_zip(&source, &path).await?;
                *temp_file = Some(path.clone());

                let size = archive::path_size(&path).await?;
                self.store
                    .record_run_sizes(run_id, None, Some(size), None)
                    .await?;
                path
            }
            CompressionMode::None => {
                // 不压缩只支持单个文件，目录必须选择压缩方式
                if source.is_dir() {
                    return Err(BackupError::task(format!(
                        "任务 {} 未启用压缩，但源路径是目录: {}",
                        task.name,
                        source.display()
                    )));
                }
                let basename = source
                    .file_name()
                    .ok_or_else(|| {
                        BackupError::task(format!("无法获取源文件名: {}", source.display()))
                    })?
                    .to_string_lossy();
                let path = self
                    .temp_dir
                    .join(format!("{}_{}_{}", task.name, timestamp, basename));
                tokio::fs::copy(&source, &path).await?;
                *temp_file = Some(path.clone());

                // 未压缩时产物大小即源大小，日志两个字段保持可比
                self.store
                    .record_run_sizes(run_id, None, Some(original_size), None)
                    .await?;
                path
            }
        };

        // ========== 加密阶段 ==========
        let upload_file = if let Some(password) = &task.encryption_password {
            let encrypted = PathBuf::from(format!(
                "{}.{}",
                artifact.display(),
                backup::ENCRYPTED_SUFFIX
            ));
            crypto::encrypt_file(&artifact, &encrypted, password).await?;
            // 明文中间产物立即删除
            tokio::fs::remove_file(&artifact).await?;
            *temp_file = Some(encrypted.clone());
            encrypted
        } else {
            artifact
        };

        let final_size = archive::path_size(&upload_file).await?;
        self.store
            .record_run_sizes(run_id, None, None, Some(final_size))
            .await?;

        // ========== 上传阶段 ==========
        self.gateway
            .upload(&upload_file, &dest.profile, &dest.remote_path)
            .await?;

        // 清理失败不影响本次运行结果
        if let Err(e) = self
            .retention
            .cleanup(&task.name, dest, task.retention_count as usize)
            .await
        {
            warn!("保留清理失败: {}:{}: {e}", dest.profile, dest.remote_path);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewTask;
    use crate::test_support::MockGateway;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    async fn make_executor(gateway: Arc<MockGateway>, temp_dir: PathBuf) -> BackupExecutor {
        let store = TaskStore::open_memory().await.unwrap();
        BackupExecutor::new(store, gateway, temp_dir, PathMapping::default())
    }

    fn make_source(root: &std::path::Path) -> PathBuf {
        let source = root.join("app");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("data.txt"), b"payload").unwrap();
        source
    }

    #[tokio::test]
    async fn test_backup_upload_and_rolling_cleanup() {
        let dir = tempdir().unwrap();
        let source = make_source(dir.path());
        let gateway = Arc::new(MockGateway::new());
        let executor = make_executor(gateway.clone(), dir.path().join("temp")).await;

        let mut new_task = NewTask::new("app", source.to_string_lossy());
        new_task.retention_count = 3;
        new_task
            .destinations
            .push(DestinationBinding::new("minio", "backups/app"));
        let task = executor.store().create_task(new_task).await.unwrap();
        let dest = task.destinations[0].clone();

        // 连续四轮，第四轮后远程只保留最新三个产物，第一轮的被删除
        let mut uploaded: Vec<String> = Vec::new();
        for _ in 0..4 {
            executor.run_task_and_wait(task.id).await.unwrap();
            let names = gateway.file_names(&dest);
            for name in names {
                if !uploaded.contains(&name) {
                    uploaded.push(name);
                }
            }
            // 产物文件名时间戳精确到秒，保证各轮名称不同
            tokio::time::sleep(Duration::from_millis(1100)).await;
        }

        let names = gateway.file_names(&dest);
        assert_eq!(names.len(), 3);
        assert!(names.iter().all(|n| n.starts_with("app_")));
        assert!(names.iter().all(|n| n.ends_with(".tar.gz")));
        // 第一轮的产物已被滚动清理
        assert!(!names.contains(&uploaded[0]));

        let runs = executor.store().list_runs(Some(task.id), 10).await.unwrap();
        assert_eq!(runs.len(), 4);
        assert!(runs.iter().all(|r| r.status == RunStatus::Success));
        assert!(runs.iter().all(|r| r.original_size == Some(7)));
        assert!(runs.iter().all(|r| r.compressed_size.is_some()));

        // 临时目录不残留产物
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("temp")).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_partial_destination_failure() {
        let dir = tempdir().unwrap();
        let source = make_source(dir.path());
        let gateway = Arc::new(MockGateway::new());
        gateway.set_unreachable("dead");
        let executor = make_executor(gateway.clone(), dir.path().join("temp")).await;

        let mut new_task = NewTask::new("app", source.to_string_lossy());
        new_task.destinations = vec![
            DestinationBinding::new("minio", "backups/app"),
            DestinationBinding::new("dead", "backups/app"),
        ];
        let task = executor.store().create_task(new_task).await.unwrap();

        let result = executor.run_task_and_wait(task.id).await;
        assert!(result.is_err());

        // 第一个目的地成功，第二个失败，各有独立的运行日志
        let runs = executor.store().list_runs(Some(task.id), 10).await.unwrap();
        assert_eq!(runs.len(), 2);
        let success = runs.iter().filter(|r| r.status == RunStatus::Success).count();
        let failed = runs.iter().filter(|r| r.status == RunStatus::Failed).count();
        assert_eq!((success, failed), (1, 1));

        // 部分失败后最后运行时间照常更新
        let task = executor.store().require_task(task.id).await.unwrap();
        assert!(task.last_run_at.is_some());

        assert_eq!(gateway.file_names(&task.destinations[0]).len(), 1);
    }

    #[tokio::test]
    async fn test_uncompressed_directory_fails_run() {
        let dir = tempdir().unwrap();
        let source = make_source(dir.path());
        let gateway = Arc::new(MockGateway::new());
        let executor = make_executor(gateway.clone(), dir.path().join("temp")).await;

        let mut new_task = NewTask::new("app", source.to_string_lossy());
        new_task.compression = CompressionMode::None;
        new_task
            .destinations
            .push(DestinationBinding::new("minio", "backups/app"));
        let task = executor.store().create_task(new_task).await.unwrap();

        let result = executor.run_task_and_wait(task.id).await;
        assert!(result.is_err());

        // 硬错误记录在目的地自己的日志上，不会中断整轮运行
        let runs = executor.store().list_runs(Some(task.id), 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(runs[0].error_message.is_some());

        let task = executor.store().require_task(task.id).await.unwrap();
        assert!(task.last_run_at.is_some());
    }

    #[tokio::test]
    async fn test_uncompressed_file_keeps_basename() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("dump.sql");
        fs::write(&source, b"select 1;").unwrap();
        let gateway = Arc::new(MockGateway::new());
        let executor = make_executor(gateway.clone(), dir.path().join("temp")).await;

        let mut new_task = NewTask::new("db", source.to_string_lossy());
        new_task.compression = CompressionMode::None;
        new_task
            .destinations
            .push(DestinationBinding::new("minio", "backups/db"));
        let task = executor.store().create_task(new_task).await.unwrap();

        executor.run_task_and_wait(task.id).await.unwrap();

        let names = gateway.file_names(&task.destinations[0]);
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("db_"));
        assert!(names[0].ends_with("_dump.sql"));

        // 未压缩时日志的压缩后大小等于源大小
        let runs = executor.store().list_runs(Some(task.id), 10).await.unwrap();
        assert_eq!(runs[0].original_size, Some(9));
        assert_eq!(runs[0].compressed_size, runs[0].original_size);
    }

    #[tokio::test]
    async fn test_cleanup_failure_keeps_run_successful() {
        let dir = tempdir().unwrap();
        let source = make_source(dir.path());
        let gateway = Arc::new(MockGateway::new());
        // 上传正常，但清理阶段取不到远程列表
        gateway.set_list_failure("minio");
        let executor = make_executor(gateway.clone(), dir.path().join("temp")).await;

        let mut new_task = NewTask::new("app", source.to_string_lossy());
        new_task.retention_count = 1;
        new_task
            .destinations
            .push(DestinationBinding::new("minio", "backups/app"));
        let task = executor.store().create_task(new_task).await.unwrap();

        // 清理失败只记告警，本次运行仍按上传结果判定
        executor.run_task_and_wait(task.id).await.unwrap();

        let runs = executor.store().list_runs(Some(task.id), 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Success);
        assert!(runs[0].error_message.is_none());

        assert_eq!(gateway.file_names(&task.destinations[0]).len(), 1);
    }

    #[tokio::test]
    async fn test_encrypted_artifact_suffix() {
        let dir = tempdir().unwrap();
        let source = make_source(dir.path());
        let gateway = Arc::new(MockGateway::new());
        let executor = make_executor(gateway.clone(), dir.path().join("temp")).await;

        let mut new_task = NewTask::new("app", source.to_string_lossy());
        new_task.encryption_password = Some("s3cret".to_string());
        new_task
            .destinations
            .push(DestinationBinding::new("minio", "backups/app"));
        let task = executor.store().create_task(new_task).await.unwrap();

        executor.run_task_and_wait(task.id).await.unwrap();

        let names = gateway.file_names(&task.destinations[0]);
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".tar.gz.encrypted"));

        let runs = executor.store().list_runs(Some(task.id), 10).await.unwrap();
        assert!(runs[0].final_size.unwrap() > 0);
        assert_ne!(runs[0].final_size, runs[0].compressed_size);
    }

    #[tokio::test]
    async fn test_concurrent_trigger_rejected() {
        let dir = tempdir().unwrap();
        let source = make_source(dir.path());
        let gateway = Arc::new(MockGateway::new());
        gateway.set_upload_delay(Duration::from_millis(500));
        let executor = make_executor(gateway.clone(), dir.path().join("temp")).await;

        let mut new_task = NewTask::new("app", source.to_string_lossy());
        new_task
            .destinations
            .push(DestinationBinding::new("minio", "backups/app"));
        let task = executor.store().create_task(new_task).await.unwrap();

        executor.run_task(task.id).await.unwrap();

        // 等到后台运行真正开始（出现 running 日志）再触发第二次
        let mut running = false;
        for _ in 0..50 {
            if executor.store().is_task_running(task.id).await.unwrap() {
                running = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(running);

        let second = executor.run_task(task.id).await;
        assert!(second.is_err());

        // 等第一轮结束
        for _ in 0..100 {
            if !executor.store().is_task_running(task.id).await.unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(gateway.file_names(&task.destinations[0]).len(), 1);
    }

    #[tokio::test]
    async fn test_inactive_task_rejected() {
        let dir = tempdir().unwrap();
        let source = make_source(dir.path());
        let gateway = Arc::new(MockGateway::new());
        let executor = make_executor(gateway.clone(), dir.path().join("temp")).await;

        let mut new_task = NewTask::new("app", source.to_string_lossy());
        new_task.is_active = false;
        new_task
            .destinations
            .push(DestinationBinding::new("minio", "backups/app"));
        let task = executor.store().create_task(new_task).await.unwrap();

        assert!(executor.run_task(task.id).await.is_err());
    }
}
