//! 备份任务存储层
//!
//! 在 DuckDbManager 之上提供类型化的任务/日志读写接口，
//! 负责字段校验、状态枚举转换和加密口令的 base64 混淆。

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::config::PathMapping;
use crate::db::{DuckDbManager, RunRecord, TaskFields, TaskRecord};
use crate::{BackupError, Result};

/// 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            other => Err(BackupError::task(format!("未知的运行状态: {other}"))),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 压缩方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    /// 不压缩，源文件原样上传（源为目录时报错）
    None,
    TarGz,
    Zip,
}

impl CompressionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionMode::None => "none",
            CompressionMode::TarGz => "tar.gz",
            CompressionMode::Zip => "zip",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(CompressionMode::None),
            "tar.gz" | "targz" | "tgz" => Ok(CompressionMode::TarGz),
            "zip" => Ok(CompressionMode::Zip),
            other => Err(BackupError::task(format!("未知的压缩方式: {other}"))),
        }
    }

    /// 压缩产物的文件扩展名
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            CompressionMode::None => None,
            CompressionMode::TarGz => Some(crate::constants::backup::TAR_GZ_EXTENSION),
            CompressionMode::Zip => Some(crate::constants::backup::ZIP_EXTENSION),
        }
    }
}

impl fmt::Display for CompressionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 任务的一个远程目的地
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationBinding {
    /// rclone 配置中的 remote 名称
    pub profile: String,
    /// remote 内的目标目录
    pub remote_path: String,
}

impl DestinationBinding {
    pub fn new(profile: impl Into<String>, remote_path: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            remote_path: remote_path.into(),
        }
    }
}

/// 备份任务（类型化形态）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupTask {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub source_path: String,
    pub cron_expression: String,
    pub compression: CompressionMode,
    pub encryption_password: Option<String>,
    pub retention_count: i32,
    pub is_active: bool,
    pub destinations: Vec<DestinationBinding>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackupTask {
    /// 是否启用加密
    pub fn encryption_enabled(&self) -> bool {
        self.encryption_password.is_some()
    }
}

/// 新建任务的输入
#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub description: String,
    pub source_path: String,
    pub cron_expression: String,
    pub compression: CompressionMode,
    pub encryption_password: Option<String>,
    pub retention_count: i32,
    pub is_active: bool,
    pub destinations: Vec<DestinationBinding>,
}

impl NewTask {
    pub fn new(name: impl Into<String>, source_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            source_path: source_path.into(),
            cron_expression: String::new(),
            compression: CompressionMode::TarGz,
            encryption_password: None,
            retention_count: 10,
            is_active: true,
            destinations: Vec::new(),
        }
    }
}

/// 一次备份运行的日志（类型化形态）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRun {
    pub id: i64,
    pub task_id: i64,
    pub profile: String,
    pub remote_path: String,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub original_size: Option<i64>,
    pub compressed_size: Option<i64>,
    pub final_size: Option<i64>,
    pub error_message: Option<String>,
}

/// 任务存储
#[derive(Debug, Clone)]
pub struct TaskStore {
    db: DuckDbManager,
    path_mapping: PathMapping,
}

impl TaskStore {
    /// 打开磁盘数据库
    pub async fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db = DuckDbManager::new(db_path).await?;
        Ok(Self {
            db,
            path_mapping: PathMapping::default(),
        })
    }

    /// 打开内存数据库（测试用）
    pub async fn open_memory() -> Result<Self> {
        let db = DuckDbManager::new_memory().await?;
        Ok(Self {
            db,
            path_mapping: PathMapping::default(),
        })
    }

    /// 设置容器路径映射，源路径校验按映射后的实际路径进行
    pub fn with_path_mapping(mut self, path_mapping: PathMapping) -> Self {
        self.path_mapping = path_mapping;
        self
    }

    pub fn db(&self) -> &DuckDbManager {
        &self.db
    }

    // ========== 任务管理 ==========

    /// 创建备份任务
    pub async fn create_task(&self, new_task: NewTask) -> Result<BackupTask> {
        self.validate(&new_task)?;

        if self.db.get_task_by_name(&new_task.name).await?.is_some() {
            return Err(BackupError::task(format!(
                "任务名称已存在: {}",
                new_task.name
            )));
        }

        let destinations: Vec<(String, String)> = new_task
            .destinations
            .iter()
            .map(|d| (d.profile.clone(), d.remote_path.clone()))
            .collect();

        let task_id = self
            .db
            .create_task(Self::to_fields(&new_task), destinations)
            .await?;

        self.require_task(task_id).await
    }

    /// 更新备份任务（整体替换）
    pub async fn update_task(&self, task_id: i64, new_task: NewTask) -> Result<BackupTask> {
        self.validate(&new_task)?;

        let existing = self.require_task(task_id).await?;
        if existing.name != new_task.name
            && self.db.get_task_by_name(&new_task.name).await?.is_some()
        {
            return Err(BackupError::task(format!(
                "任务名称已存在: {}",
                new_task.name
            )));
        }

        let destinations: Vec<(String, String)> = new_task
            .destinations
            .iter()
            .map(|d| (d.profile.clone(), d.remote_path.clone()))
            .collect();

        self.db
            .update_task(task_id, Self::to_fields(&new_task), destinations)
            .await?;

        self.require_task(task_id).await
    }

    /// 删除备份任务，正在运行时拒绝
    pub async fn delete_task(&self, task_id: i64) -> Result<()> {
        let task = self.require_task(task_id).await?;

        if self.db.find_running_run(task_id).await?.is_some() {
            return Err(BackupError::task(format!(
                "任务 {} 正在运行，无法删除",
                task.name
            )));
        }

        self.db.delete_task(task_id).await
    }

    /// 根据 ID 获取任务
    pub async fn get_task(&self, task_id: i64) -> Result<Option<BackupTask>> {
        match self.db.get_task(task_id).await? {
            Some(record) => Ok(Some(self.hydrate(record).await?)),
            None => Ok(None),
        }
    }

    /// 根据名称获取任务
    pub async fn get_task_by_name(&self, name: &str) -> Result<Option<BackupTask>> {
        match self.db.get_task_by_name(name).await? {
            Some(record) => Ok(Some(self.hydrate(record).await?)),
            None => Ok(None),
        }
    }

    /// 根据 ID 获取任务，不存在时报错
    pub async fn require_task(&self, task_id: i64) -> Result<BackupTask> {
        self.get_task(task_id)
            .await?
            .ok_or_else(|| BackupError::task(format!("任务不存在: id={task_id}")))
    }

    /// 获取任务列表
    pub async fn list_tasks(&self, active_only: bool) -> Result<Vec<BackupTask>> {
        let records = self.db.list_tasks(active_only).await?;
        let mut tasks = Vec::with_capacity(records.len());
        for record in records {
            tasks.push(self.hydrate(record).await?);
        }
        Ok(tasks)
    }

    /// 设置任务启用状态
    pub async fn set_task_active(&self, task_id: i64, is_active: bool) -> Result<()> {
        self.require_task(task_id).await?;
        self.db.set_task_active(task_id, is_active).await
    }

    /// 更新任务最后运行时间
    pub async fn set_task_last_run(&self, task_id: i64, at: DateTime<Utc>) -> Result<()> {
        self.db.set_task_last_run(task_id, at).await
    }

    /// 更新任务下次运行时间
    pub async fn set_task_next_run(
        &self,
        task_id: i64,
        at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.db.set_task_next_run(task_id, at).await
    }

    // ========== 运行日志 ==========

    /// 创建运行日志，返回日志 ID
    pub async fn create_run(&self, task_id: i64, dest: &DestinationBinding) -> Result<i64> {
        self.db
            .create_run(task_id, &dest.profile, &dest.remote_path)
            .await
    }

    /// 记录运行日志中的文件大小
    pub async fn record_run_sizes(
        &self,
        run_id: i64,
        original_size: Option<i64>,
        compressed_size: Option<i64>,
        final_size: Option<i64>,
    ) -> Result<()> {
        self.db
            .record_run_sizes(run_id, original_size, compressed_size, final_size)
            .await
    }

    /// 将运行日志置为终态
    pub async fn finish_run(
        &self,
        run_id: i64,
        status: RunStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        self.db
            .finish_run(run_id, status.as_str(), error_message)
            .await
    }

    /// 任务是否有 running 状态的日志
    pub async fn is_task_running(&self, task_id: i64) -> Result<bool> {
        Ok(self.db.find_running_run(task_id).await?.is_some())
    }

    /// 将任务所有 running 日志标记为失败
    pub async fn fail_running_runs(&self, task_id: i64, error_message: &str) -> Result<u64> {
        self.db.fail_running_runs(task_id, error_message).await
    }

    /// 将开始时间早于 cutoff 的 running 日志标记为失败
    pub async fn mark_stale_runs_failed(
        &self,
        cutoff: DateTime<Utc>,
        error_message: &str,
    ) -> Result<u64> {
        self.db.mark_stale_runs_failed(cutoff, error_message).await
    }

    /// 查询运行日志
    pub async fn list_runs(&self, task_id: Option<i64>, limit: i64) -> Result<Vec<BackupRun>> {
        let records = self.db.list_runs(task_id, limit).await?;
        records.into_iter().map(Self::to_run).collect()
    }

    // ========== 转换与校验 ==========

    fn validate(&self, new_task: &NewTask) -> Result<()> {
        if new_task.name.trim().is_empty() {
            return Err(BackupError::task("任务名称不能为空"));
        }
        if new_task.source_path.trim().is_empty() {
            return Err(BackupError::task("源路径不能为空"));
        }
        // 按路径映射转换后检查实际路径
        let resolved = self.path_mapping.resolve(&new_task.source_path);
        if !resolved.exists() {
            return Err(BackupError::task(format!(
                "源路径不存在: {}",
                resolved.display()
            )));
        }
        if new_task.destinations.is_empty() {
            return Err(BackupError::task("任务至少需要一个远程目的地"));
        }
        if new_task.retention_count < 1 {
            return Err(BackupError::task("保留数量必须大于等于 1"));
        }
        if let Some(password) = &new_task.encryption_password {
            if password.is_empty() {
                return Err(BackupError::task("加密口令不能为空"));
            }
        }
        Ok(())
    }

    fn to_fields(new_task: &NewTask) -> TaskFields {
        TaskFields {
            name: new_task.name.clone(),
            description: new_task.description.clone(),
            source_path: new_task.source_path.clone(),
            cron_expression: new_task.cron_expression.clone(),
            compression_enabled: new_task.compression != CompressionMode::None,
            compression_type: new_task.compression.as_str().to_string(),
            encryption_enabled: new_task.encryption_password.is_some(),
            // 口令以 base64 形式入库，只做混淆不做保护
            encryption_password: new_task
                .encryption_password
                .as_ref()
                .map(|p| BASE64.encode(p.as_bytes())),
            retention_count: new_task.retention_count,
            is_active: new_task.is_active,
        }
    }

    async fn hydrate(&self, record: TaskRecord) -> Result<BackupTask> {
        let destinations = self
            .db
            .get_task_destinations(record.id)
            .await?
            .into_iter()
            .map(|d| DestinationBinding::new(d.profile, d.remote_path))
            .collect();

        let compression = if record.compression_enabled {
            CompressionMode::parse(&record.compression_type)?
        } else {
            CompressionMode::None
        };

        let encryption_password = if record.encryption_enabled {
            match record.encryption_password {
                Some(encoded) => {
                    let bytes = BASE64
                        .decode(encoded.as_bytes())
                        .map_err(|e| BackupError::task(format!("加密口令解码失败: {e}")))?;
                    Some(String::from_utf8(bytes).map_err(|e| {
                        BackupError::task(format!("加密口令不是合法的 UTF-8: {e}"))
                    })?)
                }
                None => {
                    return Err(BackupError::task(format!(
                        "任务 {} 启用了加密但没有口令",
                        record.name
                    )));
                }
            }
        } else {
            None
        };

        Ok(BackupTask {
            id: record.id,
            name: record.name,
            description: record.description,
            source_path: record.source_path,
            cron_expression: record.cron_expression,
            compression,
            encryption_password,
            retention_count: record.retention_count,
            is_active: record.is_active,
            destinations,
            last_run_at: record.last_run_at,
            next_run_at: record.next_run_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    fn to_run(record: RunRecord) -> Result<BackupRun> {
        Ok(BackupRun {
            id: record.id,
            task_id: record.task_id,
            profile: record.profile,
            remote_path: record.remote_path,
            status: RunStatus::parse(&record.status)?,
            start_time: record.start_time,
            end_time: record.end_time,
            original_size: record.original_size,
            compressed_size: record.compressed_size,
            final_size: record.final_size,
            error_message: record.error_message,
        })
    }
}
