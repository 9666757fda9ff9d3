use crate::{BackupError, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use tokio::sync::{mpsc, oneshot};

use super::actor::DuckDbActor;
use super::messages::{DbMessage, TaskFields};
use super::models::{RunRecord, SchedulerJobRecord, TaskDestinationRecord, TaskRecord};

/// DuckDB数据库管理器
#[derive(Debug, Clone)]
pub struct DuckDbManager {
    sender: mpsc::Sender<DbMessage>,
}

impl DuckDbManager {
    /// 创建新的DuckDB管理器
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        // 确保数据库文件的父目录存在
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let (sender, receiver) = mpsc::channel(100);

        // 启动DuckDB Actor
        let actor = DuckDbActor::new(db_path)?;
        tokio::spawn(actor.run(receiver));

        let manager = Self { sender };

        // 初始化数据库表
        manager.init_tables().await?;

        Ok(manager)
    }

    /// 创建内存数据库管理器
    pub async fn new_memory() -> Result<Self> {
        let (sender, receiver) = mpsc::channel(100);

        // 启动DuckDB Actor（内存模式）
        let actor = DuckDbActor::new_memory()?;
        tokio::spawn(actor.run(receiver));

        let manager = Self { sender };

        // 初始化数据库表
        manager.init_tables().await?;

        Ok(manager)
    }

    /// 发送消息并等待响应
    async fn request<T>(
        &self,
        message: DbMessage,
        receiver: oneshot::Receiver<Result<T>>,
    ) -> Result<T> {
        self.sender
            .send(message)
            .await
            .map_err(|_| BackupError::custom("数据库Actor已关闭"))?;

        receiver
            .await
            .map_err(|_| BackupError::custom("等待数据库响应超时"))?
    }

    /// 初始化数据库表
    async fn init_tables(&self) -> Result<()> {
        let (respond_to, receiver) = oneshot::channel();
        self.request(DbMessage::InitTables { respond_to }, receiver)
            .await
    }

    // ========== 备份任务管理 ==========

    /// 创建备份任务，返回新任务 ID
    pub async fn create_task(
        &self,
        fields: TaskFields,
        destinations: Vec<(String, String)>,
    ) -> Result<i64> {
        let (respond_to, receiver) = oneshot::channel();
        self.request(
            DbMessage::CreateTask {
                fields,
                destinations,
                respond_to,
            },
            receiver,
        )
        .await
    }

    /// 更新备份任务
    pub async fn update_task(
        &self,
        task_id: i64,
        fields: TaskFields,
        destinations: Vec<(String, String)>,
    ) -> Result<()> {
        let (respond_to, receiver) = oneshot::channel();
        self.request(
            DbMessage::UpdateTask {
                task_id,
                fields,
                destinations,
                respond_to,
            },
            receiver,
        )
        .await
    }

    /// 删除备份任务
    pub async fn delete_task(&self, task_id: i64) -> Result<()> {
        let (respond_to, receiver) = oneshot::channel();
        self.request(DbMessage::DeleteTask { task_id, respond_to }, receiver)
            .await
    }

    /// 根据 ID 获取任务
    pub async fn get_task(&self, task_id: i64) -> Result<Option<TaskRecord>> {
        let (respond_to, receiver) = oneshot::channel();
        self.request(DbMessage::GetTask { task_id, respond_to }, receiver)
            .await
    }

    /// 根据名称获取任务
    pub async fn get_task_by_name(&self, name: &str) -> Result<Option<TaskRecord>> {
        let (respond_to, receiver) = oneshot::channel();
        self.request(
            DbMessage::GetTaskByName {
                name: name.to_string(),
                respond_to,
            },
            receiver,
        )
        .await
    }

    /// 获取任务列表
    pub async fn list_tasks(&self, active_only: bool) -> Result<Vec<TaskRecord>> {
        let (respond_to, receiver) = oneshot::channel();
        self.request(
            DbMessage::ListTasks {
                active_only,
                respond_to,
            },
            receiver,
        )
        .await
    }

    /// 获取任务的目的地绑定
    pub async fn get_task_destinations(&self, task_id: i64) -> Result<Vec<TaskDestinationRecord>> {
        let (respond_to, receiver) = oneshot::channel();
        self.request(
            DbMessage::GetTaskDestinations { task_id, respond_to },
            receiver,
        )
        .await
    }

    /// 设置任务启用状态
    pub async fn set_task_active(&self, task_id: i64, is_active: bool) -> Result<()> {
        let (respond_to, receiver) = oneshot::channel();
        self.request(
            DbMessage::SetTaskActive {
                task_id,
                is_active,
                respond_to,
            },
            receiver,
        )
        .await
    }

    /// 更新任务最后运行时间
    pub async fn set_task_last_run(&self, task_id: i64, last_run_at: DateTime<Utc>) -> Result<()> {
        let (respond_to, receiver) = oneshot::channel();
        self.request(
            DbMessage::SetTaskLastRun {
                task_id,
                last_run_at,
                respond_to,
            },
            receiver,
        )
        .await
    }

    /// 更新任务下次运行时间
    pub async fn set_task_next_run(
        &self,
        task_id: i64,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let (respond_to, receiver) = oneshot::channel();
        self.request(
            DbMessage::SetTaskNextRun {
                task_id,
                next_run_at,
                respond_to,
            },
            receiver,
        )
        .await
    }

    // ========== 运行日志管理 ==========

    /// 创建运行日志，返回日志 ID
    pub async fn create_run(
        &self,
        task_id: i64,
        profile: &str,
        remote_path: &str,
    ) -> Result<i64> {
        let (respond_to, receiver) = oneshot::channel();
        self.request(
            DbMessage::CreateRun {
                task_id,
                profile: profile.to_string(),
                remote_path: remote_path.to_string(),
                respond_to,
            },
            receiver,
        )
        .await
    }

    /// 记录运行日志中的文件大小，None 字段保持原值
    pub async fn record_run_sizes(
        &self,
        run_id: i64,
        original_size: Option<i64>,
        compressed_size: Option<i64>,
        final_size: Option<i64>,
    ) -> Result<()> {
        let (respond_to, receiver) = oneshot::channel();
        self.request(
            DbMessage::RecordRunSizes {
                run_id,
                original_size,
                compressed_size,
                final_size,
                respond_to,
            },
            receiver,
        )
        .await
    }

    /// 将运行日志置为终态
    pub async fn finish_run(
        &self,
        run_id: i64,
        status: &str,
        error_message: Option<String>,
    ) -> Result<()> {
        let (respond_to, receiver) = oneshot::channel();
        self.request(
            DbMessage::FinishRun {
                run_id,
                status: status.to_string(),
                error_message,
                respond_to,
            },
            receiver,
        )
        .await
    }

    /// 查询任务当前 running 状态的日志
    pub async fn find_running_run(&self, task_id: i64) -> Result<Option<RunRecord>> {
        let (respond_to, receiver) = oneshot::channel();
        self.request(DbMessage::FindRunningRun { task_id, respond_to }, receiver)
            .await
    }

    /// 将任务所有 running 日志标记为失败，返回影响行数
    pub async fn fail_running_runs(&self, task_id: i64, error_message: &str) -> Result<u64> {
        let (respond_to, receiver) = oneshot::channel();
        self.request(
            DbMessage::FailRunningRuns {
                task_id,
                error_message: error_message.to_string(),
                respond_to,
            },
            receiver,
        )
        .await
    }

    /// 将开始时间早于 cutoff 的 running 日志标记为失败，返回影响行数
    pub async fn mark_stale_runs_failed(
        &self,
        cutoff: DateTime<Utc>,
        error_message: &str,
    ) -> Result<u64> {
        let (respond_to, receiver) = oneshot::channel();
        self.request(
            DbMessage::MarkStaleRunsFailed {
                cutoff,
                error_message: error_message.to_string(),
                respond_to,
            },
            receiver,
        )
        .await
    }

    /// 查询运行日志，按开始时间倒序
    pub async fn list_runs(&self, task_id: Option<i64>, limit: i64) -> Result<Vec<RunRecord>> {
        let (respond_to, receiver) = oneshot::channel();
        self.request(
            DbMessage::ListRuns {
                task_id,
                limit,
                respond_to,
            },
            receiver,
        )
        .await
    }

    // ========== 调度器触发器管理 ==========

    /// 新增或替换触发器
    pub async fn upsert_scheduler_job(
        &self,
        task_id: i64,
        cron_expression: &str,
        next_fire_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let (respond_to, receiver) = oneshot::channel();
        self.request(
            DbMessage::UpsertSchedulerJob {
                task_id,
                cron_expression: cron_expression.to_string(),
                next_fire_at,
                respond_to,
            },
            receiver,
        )
        .await
    }

    /// 删除触发器
    pub async fn delete_scheduler_job(&self, task_id: i64) -> Result<()> {
        let (respond_to, receiver) = oneshot::channel();
        self.request(
            DbMessage::DeleteSchedulerJob { task_id, respond_to },
            receiver,
        )
        .await
    }

    /// 获取全部触发器
    pub async fn list_scheduler_jobs(&self) -> Result<Vec<SchedulerJobRecord>> {
        let (respond_to, receiver) = oneshot::channel();
        self.request(DbMessage::ListSchedulerJobs { respond_to }, receiver)
            .await
    }

    /// 获取到期触发器
    pub async fn due_scheduler_jobs(&self, now: DateTime<Utc>) -> Result<Vec<SchedulerJobRecord>> {
        let (respond_to, receiver) = oneshot::channel();
        self.request(DbMessage::DueSchedulerJobs { now, respond_to }, receiver)
            .await
    }

    /// 更新触发器的下次触发时间
    pub async fn set_scheduler_job_next_fire(
        &self,
        task_id: i64,
        next_fire_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let (respond_to, receiver) = oneshot::channel();
        self.request(
            DbMessage::SetSchedulerJobNextFire {
                task_id,
                next_fire_at,
                respond_to,
            },
            receiver,
        )
        .await
    }
}
