use crate::Result;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use super::models::{RunRecord, SchedulerJobRecord, TaskDestinationRecord, TaskRecord};

/// 新建/更新备份任务时写入的字段
#[derive(Debug, Clone)]
pub struct TaskFields {
    pub name: String,
    pub description: String,
    pub source_path: String,
    pub cron_expression: String,
    pub compression_enabled: bool,
    pub compression_type: String,
    pub encryption_enabled: bool,
    pub encryption_password: Option<String>,
    pub retention_count: i32,
    pub is_active: bool,
}

/// DuckDB数据库操作消息
#[derive(Debug)]
pub enum DbMessage {
    /// 初始化数据库表
    InitTables {
        respond_to: oneshot::Sender<Result<()>>,
    },

    // ========== 备份任务管理 ==========
    /// 创建备份任务（含目的地绑定）
    CreateTask {
        fields: TaskFields,
        destinations: Vec<(String, String)>,
        respond_to: oneshot::Sender<Result<i64>>,
    },
    /// 更新备份任务（整体替换字段与目的地绑定）
    UpdateTask {
        task_id: i64,
        fields: TaskFields,
        destinations: Vec<(String, String)>,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 删除备份任务（级联删除绑定、运行日志和触发器）
    DeleteTask {
        task_id: i64,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 根据 ID 获取任务
    GetTask {
        task_id: i64,
        respond_to: oneshot::Sender<Result<Option<TaskRecord>>>,
    },
    /// 根据名称获取任务
    GetTaskByName {
        name: String,
        respond_to: oneshot::Sender<Result<Option<TaskRecord>>>,
    },
    /// 获取任务列表
    ListTasks {
        active_only: bool,
        respond_to: oneshot::Sender<Result<Vec<TaskRecord>>>,
    },
    /// 获取任务的目的地绑定（按 position 排序）
    GetTaskDestinations {
        task_id: i64,
        respond_to: oneshot::Sender<Result<Vec<TaskDestinationRecord>>>,
    },
    /// 设置任务启用状态
    SetTaskActive {
        task_id: i64,
        is_active: bool,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 更新任务最后运行时间
    SetTaskLastRun {
        task_id: i64,
        last_run_at: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 更新任务下次运行时间
    SetTaskNextRun {
        task_id: i64,
        next_run_at: Option<DateTime<Utc>>,
        respond_to: oneshot::Sender<Result<()>>,
    },

    // ========== 运行日志管理 ==========
    /// 创建运行日志（状态为 running）
    CreateRun {
        task_id: i64,
        profile: String,
        remote_path: String,
        respond_to: oneshot::Sender<Result<i64>>,
    },
    /// 记录运行日志中的文件大小（None 字段保持不变）
    RecordRunSizes {
        run_id: i64,
        original_size: Option<i64>,
        compressed_size: Option<i64>,
        final_size: Option<i64>,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 将运行日志置为终态
    FinishRun {
        run_id: i64,
        status: String,
        error_message: Option<String>,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 查询任务当前 running 状态的日志
    FindRunningRun {
        task_id: i64,
        respond_to: oneshot::Sender<Result<Option<RunRecord>>>,
    },
    /// 将任务所有 running 日志标记为失败（进程内安全网）
    FailRunningRuns {
        task_id: i64,
        error_message: String,
        respond_to: oneshot::Sender<Result<u64>>,
    },
    /// 将开始时间早于 cutoff 的 running 日志标记为失败（卡死清理）
    MarkStaleRunsFailed {
        cutoff: DateTime<Utc>,
        error_message: String,
        respond_to: oneshot::Sender<Result<u64>>,
    },
    /// 查询运行日志
    ListRuns {
        task_id: Option<i64>,
        limit: i64,
        respond_to: oneshot::Sender<Result<Vec<RunRecord>>>,
    },

    // ========== 调度器触发器管理 ==========
    /// 新增或替换触发器
    UpsertSchedulerJob {
        task_id: i64,
        cron_expression: String,
        next_fire_at: Option<DateTime<Utc>>,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 删除触发器
    DeleteSchedulerJob {
        task_id: i64,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 获取全部触发器
    ListSchedulerJobs {
        respond_to: oneshot::Sender<Result<Vec<SchedulerJobRecord>>>,
    },
    /// 获取到期触发器（next_fire_at <= now）
    DueSchedulerJobs {
        now: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<Vec<SchedulerJobRecord>>>,
    },
    /// 更新触发器的下次触发时间
    SetSchedulerJobNextFire {
        task_id: i64,
        next_fire_at: Option<DateTime<Utc>>,
        respond_to: oneshot::Sender<Result<()>>,
    },
}
