use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 备份任务记录（数据库原始形态，状态等字段为字符串）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: i64,
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
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 任务的远程存储绑定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDestinationRecord {
    pub task_id: i64,
    pub position: i32,
    pub profile: String,
    pub remote_path: String,
}

/// 备份运行日志记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: i64,
    pub task_id: i64,
    pub profile: String,
    pub remote_path: String,
    pub status: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub original_size: Option<i64>,
    pub compressed_size: Option<i64>,
    pub final_size: Option<i64>,
    pub error_message: Option<String>,
}

/// 调度器持久化触发器记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerJobRecord {
    pub task_id: i64,
    pub cron_expression: String,
    pub next_fire_at: Option<DateTime<Utc>>,
}
