use crate::Result;
use chrono::{DateTime, Utc};
use duckdb::{Connection, Row, params};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::messages::{DbMessage, TaskFields};
use super::models::{RunRecord, SchedulerJobRecord, TaskDestinationRecord, TaskRecord};

/// DuckDB Actor - 确保单线程访问DuckDB
pub struct DuckDbActor {
    connection: Connection,
}

impl DuckDbActor {
    /// 创建新的DuckDB Actor
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let connection = Connection::open(db_path)?;
        Ok(Self { connection })
    }

    /// 创建内存DuckDB Actor
    pub fn new_memory() -> Result<Self> {
        let connection = Connection::open_in_memory()?;
        Ok(Self { connection })
    }

    /// 运行Actor消息循环
    pub async fn run(mut self, mut receiver: mpsc::Receiver<DbMessage>) {
        info!("DuckDB Actor 已启动");

        while let Some(message) = receiver.recv().await {
            self.handle_message(message);
        }

        info!("DuckDB Actor 已关闭");
    }

    /// 处理数据库消息
    fn handle_message(&mut self, message: DbMessage) {
        match message {
            DbMessage::InitTables { respond_to } => {
                let result = self.init_tables();
                let _ = respond_to.send(result);
            }
            DbMessage::CreateTask {
                fields,
                destinations,
                respond_to,
            } => {
                let result = self.create_task(&fields, &destinations);
                let _ = respond_to.send(result);
            }
            DbMessage::UpdateTask {
                task_id,
                fields,
                destinations,
                respond_to,
            } => {
                let result = self.update_task(task_id, &fields, &destinations);
                let _ = respond_to.send(result);
            }
            DbMessage::DeleteTask {
                task_id,
                respond_to,
            } => {
                let result = self.delete_task(task_id);
                let _ = respond_to.send(result);
            }
            DbMessage::GetTask {
                task_id,
                respond_to,
            } => {
                let result = self.get_task(task_id);
                let _ = respond_to.send(result);
            }
            DbMessage::GetTaskByName { name, respond_to } => {
                let result = self.get_task_by_name(&name);
                let _ = respond_to.send(result);
            }
            DbMessage::ListTasks {
                active_only,
                respond_to,
            } => {
                let result = self.list_tasks(active_only);
                let _ = respond_to.send(result);
            }
            DbMessage::GetTaskDestinations {
                task_id,
                respond_to,
            } => {
                let result = self.get_task_destinations(task_id);
                let _ = respond_to.send(result);
            }
            DbMessage::SetTaskActive {
                task_id,
                is_active,
                respond_to,
            } => {
                let result = self.set_task_active(task_id, is_active);
                let _ = respond_to.send(result);
            }
            DbMessage::SetTaskLastRun {
                task_id,
                last_run_at,
                respond_to,
            } => {
                let result = self.set_task_last_run(task_id, last_run_at);
                let _ = respond_to.send(result);
            }
            DbMessage::SetTaskNextRun {
                task_id,
                next_run_at,
                respond_to,
            } => {
                let result = self.set_task_next_run(task_id, next_run_at);
                let _ = respond_to.send(result);
            }
            DbMessage::CreateRun {
                task_id,
                profile,
                remote_path,
                respond_to,
            } => {
                let result = self.create_run(task_id, &profile, &remote_path);
                let _ = respond_to.send(result);
            }
            DbMessage::RecordRunSizes {
                run_id,
                original_size,
                compressed_size,
                final_size,
                respond_to,
            } => {
                let result = self.record_run_sizes(run_id, original_size, compressed_size, final_size);
                let _ = respond_to.send(result);
            }
            DbMessage::FinishRun {
                run_id,
                status,
                error_message,
                respond_to,
            } => {
                let result = self.finish_run(run_id, &status, error_message.as_deref());
                let _ = respond_to.send(result);
            }
            DbMessage::FindRunningRun {
                task_id,
                respond_to,
            } => {
                let result = self.find_running_run(task_id);
                let _ = respond_to.send(result);
            }
            DbMessage::FailRunningRuns {
                task_id,
                error_message,
                respond_to,
            } => {
                let result = self.fail_running_runs(task_id, &error_message);
                let _ = respond_to.send(result);
            }
            DbMessage::MarkStaleRunsFailed {
                cutoff,
                error_message,
                respond_to,
            } => {
                let result = self.mark_stale_runs_failed(cutoff, &error_message);
                let _ = respond_to.send(result);
            }
            DbMessage::ListRuns {
                task_id,
                limit,
                respond_to,
            } => {
                let result = self.list_runs(task_id, limit);
                let _ = respond_to.send(result);
            }
            DbMessage::UpsertSchedulerJob {
                task_id,
                cron_expression,
                next_fire_at,
                respond_to,
            } => {
                let result = self.upsert_scheduler_job(task_id, &cron_expression, next_fire_at);
                let _ = respond_to.send(result);
            }
            DbMessage::DeleteSchedulerJob {
                task_id,
                respond_to,
            } => {
                let result = self.delete_scheduler_job(task_id);
                let _ = respond_to.send(result);
            }
            DbMessage::ListSchedulerJobs { respond_to } => {
                let result = self.list_scheduler_jobs();
                let _ = respond_to.send(result);
            }
            DbMessage::DueSchedulerJobs { now, respond_to } => {
                let result = self.due_scheduler_jobs(now);
                let _ = respond_to.send(result);
            }
            DbMessage::SetSchedulerJobNextFire {
                task_id,
                next_fire_at,
                respond_to,
            } => {
                let result = self.set_scheduler_job_next_fire(task_id, next_fire_at);
                let _ = respond_to.send(result);
            }
        }
    }

    /// 初始化数据库表
    fn init_tables(&mut self) -> Result<()> {
        debug!("正在初始化DuckDB表...");

        // 读取并执行SQL初始化脚本
        let sql_content = include_str!("../../migrations/init_duckdb.sql");

        // 按分号分割SQL语句并执行
        for statement in sql_content.split(';').filter(|s| !s.trim().is_empty()) {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                self.connection.execute(trimmed, [])?;
            }
        }

        info!("DuckDB表初始化完成");
        Ok(())
    }

    const TASK_COLUMNS: &'static str = "id, name, description, source_path, cron_expression, \
         compression_enabled, compression_type, encryption_enabled, encryption_password, \
         retention_count, is_active, last_run_at, next_run_at, created_at, updated_at";

    fn row_to_task(row: &Row<'_>) -> duckdb::Result<TaskRecord> {
        Ok(TaskRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            source_path: row.get(3)?,
            cron_expression: row.get(4)?,
            compression_enabled: row.get(5)?,
            compression_type: row.get(6)?,
            encryption_enabled: row.get(7)?,
            encryption_password: row.get(8)?,
            retention_count: row.get(9)?,
            is_active: row.get(10)?,
            last_run_at: row.get(11)?,
            next_run_at: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    fn row_to_run(row: &Row<'_>) -> duckdb::Result<RunRecord> {
        Ok(RunRecord {
            id: row.get(0)?,
            task_id: row.get(1)?,
            profile: row.get(2)?,
            remote_path: row.get(3)?,
            status: row.get(4)?,
            start_time: row.get(5)?,
            end_time: row.get(6)?,
            original_size: row.get(7)?,
            compressed_size: row.get(8)?,
            final_size: row.get(9)?,
            error_message: row.get(10)?,
        })
    }

    /// 创建备份任务及目的地绑定
    fn create_task(&mut self, fields: &TaskFields, destinations: &[(String, String)]) -> Result<i64> {
        self.connection.execute(
            "INSERT INTO backup_tasks (name, description, source_path, cron_expression, \
             compression_enabled, compression_type, encryption_enabled, encryption_password, \
             retention_count, is_active) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                fields.name,
                fields.description,
                fields.source_path,
                fields.cron_expression,
                fields.compression_enabled,
                fields.compression_type,
                fields.encryption_enabled,
                fields.encryption_password,
                fields.retention_count,
                fields.is_active,
            ],
        )?;

        // 获取最后插入的ID
        let id: i64 = self
            .connection
            .query_row("SELECT currval('backup_task_id_seq')", [], |row| row.get(0))?;

        self.replace_destinations(id, destinations)?;

        Ok(id)
    }

    /// 更新备份任务，目的地绑定整体替换
    fn update_task(
        &mut self,
        task_id: i64,
        fields: &TaskFields,
        destinations: &[(String, String)],
    ) -> Result<()> {
        self.connection.execute(
            "UPDATE backup_tasks SET name = ?, description = ?, source_path = ?, \
             cron_expression = ?, compression_enabled = ?, compression_type = ?, \
             encryption_enabled = ?, encryption_password = ?, retention_count = ?, \
             is_active = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            params![
                fields.name,
                fields.description,
                fields.source_path,
                fields.cron_expression,
                fields.compression_enabled,
                fields.compression_type,
                fields.encryption_enabled,
                fields.encryption_password,
                fields.retention_count,
                fields.is_active,
                task_id,
            ],
        )?;

        self.replace_destinations(task_id, destinations)?;

        Ok(())
    }

    fn replace_destinations(&mut self, task_id: i64, destinations: &[(String, String)]) -> Result<()> {
        self.connection.execute(
            "DELETE FROM task_destinations WHERE task_id = ?",
            params![task_id],
        )?;

        for (position, (profile, remote_path)) in destinations.iter().enumerate() {
            self.connection.execute(
                "INSERT INTO task_destinations (task_id, position, profile, remote_path) \
                 VALUES (?, ?, ?, ?)",
                params![task_id, position as i32, profile, remote_path],
            )?;
        }

        Ok(())
    }

    /// 删除任务及其绑定、运行日志和触发器
    fn delete_task(&mut self, task_id: i64) -> Result<()> {
        self.connection.execute(
            "DELETE FROM task_destinations WHERE task_id = ?",
            params![task_id],
        )?;
        self.connection.execute(
            "DELETE FROM backup_runs WHERE task_id = ?",
            params![task_id],
        )?;
        self.connection.execute(
            "DELETE FROM scheduler_jobs WHERE task_id = ?",
            params![task_id],
        )?;
        self.connection.execute(
            "DELETE FROM backup_tasks WHERE id = ?",
            params![task_id],
        )?;
        Ok(())
    }

    fn get_task(&mut self, task_id: i64) -> Result<Option<TaskRecord>> {
        let sql = format!(
            "SELECT {} FROM backup_tasks WHERE id = ?",
            Self::TASK_COLUMNS
        );
        let mut stmt = self.connection.prepare(&sql)?;
        let mut rows = stmt.query(params![task_id])?;

        if let Some(row) = rows.next()? {
            Ok(Some(Self::row_to_task(row)?))
        } else {
            Ok(None)
        }
    }

    fn get_task_by_name(&mut self, name: &str) -> Result<Option<TaskRecord>> {
        let sql = format!(
            "SELECT {} FROM backup_tasks WHERE name = ?",
            Self::TASK_COLUMNS
        );
        let mut stmt = self.connection.prepare(&sql)?;
        let mut rows = stmt.query(params![name])?;

        if let Some(row) = rows.next()? {
            Ok(Some(Self::row_to_task(row)?))
        } else {
            Ok(None)
        }
    }

    fn list_tasks(&mut self, active_only: bool) -> Result<Vec<TaskRecord>> {
        let sql = if active_only {
            format!(
                "SELECT {} FROM backup_tasks WHERE is_active ORDER BY id",
                Self::TASK_COLUMNS
            )
        } else {
            format!("SELECT {} FROM backup_tasks ORDER BY id", Self::TASK_COLUMNS)
        };

        let mut stmt = self.connection.prepare(&sql)?;
        let task_iter = stmt.query_map([], |row| Self::row_to_task(row))?;

        let mut tasks = Vec::new();
        for task in task_iter {
            tasks.push(task?);
        }

        Ok(tasks)
    }

    fn get_task_destinations(&mut self, task_id: i64) -> Result<Vec<TaskDestinationRecord>> {
        let mut stmt = self.connection.prepare(
            "SELECT task_id, position, profile, remote_path FROM task_destinations \
             WHERE task_id = ? ORDER BY position",
        )?;

        let dest_iter = stmt.query_map(params![task_id], |row| {
            Ok(TaskDestinationRecord {
                task_id: row.get(0)?,
                position: row.get(1)?,
                profile: row.get(2)?,
                remote_path: row.get(3)?,
            })
        })?;

        let mut destinations = Vec::new();
        for dest in dest_iter {
            destinations.push(dest?);
        }

        Ok(destinations)
    }

    fn set_task_active(&mut self, task_id: i64, is_active: bool) -> Result<()> {
        self.connection.execute(
            "UPDATE backup_tasks SET is_active = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            params![is_active, task_id],
        )?;
        Ok(())
    }

    fn set_task_last_run(&mut self, task_id: i64, last_run_at: DateTime<Utc>) -> Result<()> {
        self.connection.execute(
            "UPDATE backup_tasks SET last_run_at = ? WHERE id = ?",
            params![last_run_at, task_id],
        )?;
        Ok(())
    }

    fn set_task_next_run(&mut self, task_id: i64, next_run_at: Option<DateTime<Utc>>) -> Result<()> {
        self.connection.execute(
            "UPDATE backup_tasks SET next_run_at = ? WHERE id = ?",
            params![next_run_at, task_id],
        )?;
        Ok(())
    }

    /// 创建运行日志，状态为 running，开始时间取当前时间
    fn create_run(&mut self, task_id: i64, profile: &str, remote_path: &str) -> Result<i64> {
        self.connection.execute(
            "INSERT INTO backup_runs (task_id, profile, remote_path, status, start_time) \
             VALUES (?, ?, ?, 'running', ?)",
            params![task_id, profile, remote_path, Utc::now()],
        )?;

        let id: i64 = self
            .connection
            .query_row("SELECT currval('backup_run_id_seq')", [], |row| row.get(0))?;

        Ok(id)
    }

    fn record_run_sizes(
        &mut self,
        run_id: i64,
        original_size: Option<i64>,
        compressed_size: Option<i64>,
        final_size: Option<i64>,
    ) -> Result<()> {
        self.connection.execute(
            "UPDATE backup_runs SET original_size = COALESCE(?, original_size), \
             compressed_size = COALESCE(?, compressed_size), \
             final_size = COALESCE(?, final_size) WHERE id = ?",
            params![original_size, compressed_size, final_size, run_id],
        )?;
        Ok(())
    }

    fn finish_run(&mut self, run_id: i64, status: &str, error_message: Option<&str>) -> Result<()> {
        self.connection.execute(
            "UPDATE backup_runs SET status = ?, end_time = ?, error_message = ? WHERE id = ?",
            params![status, Utc::now(), error_message, run_id],
        )?;
        Ok(())
    }

    fn find_running_run(&mut self, task_id: i64) -> Result<Option<RunRecord>> {
        let mut stmt = self.connection.prepare(
            "SELECT id, task_id, profile, remote_path, status, start_time, end_time, \
             original_size, compressed_size, final_size, error_message \
             FROM backup_runs WHERE task_id = ? AND status = 'running' LIMIT 1",
        )?;
        let mut rows = stmt.query(params![task_id])?;

        if let Some(row) = rows.next()? {
            Ok(Some(Self::row_to_run(row)?))
        } else {
            Ok(None)
        }
    }

    fn fail_running_runs(&mut self, task_id: i64, error_message: &str) -> Result<u64> {
        let updated = self.connection.execute(
            "UPDATE backup_runs SET status = 'failed', end_time = ?, error_message = ? \
             WHERE task_id = ? AND status = 'running'",
            params![Utc::now(), error_message, task_id],
        )?;
        Ok(updated as u64)
    }

    fn mark_stale_runs_failed(&mut self, cutoff: DateTime<Utc>, error_message: &str) -> Result<u64> {
        let updated = self.connection.execute(
            "UPDATE backup_runs SET status = 'failed', end_time = ?, error_message = ? \
             WHERE status = 'running' AND start_time < ?",
            params![Utc::now(), error_message, cutoff],
        )?;
        Ok(updated as u64)
    }

    fn list_runs(&mut self, task_id: Option<i64>, limit: i64) -> Result<Vec<RunRecord>> {
        let columns = "id, task_id, profile, remote_path, status, start_time, end_time, \
             original_size, compressed_size, final_size, error_message";

        let mut runs = Vec::new();
        if let Some(task_id) = task_id {
            let sql = format!(
                "SELECT {columns} FROM backup_runs WHERE task_id = ? \
                 ORDER BY start_time DESC LIMIT ?"
            );
            let mut stmt = self.connection.prepare(&sql)?;
            let run_iter = stmt.query_map(params![task_id, limit], |row| Self::row_to_run(row))?;
            for run in run_iter {
                runs.push(run?);
            }
        } else {
            let sql = format!(
                "SELECT {columns} FROM backup_runs ORDER BY start_time DESC LIMIT ?"
            );
            let mut stmt = self.connection.prepare(&sql)?;
            let run_iter = stmt.query_map(params![limit], |row| Self::row_to_run(row))?;
            for run in run_iter {
                runs.push(run?);
            }
        }

        Ok(runs)
    }

    fn upsert_scheduler_job(
        &mut self,
        task_id: i64,
        cron_expression: &str,
        next_fire_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        // 先尝试更新，未命中时插入
        let updated = self.connection.execute(
            "UPDATE scheduler_jobs SET cron_expression = ?, next_fire_at = ? WHERE task_id = ?",
            params![cron_expression, next_fire_at, task_id],
        )?;

        if updated == 0 {
            self.connection.execute(
                "INSERT INTO scheduler_jobs (task_id, cron_expression, next_fire_at) \
                 VALUES (?, ?, ?)",
                params![task_id, cron_expression, next_fire_at],
            )?;
        }
        Ok(())
    }

    fn delete_scheduler_job(&mut self, task_id: i64) -> Result<()> {
        self.connection.execute(
            "DELETE FROM scheduler_jobs WHERE task_id = ?",
            params![task_id],
        )?;
        Ok(())
    }

    fn list_scheduler_jobs(&mut self) -> Result<Vec<SchedulerJobRecord>> {
        let mut stmt = self.connection.prepare(
            "SELECT task_id, cron_expression, next_fire_at FROM scheduler_jobs ORDER BY task_id",
        )?;

        let job_iter = stmt.query_map([], |row| {
            Ok(SchedulerJobRecord {
                task_id: row.get(0)?,
                cron_expression: row.get(1)?,
                next_fire_at: row.get(2)?,
            })
        })?;

        let mut jobs = Vec::new();
        for job in job_iter {
            jobs.push(job?);
        }

        Ok(jobs)
    }

    fn due_scheduler_jobs(&mut self, now: DateTime<Utc>) -> Result<Vec<SchedulerJobRecord>> {
        let mut stmt = self.connection.prepare(
            "SELECT task_id, cron_expression, next_fire_at FROM scheduler_jobs \
             WHERE next_fire_at IS NOT NULL AND next_fire_at <= ? ORDER BY next_fire_at",
        )?;

        let job_iter = stmt.query_map(params![now], |row| {
            Ok(SchedulerJobRecord {
                task_id: row.get(0)?,
                cron_expression: row.get(1)?,
                next_fire_at: row.get(2)?,
            })
        })?;

        let mut jobs = Vec::new();
        for job in job_iter {
            jobs.push(job?);
        }

        Ok(jobs)
    }

    fn set_scheduler_job_next_fire(
        &mut self,
        task_id: i64,
        next_fire_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.connection.execute(
            "UPDATE scheduler_jobs SET next_fire_at = ? WHERE task_id = ?",
            params![next_fire_at, task_id],
        )?;
        Ok(())
    }
}
