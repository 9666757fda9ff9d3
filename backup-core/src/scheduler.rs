//! cron 调度器
//!
//! 触发器持久化在 scheduler_jobs 表中，进程重启后通过 reconcile 与任务
//! 表对齐。调度循环周期性取出到期触发器，在并发受限的工作池上执行备份；
//! 维护循环定期把运行超过阈值的 running 日志判定为卡死并标记失败。

use chrono::{Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::constants::scheduler as sched_constants;
use crate::executor::BackupExecutor;
use crate::schedule;
use crate::store::TaskStore;
use crate::Result;

/// 卡死运行的标记消息
const STALE_RUN_MESSAGE: &str = "任务执行超时，已自动标记为失败";

/// 备份调度器
pub struct BackupScheduler {
    store: TaskStore,
    executor: Arc<BackupExecutor>,
    timezone: Tz,
    workers: Arc<Semaphore>,
}

impl BackupScheduler {
    pub fn new(executor: Arc<BackupExecutor>, timezone: Tz, workers: usize) -> Self {
        let store = executor.store().clone();
        Self {
            store,
            executor,
            timezone,
            workers: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// 启动时与任务表对齐：启用且带 cron 表达式的任务有触发器，其余没有
    pub async fn reconcile(&self) -> Result<()> {
        let tasks = self.store.list_tasks(false).await?;
        let jobs = self.store.db().list_scheduler_jobs().await?;

        for task in &tasks {
            if task.is_active && !task.cron_expression.trim().is_empty() {
                self.sync_task(task.id).await?;
            } else {
                self.remove_task(task.id).await?;
            }
        }

        // 任务已删除但触发器残留的情况
        for job in &jobs {
            if !tasks.iter().any(|t| t.id == job.task_id) {
                self.store.db().delete_scheduler_job(job.task_id).await?;
                info!("清理孤立触发器: task_id={}", job.task_id);
            }
        }

        let count = self.store.db().list_scheduler_jobs().await?.len();
        info!("调度器对齐完成，共 {count} 个触发器");
        Ok(())
    }

    /// 为单个任务建立或刷新触发器
    pub async fn sync_task(&self, task_id: i64) -> Result<()> {
        let task = self.store.require_task(task_id).await?;

        if !task.is_active || task.cron_expression.trim().is_empty() {
            return self.remove_task(task_id).await;
        }

        let next_fire =
            schedule::next_fire_time(&task.cron_expression, self.timezone, Utc::now())?;

        self.store
            .db()
            .upsert_scheduler_job(task.id, &task.cron_expression, next_fire)
            .await?;
        self.store.set_task_next_run(task.id, next_fire).await?;

        if let Some(at) = next_fire {
            info!("任务 {} 下次触发时间: {at}", task.name);
        }
        Ok(())
    }

    /// 移除任务的触发器
    pub async fn remove_task(&self, task_id: i64) -> Result<()> {
        self.store.db().delete_scheduler_job(task_id).await?;
        if self.store.get_task(task_id).await?.is_some() {
            self.store.set_task_next_run(task_id, None).await?;
        }
        Ok(())
    }

    /// 调度主循环，直到 cancel 被触发
    pub async fn run(&self, cancel: CancellationToken) {
        info!("调度器已启动");

        let mut tick = tokio::time::interval(Duration::from_secs(
            sched_constants::TICK_INTERVAL_SECS,
        ));
        let mut maintenance = tokio::time::interval(Duration::from_secs(
            sched_constants::MAINTENANCE_INTERVAL_SECS,
        ));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("调度器收到停止信号");
                    break;
                }
                _ = tick.tick() => {
                    if let Err(e) = self.fire_due().await {
                        error!("调度检查失败: {e}");
                    }
                }
                _ = maintenance.tick() => {
                    if let Err(e) = self.sweep_stale_runs().await {
                        error!("卡死运行清理失败: {e}");
                    }
                }
            }
        }

        info!("调度器已停止");
    }

    /// 取出到期触发器并执行
    ///
    /// 触发前先推进 next_fire_at，执行异常不会让触发器停摆。
    pub async fn fire_due(&self) -> Result<()> {
        let now = Utc::now();
        let due = self.store.db().due_scheduler_jobs(now).await?;

        for job in due {
            let next_fire = match schedule::next_fire_time(&job.cron_expression, self.timezone, now)
            {
                Ok(next) => next,
                Err(e) => {
                    warn!(
                        "触发器表达式失效，移除: task_id={}: {e}",
                        job.task_id
                    );
                    self.store.db().delete_scheduler_job(job.task_id).await?;
                    continue;
                }
            };

            self.store
                .db()
                .set_scheduler_job_next_fire(job.task_id, next_fire)
                .await?;
            self.store.set_task_next_run(job.task_id, next_fire).await?;

            // 工作池满时在任务内部排队等待，调度循环本身不被阻塞
            let workers = self.workers.clone();
            let executor = self.executor.clone();
            let task_id = job.task_id;
            tokio::spawn(async move {
                let Ok(_permit) = workers.acquire_owned().await else {
                    return;
                };
                match executor.run_task_and_wait(task_id).await {
                    Ok(()) => info!("定时备份完成: task_id={task_id}"),
                    Err(e) => error!("定时备份失败: task_id={task_id}: {e}"),
                }
            });
        }

        Ok(())
    }

    /// 把运行时间超过阈值的 running 日志标记为失败
    pub async fn sweep_stale_runs(&self) -> Result<()> {
        let cutoff = Utc::now() - ChronoDuration::hours(sched_constants::STALE_RUN_HOURS);
        let swept = self
            .store
            .mark_stale_runs_failed(cutoff, STALE_RUN_MESSAGE)
            .await?;

        if swept > 0 {
            warn!("已将 {swept} 条卡死的运行日志标记为失败");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathMapping;
    use crate::store::{DestinationBinding, NewTask, RunStatus};
    use crate::test_support::MockGateway;
    use std::fs;
    use tempfile::tempdir;

    async fn setup(
        dir: &std::path::Path,
        gateway: Arc<MockGateway>,
    ) -> (Arc<BackupExecutor>, BackupScheduler) {
        let store = TaskStore::open_memory().await.unwrap();
        let executor = Arc::new(BackupExecutor::new(
            store,
            gateway,
            dir.join("temp"),
            PathMapping::default(),
        ));
        let tz = schedule::parse_timezone("UTC").unwrap();
        let scheduler = BackupScheduler::new(executor.clone(), tz, 2);
        (executor, scheduler)
    }

    fn scheduled_task(dir: &std::path::Path, name: &str) -> NewTask {
        let source = dir.join(name);
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("data.txt"), b"payload").unwrap();

        let mut task = NewTask::new(name, source.to_string_lossy());
        task.cron_expression = "0 2 * * *".to_string();
        task.destinations
            .push(DestinationBinding::new("minio", format!("backups/{name}")));
        task
    }

    #[tokio::test]
    async fn test_reconcile_builds_jobs_for_active_cron_tasks() {
        let dir = tempdir().unwrap();
        let gateway = Arc::new(MockGateway::new());
        let (executor, scheduler) = setup(dir.path(), gateway).await;

        let scheduled = executor
            .store()
            .create_task(scheduled_task(dir.path(), "app"))
            .await
            .unwrap();

        // 没有 cron 表达式的任务不参与调度
        let mut manual = scheduled_task(dir.path(), "manual");
        manual.cron_expression = String::new();
        executor.store().create_task(manual).await.unwrap();

        scheduler.reconcile().await.unwrap();

        let jobs = executor.store().db().list_scheduler_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].task_id, scheduled.id);
        assert!(jobs[0].next_fire_at.unwrap() > Utc::now());

        let task = executor.store().require_task(scheduled.id).await.unwrap();
        assert_eq!(task.next_run_at, jobs[0].next_fire_at);
    }

    #[tokio::test]
    async fn test_disabled_task_loses_job() {
        let dir = tempdir().unwrap();
        let gateway = Arc::new(MockGateway::new());
        let (executor, scheduler) = setup(dir.path(), gateway).await;

        let task = executor
            .store()
            .create_task(scheduled_task(dir.path(), "app"))
            .await
            .unwrap();
        scheduler.sync_task(task.id).await.unwrap();
        assert_eq!(
            executor.store().db().list_scheduler_jobs().await.unwrap().len(),
            1
        );

        executor.store().set_task_active(task.id, false).await.unwrap();
        scheduler.sync_task(task.id).await.unwrap();

        assert!(executor.store().db().list_scheduler_jobs().await.unwrap().is_empty());
        let task = executor.store().require_task(task.id).await.unwrap();
        assert!(task.next_run_at.is_none());
    }

    #[tokio::test]
    async fn test_fire_due_runs_backup_and_advances_trigger() {
        let dir = tempdir().unwrap();
        let gateway = Arc::new(MockGateway::new());
        let (executor, scheduler) = setup(dir.path(), gateway.clone()).await;

        let task = executor
            .store()
            .create_task(scheduled_task(dir.path(), "app"))
            .await
            .unwrap();

        // 把触发时间放到过去，模拟到期
        let past = Utc::now() - ChronoDuration::minutes(5);
        executor
            .store()
            .db()
            .upsert_scheduler_job(task.id, &task.cron_expression, Some(past))
            .await
            .unwrap();

        scheduler.fire_due().await.unwrap();

        // 触发器立即推进到未来
        let jobs = executor.store().db().list_scheduler_jobs().await.unwrap();
        assert!(jobs[0].next_fire_at.unwrap() > Utc::now());

        // 等后台备份完成
        let dest = task.destinations[0].clone();
        for _ in 0..100 {
            if !gateway.file_names(&dest).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(gateway.file_names(&dest).len(), 1);
    }

    #[tokio::test]
    async fn test_fire_due_not_blocked_by_saturated_pool() {
        let dir = tempdir().unwrap();
        let gateway = Arc::new(MockGateway::new());
        gateway.set_upload_delay(Duration::from_millis(300));
        let (executor, _) = setup(dir.path(), gateway.clone()).await;
        // 单工作位，两个到期任务必然有一个要排队
        let tz = schedule::parse_timezone("UTC").unwrap();
        let scheduler = BackupScheduler::new(executor.clone(), tz, 1);

        let past = Utc::now() - ChronoDuration::minutes(5);
        let mut dests = Vec::new();
        for name in ["app", "web"] {
            let task = executor
                .store()
                .create_task(scheduled_task(dir.path(), name))
                .await
                .unwrap();
            executor
                .store()
                .db()
                .upsert_scheduler_job(task.id, &task.cron_expression, Some(past))
                .await
                .unwrap();
            dests.push(task.destinations[0].clone());
        }

        // 排队发生在工作任务内部，调度检查本身立即返回
        let started = tokio::time::Instant::now();
        scheduler.fire_due().await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(250));

        // 两个任务最终都串行跑完
        for _ in 0..100 {
            if dests.iter().all(|d| !gateway.file_names(d).is_empty()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        for dest in &dests {
            assert_eq!(gateway.file_names(dest).len(), 1);
        }
    }

    #[tokio::test]
    async fn test_stale_running_run_marked_failed() {
        let dir = tempdir().unwrap();
        let gateway = Arc::new(MockGateway::new());
        let (executor, _scheduler) = setup(dir.path(), gateway).await;

        let task = executor
            .store()
            .create_task(scheduled_task(dir.path(), "app"))
            .await
            .unwrap();
        let dest = task.destinations[0].clone();
        executor.store().create_run(task.id, &dest).await.unwrap();

        // cutoff 取未来时间，使刚创建的 running 日志满足清理条件
        let swept = executor
            .store()
            .mark_stale_runs_failed(Utc::now() + ChronoDuration::hours(1), STALE_RUN_MESSAGE)
            .await
            .unwrap();
        assert_eq!(swept, 1);

        let runs = executor.store().list_runs(Some(task.id), 10).await.unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert_eq!(runs[0].error_message.as_deref(), Some(STALE_RUN_MESSAGE));
        assert!(runs[0].end_time.is_some());
    }
}
