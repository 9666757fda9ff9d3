use rbackup_core::error::Result;
use rbackup_core::scheduler::BackupScheduler;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::app::CliApp;

/// 调度模式：对齐触发器后常驻运行，直到收到 Ctrl+C
pub async fn run_serve(app: &CliApp) -> Result<()> {
    // rclone 不可用时尽早失败，而不是等第一次上传
    let gateway = rbackup_core::rclone::RcloneGateway::new(
        &app.config.rclone.binary,
        &app.config.rclone.config_path,
    );
    match gateway.check_available() {
        Ok(path) => info!("rclone: {}", path.display()),
        Err(e) => warn!("⚠️ {e}，上传将在执行时失败"),
    }

    let scheduler = BackupScheduler::new(
        app.executor.clone(),
        app.timezone,
        app.config.scheduler.workers,
    );
    scheduler.reconcile().await?;

    let cancel = CancellationToken::new();
    let scheduler_cancel = cancel.clone();

    let handle = tokio::spawn(async move {
        scheduler.run(scheduler_cancel).await;
    });

    info!("🕐 调度模式已启动，按 Ctrl+C 退出");
    tokio::signal::ctrl_c().await?;

    info!("正在停止调度器...");
    cancel.cancel();
    let _ = handle.await;

    info!("已退出");
    Ok(())
}
