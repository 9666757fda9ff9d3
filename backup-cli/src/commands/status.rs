use rbackup_core::error::Result;
use rbackup_core::rclone::RcloneGateway;
use rbackup_core::store::RunStatus;
use tracing::info;

use crate::app::CliApp;

/// 显示配置和任务概况
pub async fn run_status(app: &CliApp) -> Result<()> {
    info!("🗄️ rbackup 状态");
    info!("==================");
    info!("📋 基本信息:");
    info!("   版本: v{}", env!("CARGO_PKG_VERSION"));
    info!("   数据库: {}", app.config.storage.database_path);
    info!("   临时目录: {}", app.config.storage.temp_dir);
    info!("   调度时区: {}", app.config.scheduler.timezone);
    info!("   并发上限: {}", app.config.scheduler.workers);

    let gateway = RcloneGateway::new(&app.config.rclone.binary, &app.config.rclone.config_path);
    match gateway.check_available() {
        Ok(path) => info!("   ✅ rclone: {}", path.display()),
        Err(_) => info!("   ❌ rclone: {} (未找到)", app.config.rclone.binary),
    }

    let tasks = app.store.list_tasks(false).await?;
    let active = tasks.iter().filter(|t| t.is_active).count();
    let scheduled = tasks
        .iter()
        .filter(|t| t.is_active && !t.cron_expression.is_empty())
        .count();
    info!("📦 任务: 共 {} 个，启用 {} 个，参与调度 {} 个", tasks.len(), active, scheduled);

    let recent = app.store.list_runs(None, 5).await?;
    if !recent.is_empty() {
        info!("🕓 最近运行:");
        for run in &recent {
            let mark = match run.status {
                RunStatus::Success => "✅",
                RunStatus::Failed => "❌",
                RunStatus::Running => "⏳",
            };
            info!(
                "   {} [{}] {}:{} {}",
                mark, run.id, run.profile, run.remote_path, run.start_time
            );
        }
    }

    Ok(())
}
