use rbackup_core::error::{BackupError, Result};
use tracing::info;

use crate::app::CliApp;

/// 手动触发一次备份并等待完成
pub async fn run_backup(app: &CliApp, task_name: &str) -> Result<()> {
    let task = app
        .store
        .get_task_by_name(task_name)
        .await?
        .ok_or_else(|| BackupError::task(format!("任务不存在: {task_name}")))?;

    info!("🚀 开始备份任务: {task_name}");
    app.executor.run_task_and_wait(task.id).await?;
    info!("✅ 备份任务完成: {task_name}");
    Ok(())
}

/// 显示运行历史
pub async fn run_history(app: &CliApp, task_name: Option<String>, limit: i64) -> Result<()> {
    let task_id = match &task_name {
        Some(name) => {
            let task = app
                .store
                .get_task_by_name(name)
                .await?
                .ok_or_else(|| BackupError::task(format!("任务不存在: {name}")))?;
            Some(task.id)
        }
        None => None,
    };

    let runs = app.store.list_runs(task_id, limit).await?;

    if runs.is_empty() {
        info!("暂无运行记录");
        return Ok(());
    }

    info!("📜 运行历史 ({} 条):", runs.len());
    for run in &runs {
        let size = run
            .final_size
            .map(format_size)
            .unwrap_or_else(|| "-".to_string());
        info!(
            "   [{}] task={} {} -> {}:{} 大小: {} 开始: {}",
            run.id, run.task_id, run.status, run.profile, run.remote_path, size, run.start_time
        );
        if let Some(message) = &run.error_message {
            info!("        错误: {message}");
        }
    }
    Ok(())
}

fn format_size(bytes: i64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }
}
