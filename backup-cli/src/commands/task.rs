use rbackup_core::error::{BackupError, Result};
use rbackup_core::schedule;
use rbackup_core::store::{BackupTask, CompressionMode, DestinationBinding, NewTask};
use tracing::info;

use crate::app::CliApp;

/// 解析 `profile:路径` 形式的目的地参数
fn parse_destination(spec: &str) -> Result<DestinationBinding> {
    match spec.split_once(':') {
        Some((profile, path)) if !profile.is_empty() && !path.is_empty() => {
            Ok(DestinationBinding::new(profile, path))
        }
        _ => Err(BackupError::task(format!(
            "目的地格式应为 profile:路径，例如 minio:backups/app，实际为: {spec}"
        ))),
    }
}

async fn find_task(app: &CliApp, name: &str) -> Result<BackupTask> {
    app.store
        .get_task_by_name(name)
        .await?
        .ok_or_else(|| BackupError::task(format!("任务不存在: {name}")))
}

#[allow(clippy::too_many_arguments)]
pub async fn run_task_add(
    app: &CliApp,
    name: String,
    source: String,
    destinations: Vec<String>,
    cron: String,
    compression: String,
    password: Option<String>,
    retention: i32,
    description: String,
) -> Result<()> {
    schedule::validate_cron(&cron)?;

    let destinations = destinations
        .iter()
        .map(|spec| parse_destination(spec))
        .collect::<Result<Vec<_>>>()?;

    let new_task = NewTask {
        name,
        description,
        source_path: source,
        cron_expression: cron.trim().to_string(),
        compression: CompressionMode::parse(&compression)?,
        encryption_password: password,
        retention_count: retention,
        is_active: true,
        destinations,
    };

    let task = app.store.create_task(new_task).await?;

    info!("✅ 已创建备份任务: {} (id={})", task.name, task.id);
    for dest in &task.destinations {
        info!("   目的地: {}:{}", dest.profile, dest.remote_path);
    }
    if task.cron_expression.is_empty() {
        info!("   未设置 cron 表达式，任务只能手动触发");
    } else {
        info!("   cron: {}", task.cron_expression);
    }
    Ok(())
}

/// 修改任务：从现有任务出发，只覆盖指定的字段
#[allow(clippy::too_many_arguments)]
pub async fn run_task_update(
    app: &CliApp,
    name: &str,
    source: Option<String>,
    destinations: Vec<String>,
    cron: Option<String>,
    compression: Option<String>,
    password: Option<String>,
    no_password: bool,
    retention: Option<i32>,
    description: Option<String>,
) -> Result<()> {
    let task = find_task(app, name).await?;

    let destinations = if destinations.is_empty() {
        task.destinations.clone()
    } else {
        destinations
            .iter()
            .map(|spec| parse_destination(spec))
            .collect::<Result<Vec<_>>>()?
    };

    let cron_expression = match cron {
        Some(expr) => {
            schedule::validate_cron(&expr)?;
            expr.trim().to_string()
        }
        None => task.cron_expression.clone(),
    };

    let encryption_password = if no_password {
        None
    } else {
        password.or_else(|| task.encryption_password.clone())
    };

    let new_task = NewTask {
        name: task.name.clone(),
        description: description.unwrap_or_else(|| task.description.clone()),
        source_path: source.unwrap_or_else(|| task.source_path.clone()),
        cron_expression,
        compression: match compression {
            Some(mode) => CompressionMode::parse(&mode)?,
            None => task.compression,
        },
        encryption_password,
        retention_count: retention.unwrap_or(task.retention_count),
        is_active: task.is_active,
        destinations,
    };

    let task = app.store.update_task(task.id, new_task).await?;
    info!("✅ 已更新备份任务: {} (id={})", task.name, task.id);
    Ok(())
}

pub async fn run_task_list(app: &CliApp) -> Result<()> {
    let tasks = app.store.list_tasks(false).await?;

    if tasks.is_empty() {
        info!("暂无备份任务，使用 'rbackup task add' 创建");
        return Ok(());
    }

    info!("📋 备份任务 ({} 个):", tasks.len());
    for task in &tasks {
        let state = if task.is_active { "启用" } else { "停用" };
        let cron = if task.cron_expression.is_empty() {
            "手动"
        } else {
            &task.cron_expression
        };
        info!(
            "   [{}] {} ({}) 源: {} 压缩: {} 保留: {}",
            task.id, task.name, state, task.source_path, task.compression, task.retention_count
        );
        info!(
            "        调度: {} 加密: {} 目的地: {}",
            cron,
            if task.encryption_enabled() { "是" } else { "否" },
            task.destinations
                .iter()
                .map(|d| format!("{}:{}", d.profile, d.remote_path))
                .collect::<Vec<_>>()
                .join(", ")
        );
        if let Some(last) = task.last_run_at {
            info!("        最后运行: {last}");
        }
        if let Some(next) = task.next_run_at {
            info!("        下次运行: {next}");
        }
    }
    Ok(())
}

pub async fn run_task_remove(app: &CliApp, name: &str) -> Result<()> {
    let task = find_task(app, name).await?;
    app.store.delete_task(task.id).await?;
    info!("✅ 已删除备份任务: {name}");
    Ok(())
}

pub async fn run_task_set_active(app: &CliApp, name: &str, active: bool) -> Result<()> {
    let task = find_task(app, name).await?;
    app.store.set_task_active(task.id, active).await?;
    if active {
        info!("✅ 已启用备份任务: {name}");
    } else {
        info!("✅ 已停用备份任务: {name}");
    }
    Ok(())
}
