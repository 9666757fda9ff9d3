use chrono_tz::Tz;
use rbackup_core::config::AppConfig;
use rbackup_core::error::Result;
use rbackup_core::executor::BackupExecutor;
use rbackup_core::rclone::RcloneGateway;
use rbackup_core::store::TaskStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::cli::{Commands, TaskCommand};
use crate::commands;

#[derive(Clone)]
pub struct CliApp {
    pub config: AppConfig,
    pub store: TaskStore,
    pub executor: Arc<BackupExecutor>,
    pub timezone: Tz,
}

impl CliApp {
    /// 初始化CLI应用：加载配置、打开数据库、装配执行器
    pub async fn new(config_path: &Path) -> Result<Self> {
        let config = if config_path.exists() {
            AppConfig::load_from_file(config_path)?
        } else {
            AppConfig::find_and_load_config()?
        };

        config.ensure_dirs()?;
        let timezone = config.timezone()?;

        let store = TaskStore::open(&config.storage.database_path)
            .await?
            .with_path_mapping(config.paths.clone());

        let gateway = Arc::new(RcloneGateway::new(
            &config.rclone.binary,
            &config.rclone.config_path,
        ));

        let executor = Arc::new(BackupExecutor::new(
            store.clone(),
            gateway,
            PathBuf::from(&config.storage.temp_dir),
            config.paths.clone(),
        ));

        info!("数据库: {}", config.storage.database_path);

        Ok(Self {
            config,
            store,
            executor,
            timezone,
        })
    }

    /// 运行应用命令
    pub async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Task(task_cmd) => match task_cmd {
                TaskCommand::Add {
                    name,
                    source,
                    destinations,
                    cron,
                    compression,
                    password,
                    retention,
                    description,
                } => {
                    commands::run_task_add(
                        self,
                        name,
                        source,
                        destinations,
                        cron,
                        compression,
                        password,
                        retention,
                        description,
                    )
                    .await
                }
                TaskCommand::List => commands::run_task_list(self).await,
                TaskCommand::Update {
                    name,
                    source,
                    destinations,
                    cron,
                    compression,
                    password,
                    no_password,
                    retention,
                    description,
                } => {
                    commands::run_task_update(
                        self,
                        &name,
                        source,
                        destinations,
                        cron,
                        compression,
                        password,
                        no_password,
                        retention,
                        description,
                    )
                    .await
                }
                TaskCommand::Remove { name } => commands::run_task_remove(self, &name).await,
                TaskCommand::Enable { name } => {
                    commands::run_task_set_active(self, &name, true).await
                }
                TaskCommand::Disable { name } => {
                    commands::run_task_set_active(self, &name, false).await
                }
            },
            Commands::Run { task } => commands::run_backup(self, &task).await,
            Commands::Runs { task, limit } => commands::run_history(self, task, limit).await,
            Commands::Serve => commands::run_serve(self).await,
            Commands::Status => commands::run_status(self).await,
        }
    }
}
