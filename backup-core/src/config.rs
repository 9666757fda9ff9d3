use crate::constants::{cron, scheduler, storage, transfer};
use crate::error::{BackupError, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 应用配置结构
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub rclone: RcloneConfig,
    pub scheduler: SchedulerConfig,
    pub paths: PathMapping,
}

/// 本地存储相关配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    /// 临时工作目录，所有并发运行共享
    pub temp_dir: String,
    /// DuckDB 数据库文件路径
    pub database_path: String,
}

/// rclone 相关配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RcloneConfig {
    /// rclone 可执行文件（名称或绝对路径）
    pub binary: String,
    /// rclone 配置文件路径
    pub config_path: String,
}

/// 调度相关配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// 调度时区名称，例如 "Asia/Shanghai"
    pub timezone: String,
    /// 不同任务之间的并发执行上限
    pub workers: usize,
}

/// 容器化部署时的宿主机路径映射
///
/// container_prefix 为空时不做任何转换。
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct PathMapping {
    pub container_prefix: String,
    pub host_prefix: String,
}

impl PathMapping {
    /// 把任务里保存的路径映射为实际可访问的路径
    pub fn resolve(&self, source_path: &str) -> PathBuf {
        if !self.container_prefix.is_empty() {
            if let Some(rest) = source_path.strip_prefix(self.container_prefix.as_str()) {
                let rest = rest.trim_start_matches('/');
                return Path::new(&self.host_prefix).join(rest);
            }
        }
        PathBuf::from(source_path)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                temp_dir: storage::get_temp_dir().to_string_lossy().to_string(),
                database_path: storage::get_database_path().to_string_lossy().to_string(),
            },
            rclone: RcloneConfig {
                binary: transfer::DEFAULT_RCLONE_BINARY.to_string(),
                config_path: Path::new(".")
                    .join(storage::DATA_DIR_NAME)
                    .join(transfer::RCLONE_CONFIG_FILE)
                    .to_string_lossy()
                    .to_string(),
            },
            scheduler: SchedulerConfig {
                timezone: cron::DEFAULT_TIMEZONE.to_string(),
                workers: scheduler::DEFAULT_WORKERS,
            },
            paths: PathMapping::default(),
        }
    }
}

impl AppConfig {
    /// 智能查找并加载配置文件
    /// 按优先级查找：config.toml -> rbackup.toml -> .rbackup.toml
    pub fn find_and_load_config() -> Result<Self> {
        let config_files = ["config.toml", "rbackup.toml", ".rbackup.toml"];

        for config_file in &config_files {
            if Path::new(config_file).exists() {
                tracing::info!("找到配置文件: {}", config_file);
                return Self::load_from_file(config_file);
            }
        }

        // 如果没找到配置文件，创建默认配置
        tracing::warn!("未找到配置文件，创建默认配置: config.toml");
        let default_config = Self::default();
        default_config.save_to_file("config.toml")?;
        Ok(default_config)
    }

    /// 从指定文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let config: AppConfig = toml::from_str(&content)?;

        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| BackupError::custom(format!("序列化配置失败: {e}")))?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// 确保临时目录和数据库父目录存在
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.storage.temp_dir)?;
        if let Some(parent) = Path::new(&self.storage.database_path).parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// 解析调度时区
    pub fn timezone(&self) -> Result<Tz> {
        self.scheduler
            .timezone
            .parse::<Tz>()
            .map_err(|_| BackupError::custom(format!("无效的时区名称: {}", self.scheduler.timezone)))
    }

    /// 将任务中记录的源路径转换为实际可访问的宿主机路径
    ///
    /// 容器化部署时任务里保存的是容器内路径，按配置的前缀做一次映射。
    pub fn host_path(&self, source_path: &str) -> PathBuf {
        self.paths.resolve(source_path)
    }
}
