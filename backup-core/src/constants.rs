/// 本地存储相关常量
pub mod storage {
    use std::path::{Path, PathBuf};

    /// 数据目录名
    pub const DATA_DIR_NAME: &str = "data";

    /// 临时工作目录名
    pub const TEMP_DIR_NAME: &str = "temp";

    /// 数据库文件名
    pub const DATABASE_FILE_NAME: &str = "rbackup.db";

    /// 获取默认临时工作目录（跨平台）
    pub fn get_temp_dir() -> PathBuf {
        Path::new(".").join(DATA_DIR_NAME).join(TEMP_DIR_NAME)
    }

    /// 获取默认数据库文件路径（跨平台）
    pub fn get_database_path() -> PathBuf {
        Path::new(".").join(DATA_DIR_NAME).join(DATABASE_FILE_NAME)
    }
}

/// 远程传输相关常量
pub mod transfer {
    /// 默认 rclone 可执行文件名
    pub const DEFAULT_RCLONE_BINARY: &str = "rclone";

    /// rclone 配置文件名
    pub const RCLONE_CONFIG_FILE: &str = "rclone.conf";

    /// 上传超时时间（秒）
    pub const UPLOAD_TIMEOUT: u64 = 3600;

    /// 文件列表超时时间（秒）
    pub const LIST_TIMEOUT: u64 = 60;

    /// 删除文件超时时间（秒）
    pub const DELETE_TIMEOUT: u64 = 300;
}

/// 备份产物相关常量
pub mod backup {
    /// 备份文件时间戳格式：YYYYMMDD_HHMMSS
    pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

    /// tar.gz 压缩包扩展名
    pub const TAR_GZ_EXTENSION: &str = "tar.gz";

    /// zip 压缩包扩展名
    pub const ZIP_EXTENSION: &str = "zip";

    /// 加密文件追加的后缀
    pub const ENCRYPTED_SUFFIX: &str = "encrypted";
}

/// Cron任务相关常量
pub mod cron {
    /// Cron表达式字段数量
    pub const CRON_FIELDS_COUNT: usize = 5;

    /// 默认调度时区（与部署主机时区无关）
    pub const DEFAULT_TIMEZONE: &str = "Asia/Shanghai";
}

/// 调度器相关常量
pub mod scheduler {
    /// 调度循环检查间隔（秒）
    pub const TICK_INTERVAL_SECS: u64 = 30;

    /// 维护任务执行间隔（秒）
    pub const MAINTENANCE_INTERVAL_SECS: u64 = 3600;

    /// 运行中日志被判定为卡死的阈值（小时）
    pub const STALE_RUN_HOURS: i64 = 6;

    /// 默认并发工作线程数量（不同任务之间的并发上限）
    pub const DEFAULT_WORKERS: usize = 4;
}
