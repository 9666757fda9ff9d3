use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// 备份任务管理相关命令
#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    /// 创建备份任务
    Add {
        /// 任务名称（远程产物以此为前缀）
        name: String,
        /// 要备份的本地文件或目录
        source: String,
        /// 远程目的地，格式 profile:路径，可重复指定
        #[arg(long = "dest", required = true, help = "远程目的地，例如 minio:backups/app")]
        destinations: Vec<String>,
        /// cron 表达式，例如 "0 2 * * *" 表示每天凌晨2点
        #[arg(long, default_value = "", help = "cron 表达式，留空表示只手动触发")]
        cron: String,
        /// 压缩方式：tar.gz、zip 或 none
        #[arg(long, default_value = "tar.gz")]
        compression: String,
        /// 加密口令，设置后压缩包整体加密
        #[arg(long)]
        password: Option<String>,
        /// 每个目的地保留的备份数量
        #[arg(long, default_value = "10")]
        retention: i32,
        /// 任务描述
        #[arg(long, default_value = "")]
        description: String,
    },
    /// 列出所有备份任务
    List,
    /// 修改备份任务，未指定的参数保持不变
    Update {
        /// 任务名称
        name: String,
        /// 新的源路径
        #[arg(long)]
        source: Option<String>,
        /// 新的远程目的地列表（指定后整体替换）
        #[arg(long = "dest", help = "远程目的地，例如 minio:backups/app")]
        destinations: Vec<String>,
        /// 新的 cron 表达式，空字符串表示取消定时
        #[arg(long)]
        cron: Option<String>,
        /// 新的压缩方式：tar.gz、zip 或 none
        #[arg(long)]
        compression: Option<String>,
        /// 新的加密口令
        #[arg(long)]
        password: Option<String>,
        /// 取消加密
        #[arg(long, conflicts_with = "password")]
        no_password: bool,
        /// 新的保留数量
        #[arg(long)]
        retention: Option<i32>,
        /// 新的任务描述
        #[arg(long)]
        description: Option<String>,
    },
    /// 删除备份任务
    Remove {
        /// 任务名称
        name: String,
    },
    /// 启用备份任务
    Enable {
        /// 任务名称
        name: String,
    },
    /// 停用备份任务
    Disable {
        /// 任务名称
        name: String,
    },
}

/// rbackup - 定时备份与远程上传工具
#[derive(Parser)]
#[command(name = "rbackup")]
#[command(version)]
#[command(about = "把本地目录压缩、加密后定时上传到 rclone 管理的远程存储")]
pub struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// 详细输出
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 备份任务管理
    #[command(subcommand)]
    Task(TaskCommand),

    /// 立即执行一次备份
    Run {
        /// 任务名称
        task: String,
    },

    /// 查看运行历史
    Runs {
        /// 任务名称（不指定则显示全部任务）
        task: Option<String>,
        /// 显示条数
        #[arg(long, default_value = "20")]
        limit: i64,
    },

    /// 以调度模式常驻运行
    Serve,

    /// 显示配置和任务概况
    Status,
}
