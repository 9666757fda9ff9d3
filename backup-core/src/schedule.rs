//! cron 表达式解析与触发时间计算
//!
//! 任务使用标准 5 字段 cron 表达式（分 时 日 月 周），计算时在固定
//! 时区内求值，与部署主机的本地时区无关。入库的触发时间统一为 UTC。

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;

use crate::constants::cron as cron_constants;
use crate::{BackupError, Result};

/// 解析调度时区名称
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| BackupError::cron(format!("无效的时区: {name}")))
}

/// 把 5 字段表达式转换成内部使用的 6 字段形式（秒位固定为 0）
fn to_schedule(expression: &str) -> Result<Schedule> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != cron_constants::CRON_FIELDS_COUNT {
        return Err(BackupError::cron(format!(
            "cron 表达式必须是 {} 个字段（分 时 日 月 周）: {expression}",
            cron_constants::CRON_FIELDS_COUNT
        )));
    }

    let with_seconds = format!("0 {}", fields.join(" "));
    Schedule::from_str(&with_seconds)
        .map_err(|e| BackupError::cron(format!("无效的 cron 表达式 {expression}: {e}")))
}

/// 校验 cron 表达式，空字符串表示任务不参与调度
pub fn validate_cron(expression: &str) -> Result<()> {
    if expression.trim().is_empty() {
        return Ok(());
    }
    to_schedule(expression.trim()).map(|_| ())
}

/// 计算 `after` 之后的下一次触发时间（UTC）
///
/// 表达式在 `tz` 时区内求值，返回 None 表示不会再触发。
pub fn next_fire_time(
    expression: &str,
    tz: Tz,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    let schedule = to_schedule(expression.trim())?;
    let local_after = after.with_timezone(&tz);

    Ok(schedule
        .after(&local_after)
        .next()
        .map(|dt| dt.with_timezone(&Utc)))
}
