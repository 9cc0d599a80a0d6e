use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use fleet_core::{FleetError, FleetResult};

/// CRON表达式解析和调度工具
///
/// 接受经典的5段式表达式（自动补齐秒字段 `0`）以及 `cron` crate 的6/7段式表达式。
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    pub fn parse(cron_expr: &str) -> FleetResult<Self> {
        let normalized = Self::normalize(cron_expr);
        let schedule = Schedule::from_str(&normalized).map_err(|e| FleetError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            expression: cron_expr.trim().to_string(),
            schedule,
        })
    }

    /// 5段式表达式前补秒字段，并把星期字段从 0-6（周日为 0）换算到 `cron` crate 的 1-7（周日为 1）
    pub fn normalize(cron_expr: &str) -> String {
        let mut fields: Vec<String> = cron_expr.split_whitespace().map(str::to_string).collect();
        if fields.len() != 5 {
            return fields.join(" ");
        }

        fields[4] = Self::classic_day_of_week(&fields[4]);
        format!("0 {}", fields.join(" "))
    }

    fn classic_day_of_week(field: &str) -> String {
        if field == "*" || field == "?" {
            return field.to_string();
        }
        field
            .split(',')
            .map(Self::classic_day_of_week_part)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// 无法识别的写法（如 `MON-FRI`）原样交给 `cron` crate 处理
    fn classic_day_of_week_part(part: &str) -> String {
        let (base, step) = match part.split_once('/') {
            Some((base, step)) => match step.parse::<u32>() {
                Ok(step) if step > 0 => (base, Some(step)),
                _ => return part.to_string(),
            },
            None => (part, None),
        };

        let range = if base == "*" {
            Some((0, 6))
        } else if let Some((start, end)) = base.split_once('-') {
            start.parse::<u32>().ok().zip(end.parse::<u32>().ok())
        } else {
            base.parse::<u32>()
                .ok()
                .map(|start| (start, if step.is_some() { 6 } else { start }))
        };

        let Some((start, end)) = range.filter(|(start, end)| start <= end && *end <= 7) else {
            return part.to_string();
        };

        let mut days: Vec<u32> = (start..=end)
            .step_by(step.unwrap_or(1) as usize)
            .map(|day| if day == 0 || day == 7 { 1 } else { day + 1 })
            .collect();
        days.sort_unstable();
        days.dedup();
        days.iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// 用户输入的原始表达式
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// 严格晚于 `from` 的下一次执行时间
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    pub fn upcoming(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }

    /// 距离下一次执行的时长，表达式不再有执行时间时返回 `None`
    pub fn time_until_next(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        self.next_after(now)
            .map(|next| (next - now).to_std().unwrap_or_default())
    }

    pub fn validate(cron_expr: &str) -> FleetResult<()> {
        Self::parse(cron_expr).map(|_| ())
    }
}
