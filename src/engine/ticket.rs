// ==========================================
// 地磅称重系统 - 票号重置策略
// ==========================================
// 策略只决定“周期键”; 计数器在周期键变化时从 1 重新开始
// 全局 ticket_no 不受重置策略影响
// ==========================================

use crate::domain::ticket::TicketFormat;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 票号周期策略
pub trait TicketResetPolicy: Send + Sync {
    /// 给定时刻所属周期，None = 不分周期
    fn period_key(&self, at: DateTime<Utc>) -> Option<String>;
}

/// 从不重置
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverReset;

impl TicketResetPolicy for NeverReset {
    fn period_key(&self, _at: DateTime<Utc>) -> Option<String> {
        None
    }
}

/// 按 UTC 自然年重置
#[derive(Debug, Clone, Copy, Default)]
pub struct YearlyReset;

impl TicketResetPolicy for YearlyReset {
    fn period_key(&self, at: DateTime<Utc>) -> Option<String> {
        Some(format!("{:04}", at.year()))
    }
}

// ==========================================
// 配置侧的重置模式
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketResetMode {
    Never,
    Yearly,
}

impl TicketResetMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketResetMode::Never => "never",
            TicketResetMode::Yearly => "yearly",
        }
    }

    pub fn policy(&self) -> Box<dyn TicketResetPolicy> {
        match self {
            TicketResetMode::Never => Box::new(NeverReset),
            TicketResetMode::Yearly => Box::new(YearlyReset),
        }
    }
}

impl fmt::Display for TicketResetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TicketResetMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "never" | "none" => Ok(TicketResetMode::Never),
            "yearly" | "year" => Ok(TicketResetMode::Yearly),
            other => Err(format!("未知票号重置策略: {}", other)),
        }
    }
}

/// 票号配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketConfig {
    pub prefix: String,
    pub padding: usize,
    pub reset: TicketResetMode,
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            prefix: "SC".to_string(),
            padding: 6,
            reset: TicketResetMode::Yearly,
        }
    }
}

impl TicketConfig {
    /// 按策略生成某时刻的票号格式
    pub fn format_at(&self, policy: &dyn TicketResetPolicy, at: DateTime<Utc>) -> TicketFormat {
        TicketFormat {
            prefix: self.prefix.clone(),
            period_key: policy.period_key(at),
            padding: self.padding,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_yearly_period_follows_utc_year() {
        let policy = YearlyReset;
        let last_second = Utc.with_ymd_and_hms(2026, 12, 31, 23, 59, 59).unwrap();
        let new_year = Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(policy.period_key(last_second).as_deref(), Some("2026"));
        assert_eq!(policy.period_key(new_year).as_deref(), Some("2027"));
    }

    #[test]
    fn test_config_builds_format() {
        let config = TicketConfig::default();
        let at = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let format = config.format_at(config.reset.policy().as_ref(), at);
        assert_eq!(format.label(7), "SC-2026-000007");

        let never = TicketConfig {
            reset: TicketResetMode::Never,
            ..TicketConfig::default()
        };
        let format = never.format_at(&NeverReset, at);
        assert_eq!(format.label(7), "SC-000007");
    }

    #[test]
    fn test_reset_mode_parse() {
        assert_eq!("Yearly".parse::<TicketResetMode>().unwrap(), TicketResetMode::Yearly);
        assert_eq!("never".parse::<TicketResetMode>().unwrap(), TicketResetMode::Never);
        assert!("monthly".parse::<TicketResetMode>().is_err());
    }
}
