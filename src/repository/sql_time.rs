// ==========================================
// 地磅称重系统 - 时间字段编解码
// ==========================================
// 存储格式: RFC3339 UTC, 固定毫秒位 (保证字符串可比较)
// ==========================================

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;

/// 时间戳 → 数据库文本
pub fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// 数据库文本 → 时间戳（列映射用）
pub fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// 可空时间列
pub fn parse_opt_ts(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(idx, &s)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fixed_width_and_parse_back() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap();
        let text = fmt_ts(&ts);
        assert_eq!(text, "2026-03-01T08:30:00.000Z");
        assert_eq!(parse_ts(0, &text).unwrap(), ts);
        assert!(parse_ts(0, "not-a-date").is_err());
    }
}
