// ==========================================
// 地磅称重系统 - 票号格式
// ==========================================
// 票号 = 前缀 + 周期键(可选) + 周期内序号(补零)
// 全局 ticket_no 单调递增且永不重置，周期计数器随重置策略归 1
// ==========================================

use serde::{Deserialize, Serialize};

/// 无周期时使用的计数器键
pub const GLOBAL_SEQUENCE_KEY: &str = "global";

/// 一次开单所使用的票号格式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketFormat {
    pub prefix: String,
    pub period_key: Option<String>,
    pub padding: usize,
}

impl TicketFormat {
    /// 计数器表中的键
    pub fn sequence_key(&self) -> &str {
        self.period_key.as_deref().unwrap_or(GLOBAL_SEQUENCE_KEY)
    }

    /// 生成票据编号
    pub fn label(&self, counter: i64) -> String {
        match &self.period_key {
            Some(period) => format!(
                "{}-{}-{:0width$}",
                self.prefix,
                period,
                counter,
                width = self.padding
            ),
            None => format!("{}-{:0width$}", self.prefix, counter, width = self.padding),
        }
    }
}
