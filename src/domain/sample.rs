// ==========================================
// 地磅称重系统 - 称重采样
// ==========================================
// 来源: 仪表数据流 (串口/模拟器),本模块只定义数据形状
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 单个称重采样
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightSample {
    pub weight: f64,
    pub stable: bool,   // 仪表自身的稳定标志
    pub raw: String,    // 原始报文
    pub timestamp: DateTime<Utc>,
}

impl WeightSample {
    pub fn new(weight: f64, stable: bool, timestamp: DateTime<Utc>) -> Self {
        Self {
            weight,
            stable,
            raw: indicator_frame(weight, stable),
            timestamp,
        }
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = raw.into();
        self
    }
}

/// 生成仪表风格的原始报文, 例如 `ST,GS,+0008750.0kg`
pub fn indicator_frame(weight: f64, stable: bool) -> String {
    let state = if stable { "ST" } else { "US" };
    let sign = if weight < 0.0 { '-' } else { '+' };
    format!("{},GS,{}{:09.1}kg", state, sign, weight.abs())
}
