// ==========================================
// 地磅称重系统 - 领域类型定义
// ==========================================
// 交易状态 / 称重模式 / 审计结果
// 序列化格式: snake_case (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 交易状态 (Transaction Status)
// ==========================================
// 红线: void 为终态,不做物理删除
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,  // 待完成
    Complete, // 已完成
    Void,     // 已作废
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl TransactionStatus {
    /// 从数据库字符串解析
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TransactionStatus::Pending),
            "complete" => Some(TransactionStatus::Complete),
            "void" => Some(TransactionStatus::Void),
            _ => None,
        }
    }

    /// 转换为数据库存储字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Complete => "complete",
            TransactionStatus::Void => "void",
        }
    }
}

// ==========================================
// 称重模式 (Weighing Mode)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeighingMode {
    TwoPass,   // 两次称重: 皮重 + 毛重
    FixedTare, // 固定皮重: 预存皮重 + 一次毛重
}

impl WeighingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeighingMode::TwoPass => "two_pass",
            WeighingMode::FixedTare => "fixed_tare",
        }
    }

    pub fn title_cn(&self) -> &'static str {
        match self {
            WeighingMode::TwoPass => "两次称重",
            WeighingMode::FixedTare => "固定皮重",
        }
    }
}

impl fmt::Display for WeighingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for WeighingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "two_pass" | "two-pass" => Ok(WeighingMode::TwoPass),
            "fixed_tare" | "fixed-tare" => Ok(WeighingMode::FixedTare),
            other => Err(format!("未知称重模式: {}", other)),
        }
    }
}

// ==========================================
// 审计结果 (Audit Outcome)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
}

impl AuditOutcome {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(AuditOutcome::Success),
            "failure" => Some(AuditOutcome::Failure),
            _ => None,
        }
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}
