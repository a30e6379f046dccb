// ==========================================
// 地磅称重系统 - 审计日志领域模型
// ==========================================
// 红线: 所有写入必须记录 (成功与失败均记录)
// 用途: 审计追踪, 作废追溯
// 对齐: schema audit_log 表
// ==========================================

use crate::domain::types::AuditOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// AuditEntry - 审计记录
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    // ===== 主键 =====
    pub audit_id: String,
    pub actor: String,       // 操作人
    pub action: String,      // 操作类型 (存储为字符串)
    pub entity: String,      // 实体表名
    pub entity_id: Option<String>,
    pub outcome: AuditOutcome,
    pub reason: Option<String>, // 原因 / 错误信息

    // ===== 状态快照 =====
    pub before_state: Option<JsonValue>,
    pub after_state: Option<JsonValue>,

    pub logged_at: DateTime<Utc>,
}

// ==========================================
// AuditAction - 操作类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    StartTransaction,
    CaptureWeight,
    CompleteTransaction,
    VoidTransaction,
    SetFixedTare,
}

impl AuditAction {
    /// 转换为字符串 (用于数据库存储)
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::StartTransaction => "START_TRANSACTION",
            AuditAction::CaptureWeight => "CAPTURE_WEIGHT",
            AuditAction::CompleteTransaction => "COMPLETE_TRANSACTION",
            AuditAction::VoidTransaction => "VOID_TRANSACTION",
            AuditAction::SetFixedTare => "SET_FIXED_TARE",
        }
    }

    /// 从字符串解析
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "START_TRANSACTION" => Some(AuditAction::StartTransaction),
            "CAPTURE_WEIGHT" => Some(AuditAction::CaptureWeight),
            "COMPLETE_TRANSACTION" => Some(AuditAction::CompleteTransaction),
            "VOID_TRANSACTION" => Some(AuditAction::VoidTransaction),
            "SET_FIXED_TARE" => Some(AuditAction::SetFixedTare),
            _ => None,
        }
    }

    /// 操作对应的实体表
    pub fn entity(&self) -> &'static str {
        match self {
            AuditAction::CaptureWeight => "weigh_events",
            AuditAction::SetFixedTare => "vehicles",
            _ => "transactions",
        }
    }
}

// ==========================================
// AuditEntry 辅助方法
// ==========================================
impl AuditEntry {
    /// 创建新的审计记录 (默认成功)
    ///
    /// # 参数
    /// - `action`: 操作类型
    /// - `actor`: 操作人
    /// - `logged_at`: 记录时间 (由注入时钟提供)
    pub fn new(action: AuditAction, actor: impl Into<String>, logged_at: DateTime<Utc>) -> Self {
        Self {
            audit_id: uuid::Uuid::new_v4().to_string(),
            actor: actor.into(),
            action: action.as_str().to_string(),
            entity: action.entity().to_string(),
            entity_id: None,
            outcome: AuditOutcome::Success,
            reason: None,
            before_state: None,
            after_state: None,
            logged_at,
        }
    }

    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_before(mut self, state: JsonValue) -> Self {
        self.before_state = Some(state);
        self
    }

    pub fn with_after(mut self, state: JsonValue) -> Self {
        self.after_state = Some(state);
        self
    }

    /// 标记为失败记录,原因写入错误信息
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.outcome = AuditOutcome::Failure;
        self.reason = Some(error.into());
        self.after_state = None;
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == AuditOutcome::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_entity_mapping() {
        assert_eq!(AuditAction::CaptureWeight.entity(), "weigh_events");
        assert_eq!(AuditAction::VoidTransaction.entity(), "transactions");
        assert_eq!(
            AuditAction::from_str(AuditAction::SetFixedTare.as_str()),
            Some(AuditAction::SetFixedTare)
        );
    }

    #[test]
    fn test_failed_entry_drops_after_state() {
        let entry = AuditEntry::new(AuditAction::VoidTransaction, "op1", Utc::now())
            .with_after(serde_json::json!({"status": "void"}))
            .failed("权限不足");

        assert!(!entry.is_success());
        assert!(entry.after_state.is_none());
        assert_eq!(entry.reason.as_deref(), Some("权限不足"));
    }
}
