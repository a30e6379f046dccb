// ==========================================
// 地磅称重系统 - 引擎层错误类型
// ==========================================
// 职责: 统一称重业务错误，转换 Repository 错误为业务语义
// 红线: 每个错误都携带可读原因，失败操作写入审计
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 称重业务错误
#[derive(Error, Debug)]
pub enum WeighingError {
    // ==========================================
    // 输入 / 状态
    // ==========================================
    #[error("数据校验失败: {0}")]
    Validation(String),

    #[error("状态错误: 当前={current}, 操作={operation}")]
    State { current: String, operation: String },

    #[error("冲突: {0}")]
    Conflict(String),

    #[error("权限不足: role={role}, permission={permission}")]
    Permission { role: String, permission: String },

    #[error("记录未找到: {entity} with id={id}")]
    NotFound { entity: String, id: String },

    // ==========================================
    // 称重规则
    // ==========================================
    #[error("称重未完成: 需要 {required} 次采集, 已采集 {captured} 次")]
    IncompleteWeighing { required: usize, captured: usize },

    #[error("车辆未配置固定皮重: vehicle_no={vehicle_no}")]
    MissingTareReference { vehicle_no: String },

    // ==========================================
    // 存储
    // ==========================================
    #[error("持久化失败: {0}")]
    Persistence(String),

    #[error("导出失败: {0}")]
    Export(String),
}

impl WeighingError {
    pub fn validation(msg: impl Into<String>) -> Self {
        WeighingError::Validation(msg.into())
    }

    pub fn state(current: impl Into<String>, operation: impl Into<String>) -> Self {
        WeighingError::State {
            current: current.into(),
            operation: operation.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        WeighingError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// 错误类别标识（日志 / 审计用）
    pub fn kind(&self) -> &'static str {
        match self {
            WeighingError::Validation(_) => "validation",
            WeighingError::State { .. } => "state",
            WeighingError::Conflict(_) => "conflict",
            WeighingError::Permission { .. } => "permission",
            WeighingError::NotFound { .. } => "not_found",
            WeighingError::IncompleteWeighing { .. } => "incomplete_weighing",
            WeighingError::MissingTareReference { .. } => "missing_tare_reference",
            WeighingError::Persistence(_) => "persistence",
            WeighingError::Export(_) => "export",
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for WeighingError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::PendingTransactionExists {
                vehicle_no,
                ticket_label,
            } => WeighingError::Conflict(match ticket_label {
                Some(label) => format!("车辆 {} 已有未完成交易 {}", vehicle_no, label),
                None => format!("车辆 {} 已有未完成交易", vehicle_no),
            }),
            RepositoryError::DuplicateSequence {
                transaction_id,
                seq,
            } => WeighingError::Conflict(format!(
                "交易 {} 的第 {} 次称重已记录",
                transaction_id, seq
            )),
            RepositoryError::UniqueConstraintViolation(msg) => {
                WeighingError::Conflict(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::NotFound { entity, id } => WeighingError::NotFound { entity, id },
            RepositoryError::InvalidStateTransition { from, to } => WeighingError::State {
                current: from,
                operation: to,
            },
            RepositoryError::FieldValueError { field, message } => {
                WeighingError::Validation(format!("字段{}错误: {}", field, message))
            }
            other => WeighingError::Persistence(other.to_string()),
        }
    }
}

/// Result 类型别名
pub type WeighingResult<T> = Result<T, WeighingError>;
