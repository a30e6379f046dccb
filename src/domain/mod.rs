// ==========================================
// 地磅称重系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod audit_log;
pub mod sample;
pub mod ticket;
pub mod transaction;
pub mod types;

// 重导出核心类型
pub use audit_log::{AuditAction, AuditEntry};
pub use sample::WeightSample;
pub use ticket::TicketFormat;
pub use transaction::{
    CaptureRequest, NewTransaction, Transaction, TransactionFilter, VehicleRecord, WeighEvent,
};
pub use types::{AuditOutcome, TransactionStatus, WeighingMode};
