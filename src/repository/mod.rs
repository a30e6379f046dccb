// ==========================================
// 地磅称重系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod audit_log_repo;
pub mod error;
pub mod gateway;
pub mod retry;
pub mod sql_time;
pub mod transaction_repo;

// 重导出核心仓储
pub use audit_log_repo::AuditLogRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use gateway::PersistenceGateway;
pub use retry::RetryPolicy;
pub use transaction_repo::TransactionRepository;
