// ==========================================
// 地磅称重系统 - 审计日志数据仓储
// ==========================================
// 对齐: schema audit_log 表
// 红线: 所有写入必须记录; 只追加, 不修改
// ==========================================

mod core;
mod queries;

#[cfg(test)]
mod tests;

pub use self::core::AuditLogRepository;
pub(crate) use self::core::insert_in_tx;
