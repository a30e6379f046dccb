use crate::domain::audit_log::AuditEntry;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::sql_time::fmt_ts;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

// ==========================================
// AuditLogRepository - 审计日志仓储
// ==========================================
// 红线: Repository 不做业务逻辑,只做数据映射
pub struct AuditLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AuditLogRepository {
    /// 创建新的审计日志仓储
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    pub(super) fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 写入操作
    // ==========================================

    /// 插入审计记录
    ///
    /// # 返回
    /// - `Ok(audit_id)`: 成功插入
    /// - `Err(...)`: 数据库错误
    pub fn insert(&self, entry: &AuditEntry) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        insert_in_tx(&conn, entry)?;
        Ok(entry.audit_id.clone())
    }
}

/// 在调用方事务内写入审计记录
///
/// 说明：成功路径的审计与业务写入同一事务提交，保证“写入即留痕”。
pub(crate) fn insert_in_tx(conn: &Connection, entry: &AuditEntry) -> RepositoryResult<()> {
    conn.execute(
        r#"
        INSERT INTO audit_log (
            audit_id, actor, action, entity, entity_id, outcome,
            reason, before_state, after_state, logged_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
        params![
            entry.audit_id,
            entry.actor,
            entry.action,
            entry.entity,
            entry.entity_id,
            entry.outcome.to_db_str(),
            entry.reason,
            entry.before_state.as_ref().map(|v| v.to_string()),
            entry.after_state.as_ref().map(|v| v.to_string()),
            fmt_ts(&entry.logged_at),
        ],
    )?;
    Ok(())
}
