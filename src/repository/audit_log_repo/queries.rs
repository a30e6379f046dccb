use super::core::AuditLogRepository;
use crate::domain::audit_log::AuditEntry;
use crate::domain::types::AuditOutcome;
use crate::repository::error::RepositoryResult;
use crate::repository::sql_time::parse_ts;
use rusqlite::{params, Result as SqliteResult, Row};

const AUDIT_COLUMNS: &str = r#"
    audit_id, actor, action, entity, entity_id, outcome,
    reason, before_state, after_state, logged_at
"#;

impl AuditLogRepository {
    // ==========================================
    // 查询操作
    // ==========================================

    /// 查询某实体的审计轨迹（按时间正序）
    pub fn find_by_entity_id(&self, entity_id: &str) -> RepositoryResult<Vec<AuditEntry>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM audit_log WHERE entity_id = ?1 ORDER BY logged_at ASC, rowid ASC",
            AUDIT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params![entity_id], map_audit_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(entries)
    }

    /// 查询某操作人的最近审计记录
    pub fn find_by_actor(&self, actor: &str, limit: usize) -> RepositoryResult<Vec<AuditEntry>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM audit_log WHERE actor = ?1 ORDER BY logged_at DESC, rowid DESC LIMIT ?2",
            AUDIT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params![actor, limit as i64], map_audit_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(entries)
    }

    /// 查询最近的失败操作（异常报表用）
    pub fn find_recent_failures(&self, limit: usize) -> RepositoryResult<Vec<AuditEntry>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM audit_log WHERE outcome = 'failure' ORDER BY logged_at DESC, rowid DESC LIMIT ?1",
            AUDIT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params![limit as i64], map_audit_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(entries)
    }

    /// 统计审计记录总数
    pub fn count(&self) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let n = conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;
        Ok(n)
    }
}

fn map_audit_row(row: &Row) -> SqliteResult<AuditEntry> {
    let outcome: String = row.get(5)?;
    let before: Option<String> = row.get(7)?;
    let after: Option<String> = row.get(8)?;
    let logged_at: String = row.get(9)?;

    Ok(AuditEntry {
        audit_id: row.get(0)?,
        actor: row.get(1)?,
        action: row.get(2)?,
        entity: row.get(3)?,
        entity_id: row.get(4)?,
        outcome: AuditOutcome::from_str(&outcome).unwrap_or(AuditOutcome::Failure),
        reason: row.get(6)?,
        before_state: before.and_then(|s| serde_json::from_str(&s).ok()),
        after_state: after.and_then(|s| serde_json::from_str(&s).ok()),
        logged_at: parse_ts(9, &logged_at)?,
    })
}
