use super::core::TransactionRepository;
use super::rows::{load_transaction, map_event_row, map_transaction_row, EVENT_COLUMNS, TRANSACTION_COLUMNS};
use crate::domain::transaction::{Transaction, TransactionFilter, WeighEvent};
use crate::domain::types::TransactionStatus;
use crate::repository::error::RepositoryResult;
use crate::repository::sql_time::fmt_ts;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Result as SqliteResult};

impl TransactionRepository {
    // ==========================================
    // 查询操作
    // ==========================================

    pub(super) fn find_by_id(&self, transaction_id: &str) -> RepositoryResult<Option<Transaction>> {
        let conn = self.get_conn()?;
        load_transaction(&conn, transaction_id)
    }

    /// 交易下的称重事件（按 seq 升序）
    pub(super) fn find_events(&self, transaction_id: &str) -> RepositoryResult<Vec<WeighEvent>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM weigh_events WHERE transaction_id = ?1 ORDER BY seq ASC",
            EVENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let events = stmt
            .query_map(params![transaction_id], map_event_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(events)
    }

    pub(super) fn find_pending_for_vehicle(
        &self,
        vehicle_no: &str,
    ) -> RepositoryResult<Option<Transaction>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM transactions WHERE vehicle_no = ?1 AND status = 'pending' LIMIT 1",
            TRANSACTION_COLUMNS
        );
        let txn = conn
            .query_row(&sql, params![vehicle_no], map_transaction_row)
            .optional()?;
        Ok(txn)
    }

    pub(super) fn list_by_status(
        &self,
        status: TransactionStatus,
        limit: Option<usize>,
    ) -> RepositoryResult<Vec<Transaction>> {
        let conn = self.get_conn()?;
        // LIMIT -1 = 不限
        let limit = limit.map(|n| n as i64).unwrap_or(-1);
        let sql = format!(
            "SELECT {} FROM transactions WHERE status = ?1 ORDER BY ticket_no DESC LIMIT ?2",
            TRANSACTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let txns = stmt
            .query_map(params![status.to_db_str(), limit], map_transaction_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(txns)
    }

    pub(super) fn list_recent(&self, limit: usize) -> RepositoryResult<Vec<Transaction>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM transactions ORDER BY ticket_no DESC LIMIT ?1",
            TRANSACTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let txns = stmt
            .query_map(params![limit as i64], map_transaction_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(txns)
    }

    /// 组合条件检索（车号模糊 / 票号 / 开单时间区间 / 状态）
    pub(super) fn search_by_filter(
        &self,
        filter: &TransactionFilter,
    ) -> RepositoryResult<Vec<Transaction>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(vehicle) = filter.vehicle_no.as_deref().filter(|v| !v.trim().is_empty()) {
            values.push(Value::Text(format!("%{}%", vehicle.trim().to_uppercase())));
            clauses.push(format!("vehicle_no LIKE ?{}", values.len()));
        }
        if let Some(ticket_no) = filter.ticket_no {
            values.push(Value::Integer(ticket_no));
            clauses.push(format!("ticket_no = ?{}", values.len()));
        }
        if let Some(from) = filter.opened_from {
            values.push(Value::Text(fmt_ts(&from)));
            clauses.push(format!("opened_at >= ?{}", values.len()));
        }
        if let Some(to) = filter.opened_to {
            values.push(Value::Text(fmt_ts(&to)));
            clauses.push(format!("opened_at <= ?{}", values.len()));
        }
        if let Some(status) = filter.status {
            values.push(Value::Text(status.to_db_str().to_string()));
            clauses.push(format!("status = ?{}", values.len()));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        values.push(Value::Integer(filter.limit.map(|n| n as i64).unwrap_or(-1)));
        let sql = format!(
            "SELECT {} FROM transactions {} ORDER BY ticket_no DESC LIMIT ?{}",
            TRANSACTION_COLUMNS,
            where_sql,
            values.len()
        );

        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let txns = stmt
            .query_map(params_from_iter(values.iter()), map_transaction_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(txns)
    }

    /// 开单时间早于 cutoff 的 pending 交易（按开单时间升序）
    pub(super) fn list_pending_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> RepositoryResult<Vec<Transaction>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM transactions WHERE status = 'pending' AND opened_at < ?1 ORDER BY opened_at ASC",
            TRANSACTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let txns = stmt
            .query_map(params![fmt_ts(&cutoff)], map_transaction_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(txns)
    }

    pub(super) fn get_fixed_tare(&self, vehicle_no: &str) -> RepositoryResult<Option<f64>> {
        let conn = self.get_conn()?;
        let tare = conn
            .query_row(
                "SELECT fixed_tare FROM vehicles WHERE vehicle_no = ?1",
                params![vehicle_no],
                |row| row.get::<_, Option<f64>>(0),
            )
            .optional()?
            .flatten();
        Ok(tare)
    }
}
