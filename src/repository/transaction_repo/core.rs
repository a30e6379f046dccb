use super::rows::load_transaction;
use crate::domain::audit_log::AuditEntry;
use crate::domain::ticket::TicketFormat;
use crate::domain::transaction::{Transaction, WeighEvent};
use crate::domain::types::TransactionStatus;
use crate::repository::audit_log_repo::{insert_in_tx, AuditLogRepository};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::retry::RetryPolicy;
use crate::repository::sql_time::fmt_ts;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::sync::{Arc, Mutex, MutexGuard};

// ==========================================
// TransactionRepository - 称重交易仓储
// ==========================================
// 红线: Repository 不做业务逻辑,只做数据映射与存储层不变量
pub struct TransactionRepository {
    conn: Arc<Mutex<Connection>>,
    retry: RetryPolicy,
    audit_repo: AuditLogRepository,
}

impl TransactionRepository {
    /// 创建新的交易仓储（默认重试策略）
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self::with_retry(conn, RetryPolicy::default())
    }

    /// 指定重试策略创建仓储
    pub fn with_retry(conn: Arc<Mutex<Connection>>, retry: RetryPolicy) -> Self {
        let audit_repo = AuditLogRepository::new(conn.clone());
        Self {
            conn,
            retry,
            audit_repo,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub(super) fn audit_repo(&self) -> &AuditLogRepository {
        &self.audit_repo
    }

    /// 获取数据库连接
    pub(super) fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 开单
    // ==========================================

    /// 校验车辆无 pending 交易 → 分配票号 → 插入 → 审计（同一 IMMEDIATE 事务）
    pub(super) fn create_pending(
        &self,
        draft: &Transaction,
        ticket: &TicketFormat,
        audit: &AuditEntry,
    ) -> RepositoryResult<Transaction> {
        self.retry.run("create_pending_transaction", || {
            let mut conn = self.get_conn()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            // 1. 同车辆 pending 唯一性
            let existing: Option<String> = tx
                .query_row(
                    "SELECT ticket_label FROM transactions WHERE vehicle_no = ?1 AND status = 'pending' LIMIT 1",
                    params![draft.vehicle_no],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(label) = existing {
                return Err(RepositoryError::PendingTransactionExists {
                    vehicle_no: draft.vehicle_no.clone(),
                    ticket_label: Some(label),
                });
            }

            // 2. 周期计数器 + 全局票号
            let key = ticket.sequence_key();
            let last_counter: Option<i64> = tx
                .query_row(
                    "SELECT last_counter FROM ticket_sequence WHERE period_key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            let counter = last_counter.unwrap_or(0) + 1;
            tx.execute(
                r#"
                INSERT INTO ticket_sequence (period_key, last_counter) VALUES (?1, ?2)
                ON CONFLICT(period_key) DO UPDATE SET last_counter = excluded.last_counter
                "#,
                params![key, counter],
            )?;
            let ticket_no: i64 = tx.query_row(
                "SELECT COALESCE(MAX(ticket_no), 0) + 1 FROM transactions",
                [],
                |row| row.get(0),
            )?;

            let mut created = draft.clone();
            created.ticket_no = ticket_no;
            created.ticket_label = ticket.label(counter);
            created.status = TransactionStatus::Pending;
            created.net_weight = None;
            created.operator_close_id = None;
            created.closed_at = None;
            created.voided_at = None;
            created.void_reason = None;

            // 3. 插入（部分唯一索引兜底）
            tx.execute(
                r#"
                INSERT INTO transactions (
                    id, ticket_no, ticket_label, vehicle_no, product_id, party_id,
                    transporter_id, do_po_no, mode, status, net_weight, notes,
                    operator_open_id, operator_close_id, opened_at, closed_at, voided_at, void_reason
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL, ?11, ?12, NULL, ?13, NULL, NULL, NULL)
                "#,
                params![
                    created.id,
                    created.ticket_no,
                    created.ticket_label,
                    created.vehicle_no,
                    created.product_id,
                    created.party_id,
                    created.transporter_id,
                    created.do_po_no,
                    created.mode.as_str(),
                    created.status.to_db_str(),
                    created.notes,
                    created.operator_open_id,
                    fmt_ts(&created.opened_at),
                ],
            )
            .map_err(|e| match RepositoryError::from(e) {
                RepositoryError::UniqueConstraintViolation(msg) if msg.contains("vehicle_no") => {
                    RepositoryError::PendingTransactionExists {
                        vehicle_no: draft.vehicle_no.clone(),
                        ticket_label: None,
                    }
                }
                other => other,
            })?;

            // 4. 成功审计
            let entry = audit.clone().with_after(created.snapshot());
            insert_in_tx(&tx, &entry)?;

            tx.commit()?;
            Ok(created)
        })
    }

    // ==========================================
    // 称重事件
    // ==========================================

    pub(super) fn insert_event(&self, event: &WeighEvent, audit: &AuditEntry) -> RepositoryResult<()> {
        self.retry.run("insert_weigh_event", || {
            let mut conn = self.get_conn()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let status: Option<String> = tx
                .query_row(
                    "SELECT status FROM transactions WHERE id = ?1",
                    params![event.transaction_id],
                    |row| row.get(0),
                )
                .optional()?;
            match status.as_deref() {
                None => {
                    return Err(RepositoryError::NotFound {
                        entity: "transactions".to_string(),
                        id: event.transaction_id.clone(),
                    })
                }
                Some("pending") => {}
                Some(other) => {
                    return Err(RepositoryError::InvalidStateTransition {
                        from: other.to_string(),
                        to: "capture_weight".to_string(),
                    })
                }
            }

            tx.execute(
                r#"
                INSERT INTO weigh_events (
                    id, transaction_id, seq, gross_flag, weight, stable,
                    captured_at, raw_payload, photo_ref
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    event.id,
                    event.transaction_id,
                    event.seq,
                    event.is_gross as i64,
                    event.weight,
                    event.is_stable as i64,
                    fmt_ts(&event.captured_at),
                    event.raw_payload,
                    event.photo_ref,
                ],
            )
            .map_err(|e| match RepositoryError::from(e) {
                RepositoryError::UniqueConstraintViolation(_) => RepositoryError::DuplicateSequence {
                    transaction_id: event.transaction_id.clone(),
                    seq: event.seq,
                },
                other => other,
            })?;

            let entry = audit.clone().with_after(event.snapshot());
            insert_in_tx(&tx, &entry)?;

            tx.commit()?;
            Ok(())
        })
    }

    // ==========================================
    // 状态迁移
    // ==========================================

    /// pending → complete（净重 + 关闭人 + 关闭时间一次更新）
    pub(super) fn mark_complete(
        &self,
        transaction_id: &str,
        net_weight: f64,
        closed_by: &str,
        closed_at: DateTime<Utc>,
        audit: &AuditEntry,
    ) -> RepositoryResult<Transaction> {
        self.retry.run("complete_transaction", || {
            let mut conn = self.get_conn()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let before = require_transaction(&tx, transaction_id)?;
            if before.status != TransactionStatus::Pending {
                return Err(RepositoryError::InvalidStateTransition {
                    from: before.status.to_string(),
                    to: TransactionStatus::Complete.to_string(),
                });
            }

            let affected = tx.execute(
                r#"
                UPDATE transactions
                SET status = 'complete', net_weight = ?1, operator_close_id = ?2, closed_at = ?3
                WHERE id = ?4 AND status = 'pending'
                "#,
                params![net_weight, closed_by, fmt_ts(&closed_at), transaction_id],
            )?;
            if affected != 1 {
                return Err(RepositoryError::InvalidStateTransition {
                    from: before.status.to_string(),
                    to: TransactionStatus::Complete.to_string(),
                });
            }

            let after = require_transaction(&tx, transaction_id)?;
            let entry = audit
                .clone()
                .with_before(before.snapshot())
                .with_after(after.snapshot());
            insert_in_tx(&tx, &entry)?;

            tx.commit()?;
            Ok(after)
        })
    }

    /// pending/complete → void（事件保留）
    pub(super) fn mark_void(
        &self,
        transaction_id: &str,
        reason: &str,
        voided_at: DateTime<Utc>,
        audit: &AuditEntry,
    ) -> RepositoryResult<Transaction> {
        self.retry.run("void_transaction", || {
            let mut conn = self.get_conn()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let before = require_transaction(&tx, transaction_id)?;
            if before.status == TransactionStatus::Void {
                return Err(RepositoryError::InvalidStateTransition {
                    from: before.status.to_string(),
                    to: TransactionStatus::Void.to_string(),
                });
            }

            let affected = tx.execute(
                r#"
                UPDATE transactions
                SET status = 'void', void_reason = ?1, voided_at = ?2
                WHERE id = ?3 AND status <> 'void'
                "#,
                params![reason, fmt_ts(&voided_at), transaction_id],
            )?;
            if affected != 1 {
                return Err(RepositoryError::InvalidStateTransition {
                    from: TransactionStatus::Void.to_string(),
                    to: TransactionStatus::Void.to_string(),
                });
            }

            let after = require_transaction(&tx, transaction_id)?;
            let entry = audit
                .clone()
                .with_before(before.snapshot())
                .with_after(after.snapshot());
            insert_in_tx(&tx, &entry)?;

            tx.commit()?;
            Ok(after)
        })
    }

    // ==========================================
    // 审计 / 车辆主数据
    // ==========================================

    pub(super) fn insert_audit(&self, entry: &AuditEntry) -> RepositoryResult<()> {
        self.retry
            .run("append_audit", || self.audit_repo.insert(entry).map(|_| ()))
    }

    /// 写入车辆固定皮重，返回旧值
    pub(super) fn set_fixed_tare(
        &self,
        vehicle_no: &str,
        fixed_tare: f64,
        updated_at: DateTime<Utc>,
        audit: &AuditEntry,
    ) -> RepositoryResult<Option<f64>> {
        self.retry.run("upsert_fixed_tare", || {
            let mut conn = self.get_conn()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let previous: Option<f64> = tx
                .query_row(
                    "SELECT fixed_tare FROM vehicles WHERE vehicle_no = ?1",
                    params![vehicle_no],
                    |row| row.get::<_, Option<f64>>(0),
                )
                .optional()?
                .flatten();

            tx.execute(
                r#"
                INSERT INTO vehicles (vehicle_no, fixed_tare, updated_at) VALUES (?1, ?2, ?3)
                ON CONFLICT(vehicle_no) DO UPDATE
                SET fixed_tare = excluded.fixed_tare, updated_at = excluded.updated_at
                "#,
                params![vehicle_no, fixed_tare, fmt_ts(&updated_at)],
            )?;

            let entry = audit
                .clone()
                .with_before(serde_json::json!({ "vehicle_no": vehicle_no, "fixed_tare": previous }))
                .with_after(serde_json::json!({ "vehicle_no": vehicle_no, "fixed_tare": fixed_tare }));
            insert_in_tx(&tx, &entry)?;

            tx.commit()?;
            Ok(previous)
        })
    }
}

fn require_transaction(conn: &Connection, transaction_id: &str) -> RepositoryResult<Transaction> {
    load_transaction(conn, transaction_id)?.ok_or_else(|| RepositoryError::NotFound {
        entity: "transactions".to_string(),
        id: transaction_id.to_string(),
    })
}
