use crate::domain::transaction::{Transaction, WeighEvent};
use crate::domain::types::{TransactionStatus, WeighingMode};
use crate::repository::error::RepositoryResult;
use crate::repository::sql_time::{parse_opt_ts, parse_ts};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};

pub(super) const TRANSACTION_COLUMNS: &str = r#"
    id, ticket_no, ticket_label, vehicle_no, product_id, party_id,
    transporter_id, do_po_no, mode, status, net_weight, notes,
    operator_open_id, operator_close_id, opened_at, closed_at, voided_at, void_reason
"#;

pub(super) const EVENT_COLUMNS: &str = r#"
    id, transaction_id, seq, gross_flag, weight, stable, captured_at, raw_payload, photo_ref
"#;

pub(super) fn map_transaction_row(row: &Row) -> SqliteResult<Transaction> {
    let mode_raw: String = row.get(8)?;
    let mode = mode_raw
        .parse::<WeighingMode>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, e.into()))?;

    let status_raw: String = row.get(9)?;
    let status = TransactionStatus::from_str(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            9,
            Type::Text,
            format!("未知交易状态: {}", status_raw).into(),
        )
    })?;

    let opened_at: String = row.get(14)?;

    Ok(Transaction {
        id: row.get(0)?,
        ticket_no: row.get(1)?,
        ticket_label: row.get(2)?,
        vehicle_no: row.get(3)?,
        product_id: row.get(4)?,
        party_id: row.get(5)?,
        transporter_id: row.get(6)?,
        do_po_no: row.get(7)?,
        mode,
        status,
        net_weight: row.get(10)?,
        notes: row.get(11)?,
        operator_open_id: row.get(12)?,
        operator_close_id: row.get(13)?,
        opened_at: parse_ts(14, &opened_at)?,
        closed_at: parse_opt_ts(15, row.get(15)?)?,
        voided_at: parse_opt_ts(16, row.get(16)?)?,
        void_reason: row.get(17)?,
    })
}

pub(super) fn map_event_row(row: &Row) -> SqliteResult<WeighEvent> {
    let captured_at: String = row.get(6)?;
    let raw_payload: Option<String> = row.get(7)?;

    Ok(WeighEvent {
        id: row.get(0)?,
        transaction_id: row.get(1)?,
        seq: row.get(2)?,
        is_gross: row.get::<_, i64>(3)? == 1,
        weight: row.get(4)?,
        is_stable: row.get::<_, i64>(5)? == 1,
        captured_at: parse_ts(6, &captured_at)?,
        raw_payload: raw_payload.unwrap_or_default(),
        photo_ref: row.get(8)?,
    })
}

/// 在给定连接/事务内按主键读取交易
pub(super) fn load_transaction(
    conn: &Connection,
    transaction_id: &str,
) -> RepositoryResult<Option<Transaction>> {
    let sql = format!("SELECT {} FROM transactions WHERE id = ?1", TRANSACTION_COLUMNS);
    let txn = conn
        .query_row(&sql, params![transaction_id], map_transaction_row)
        .optional()?;
    Ok(txn)
}
