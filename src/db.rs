// ==========================================
// 地磅称重系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 建表 DDL 幂等，可重复执行
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
/// - 内存库不支持 WAL，journal_mode 的返回值忽略
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开内存库并建表（单元测试/演示用）
pub fn open_in_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure_sqlite_connection(&conn)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// 初始化数据库 schema（幂等）
///
/// 约束:
/// - ticket_no / ticket_label 唯一
/// - (transaction_id, seq) 唯一
/// - 部分唯一索引保证每辆车最多一笔 pending 交易
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS vehicles (
            vehicle_no TEXT PRIMARY KEY,
            fixed_tare REAL CHECK (fixed_tare IS NULL OR fixed_tare > 0),
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS ticket_sequence (
            period_key TEXT PRIMARY KEY,
            last_counter INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            ticket_no INTEGER UNIQUE NOT NULL,
            ticket_label TEXT UNIQUE NOT NULL,
            vehicle_no TEXT NOT NULL,
            product_id TEXT,
            party_id TEXT,
            transporter_id TEXT,
            do_po_no TEXT,
            mode TEXT NOT NULL CHECK (mode IN ('two_pass', 'fixed_tare')),
            status TEXT NOT NULL CHECK (status IN ('pending', 'complete', 'void')),
            net_weight REAL,
            notes TEXT,
            operator_open_id TEXT NOT NULL,
            operator_close_id TEXT,
            opened_at TEXT NOT NULL,
            closed_at TEXT,
            voided_at TEXT,
            void_reason TEXT,
            CHECK ((status = 'void') = (void_reason IS NOT NULL)),
            CHECK (status <> 'complete' OR net_weight IS NOT NULL)
        );

        CREATE TABLE IF NOT EXISTS weigh_events (
            id TEXT PRIMARY KEY,
            transaction_id TEXT NOT NULL REFERENCES transactions(id),
            seq INTEGER NOT NULL CHECK (seq IN (0, 1, 2)),
            gross_flag INTEGER NOT NULL CHECK (gross_flag IN (0, 1)),
            weight REAL NOT NULL,
            stable INTEGER NOT NULL CHECK (stable IN (0, 1)),
            captured_at TEXT NOT NULL,
            raw_payload TEXT,
            photo_ref TEXT,
            UNIQUE (transaction_id, seq)
        );

        CREATE TABLE IF NOT EXISTS audit_log (
            audit_id TEXT PRIMARY KEY,
            actor TEXT NOT NULL,
            action TEXT NOT NULL,
            entity TEXT NOT NULL,
            entity_id TEXT,
            outcome TEXT NOT NULL CHECK (outcome IN ('success', 'failure')),
            reason TEXT,
            before_state TEXT,
            after_state TEXT,
            logged_at TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_vehicle_pending
            ON transactions(vehicle_no) WHERE status = 'pending';
        CREATE INDEX IF NOT EXISTS idx_transactions_status ON transactions(status);
        CREATE INDEX IF NOT EXISTS idx_transactions_opened_at ON transactions(opened_at);
        CREATE INDEX IF NOT EXISTS idx_weigh_events_transaction ON weigh_events(transaction_id);
        CREATE INDEX IF NOT EXISTS idx_audit_log_entity ON audit_log(entity_id);
        CREATE INDEX IF NOT EXISTS idx_audit_log_logged_at ON audit_log(logged_at);
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}
