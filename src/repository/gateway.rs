// ==========================================
// 地磅称重系统 - 持久化网关接口
// ==========================================
// 职责: 交易 / 称重事件 / 审计 / 车辆皮重 的存取契约
// 说明: 引擎层只依赖此 trait，SQLite 实现见 transaction_repo
// 红线: 每个写入方法都是一个完整事务单元（校验 + 写入 + 成功审计）
// ==========================================

use crate::domain::audit_log::AuditEntry;
use crate::domain::ticket::TicketFormat;
use crate::domain::transaction::{Transaction, TransactionFilter, WeighEvent};
use crate::domain::types::TransactionStatus;
use crate::repository::error::RepositoryResult;
use chrono::{DateTime, Utc};

/// 持久化网关
///
/// 写入方法中的 `audit` 为成功审计记录，实现方负责补齐前后快照并与业务写入同事务提交。
pub trait PersistenceGateway: Send + Sync {
    // ===== 写入 =====

    /// 原子“校验车辆无 pending 交易 → 分配票号 → 插入”
    ///
    /// `draft` 中的 ticket_no / ticket_label 会被忽略并由实现方分配。
    fn create_pending_transaction(
        &self,
        draft: &Transaction,
        ticket: &TicketFormat,
        audit: &AuditEntry,
    ) -> RepositoryResult<Transaction>;

    /// 追加称重事件（要求交易仍为 pending，(transaction_id, seq) 唯一）
    fn insert_weigh_event(&self, event: &WeighEvent, audit: &AuditEntry) -> RepositoryResult<()>;

    /// 原子多字段更新: status=complete + net_weight + 关闭人 + 关闭时间
    fn complete_transaction(
        &self,
        transaction_id: &str,
        net_weight: f64,
        closed_by: &str,
        closed_at: DateTime<Utc>,
        audit: &AuditEntry,
    ) -> RepositoryResult<Transaction>;

    /// 作废: status=void + 原因 + 时间，保留所有称重事件
    fn void_transaction(
        &self,
        transaction_id: &str,
        reason: &str,
        voided_at: DateTime<Utc>,
        audit: &AuditEntry,
    ) -> RepositoryResult<Transaction>;

    /// 单独追加审计记录（失败操作留痕）
    fn append_audit(&self, entry: &AuditEntry) -> RepositoryResult<()>;

    /// 设置车辆固定皮重，返回旧值
    fn upsert_fixed_tare(
        &self,
        vehicle_no: &str,
        fixed_tare: f64,
        updated_at: DateTime<Utc>,
        audit: &AuditEntry,
    ) -> RepositoryResult<Option<f64>>;

    // ===== 查询 =====

    fn find_transaction(&self, transaction_id: &str) -> RepositoryResult<Option<Transaction>>;

    fn find_weigh_events(&self, transaction_id: &str) -> RepositoryResult<Vec<WeighEvent>>;

    fn find_pending_by_vehicle(&self, vehicle_no: &str) -> RepositoryResult<Option<Transaction>>;

    fn find_by_status(
        &self,
        status: TransactionStatus,
        limit: Option<usize>,
    ) -> RepositoryResult<Vec<Transaction>>;

    fn find_recent(&self, limit: usize) -> RepositoryResult<Vec<Transaction>>;

    fn search(&self, filter: &TransactionFilter) -> RepositoryResult<Vec<Transaction>>;

    /// 开单时间早于 cutoff 的 pending 交易（超时报表用）
    fn find_pending_opened_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> RepositoryResult<Vec<Transaction>>;

    fn find_audit_by_entity(&self, entity_id: &str) -> RepositoryResult<Vec<AuditEntry>>;

    fn find_fixed_tare(&self, vehicle_no: &str) -> RepositoryResult<Option<f64>>;
}
