// ==========================================
// 地磅称重系统 - 称重交易数据仓储 (SQLite)
// ==========================================
// 对齐: schema transactions / weigh_events / vehicles / ticket_sequence 表
// 红线: Repository 不含业务逻辑
// 红线: 写入方法 = 一个 IMMEDIATE 事务（校验 + 写入 + 成功审计）
// ==========================================

mod core;
mod queries;
mod rows;


pub use self::core::TransactionRepository;

use crate::domain::audit_log::AuditEntry;
use crate::domain::ticket::TicketFormat;
use crate::domain::transaction::{Transaction, TransactionFilter, WeighEvent};
use crate::domain::types::TransactionStatus;
use crate::repository::error::RepositoryResult;
use crate::repository::gateway::PersistenceGateway;
use chrono::{DateTime, Utc};

// ==========================================
// PersistenceGateway 实现
// ==========================================
impl PersistenceGateway for TransactionRepository {
    fn create_pending_transaction(
        &self,
        draft: &Transaction,
        ticket: &TicketFormat,
        audit: &AuditEntry,
    ) -> RepositoryResult<Transaction> {
        self.create_pending(draft, ticket, audit)
    }

    fn insert_weigh_event(&self, event: &WeighEvent, audit: &AuditEntry) -> RepositoryResult<()> {
        self.insert_event(event, audit)
    }

    fn complete_transaction(
        &self,
        transaction_id: &str,
        net_weight: f64,
        closed_by: &str,
        closed_at: DateTime<Utc>,
        audit: &AuditEntry,
    ) -> RepositoryResult<Transaction> {
        self.mark_complete(transaction_id, net_weight, closed_by, closed_at, audit)
    }

    fn void_transaction(
        &self,
        transaction_id: &str,
        reason: &str,
        voided_at: DateTime<Utc>,
        audit: &AuditEntry,
    ) -> RepositoryResult<Transaction> {
        self.mark_void(transaction_id, reason, voided_at, audit)
    }

    fn append_audit(&self, entry: &AuditEntry) -> RepositoryResult<()> {
        self.insert_audit(entry)
    }

    fn upsert_fixed_tare(
        &self,
        vehicle_no: &str,
        fixed_tare: f64,
        updated_at: DateTime<Utc>,
        audit: &AuditEntry,
    ) -> RepositoryResult<Option<f64>> {
        self.set_fixed_tare(vehicle_no, fixed_tare, updated_at, audit)
    }

    fn find_transaction(&self, transaction_id: &str) -> RepositoryResult<Option<Transaction>> {
        self.find_by_id(transaction_id)
    }

    fn find_weigh_events(&self, transaction_id: &str) -> RepositoryResult<Vec<WeighEvent>> {
        self.find_events(transaction_id)
    }

    fn find_pending_by_vehicle(&self, vehicle_no: &str) -> RepositoryResult<Option<Transaction>> {
        self.find_pending_for_vehicle(vehicle_no)
    }

    fn find_by_status(
        &self,
        status: TransactionStatus,
        limit: Option<usize>,
    ) -> RepositoryResult<Vec<Transaction>> {
        self.list_by_status(status, limit)
    }

    fn find_recent(&self, limit: usize) -> RepositoryResult<Vec<Transaction>> {
        self.list_recent(limit)
    }

    fn search(&self, filter: &TransactionFilter) -> RepositoryResult<Vec<Transaction>> {
        self.search_by_filter(filter)
    }

    fn find_pending_opened_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> RepositoryResult<Vec<Transaction>> {
        self.list_pending_before(cutoff)
    }

    fn find_audit_by_entity(&self, entity_id: &str) -> RepositoryResult<Vec<AuditEntry>> {
        self.audit_repo().find_by_entity_id(entity_id)
    }

    fn find_fixed_tare(&self, vehicle_no: &str) -> RepositoryResult<Option<f64>> {
        self.get_fixed_tare(vehicle_no)
    }
}
