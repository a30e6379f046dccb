// ==========================================
// 地磅称重系统 - 交易管理器
// ==========================================
// 职责: 交易生命周期 (开单 / 采集 / 完成 / 作废) 与不变量校验
// 红线: 权限在任何读写之前校验
// 红线: 每个写操作都留审计, 成功与存储写入同事务, 失败事后追加
// ==========================================

use crate::auth::{OperatorSession, Permission, PermissionGateway};
use crate::clock::Clock;
use crate::domain::audit_log::{AuditAction, AuditEntry};
use crate::domain::sample::indicator_frame;
use crate::domain::transaction::{
    CaptureRequest, NewTransaction, Transaction, TransactionFilter, WeighEvent,
};
use crate::domain::types::{TransactionStatus, WeighingMode};
use crate::engine::error::{WeighingError, WeighingResult};
use crate::engine::ticket::{TicketConfig, TicketResetPolicy};
use crate::engine::weighing_mode::{strategy_for, WeighingStrategy};
use crate::repository::gateway::PersistenceGateway;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 车号最大长度
pub const MAX_VEHICLE_NO_LEN: usize = 20;
/// 备注最大长度（字符）
pub const MAX_NOTES_LEN: usize = 500;
/// 净重最多保留的小数位
pub const MAX_NET_WEIGHT_DECIMALS: u32 = 6;

// ==========================================
// 管理器配置
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// 净重保留小数位
    pub net_weight_decimals: u32,
    /// pending 超过该小时数视为超时（仅报表）
    pub stale_pending_hours: i64,
    pub ticket: TicketConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            net_weight_decimals: 2,
            stale_pending_hours: 24,
            ticket: TicketConfig::default(),
        }
    }
}

// ==========================================
// TransactionManager
// ==========================================
pub struct TransactionManager {
    gateway: Arc<dyn PersistenceGateway>,
    permissions: Arc<dyn PermissionGateway>,
    clock: Arc<dyn Clock>,
    reset_policy: Box<dyn TicketResetPolicy>,
    config: ManagerConfig,
}

impl TransactionManager {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        permissions: Arc<dyn PermissionGateway>,
        clock: Arc<dyn Clock>,
        config: ManagerConfig,
    ) -> Self {
        let reset_policy = config.ticket.reset.policy();
        Self {
            gateway,
            permissions,
            clock,
            reset_policy,
            config,
        }
    }

    /// 替换票号重置策略
    pub fn with_reset_policy(mut self, policy: Box<dyn TicketResetPolicy>) -> Self {
        self.reset_policy = policy;
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn permissions(&self) -> &Arc<dyn PermissionGateway> {
        &self.permissions
    }

    pub fn strategy(&self, mode: WeighingMode) -> &'static dyn WeighingStrategy {
        strategy_for(mode)
    }

    // ==========================================
    // 开单
    // ==========================================

    pub fn start_transaction(
        &self,
        session: &OperatorSession,
        request: &NewTransaction,
    ) -> WeighingResult<Transaction> {
        let now = self.clock.now();
        let audit = AuditEntry::new(AuditAction::StartTransaction, session.actor(), now);

        self.audited(audit, |audit| {
            self.require(session, Permission::CreateTransaction)?;

            let vehicle_no = normalize_vehicle_no(&request.vehicle_no)?;
            let mode = request
                .mode
                .parse::<WeighingMode>()
                .map_err(WeighingError::Validation)?;
            let notes = clean_optional(request.notes.as_deref());
            if let Some(n) = &notes {
                if n.chars().count() > MAX_NOTES_LEN {
                    return Err(WeighingError::validation(format!(
                        "备注超过 {} 个字符",
                        MAX_NOTES_LEN
                    )));
                }
            }

            let draft = Transaction {
                id: uuid::Uuid::new_v4().to_string(),
                ticket_no: 0,
                ticket_label: String::new(),
                vehicle_no,
                product_id: clean_optional(request.product_id.as_deref()),
                party_id: clean_optional(request.party_id.as_deref()),
                transporter_id: clean_optional(request.transporter_id.as_deref()),
                do_po_no: clean_optional(request.do_po_no.as_deref()),
                mode,
                status: TransactionStatus::Pending,
                net_weight: None,
                notes,
                operator_open_id: session.user_id.clone(),
                operator_close_id: None,
                opened_at: now,
                closed_at: None,
                voided_at: None,
                void_reason: None,
            };
            let format = self.config.ticket.format_at(self.reset_policy.as_ref(), now);

            let created = self.gateway.create_pending_transaction(
                &draft,
                &format,
                &audit.clone().with_entity_id(&draft.id),
            )?;

            tracing::info!(
                ticket = %created.ticket_label,
                vehicle_no = %created.vehicle_no,
                mode = %created.mode,
                "交易开单"
            );
            Ok(created)
        })
    }

    // ==========================================
    // 采集
    // ==========================================

    pub fn capture_weight(
        &self,
        session: &OperatorSession,
        request: &CaptureRequest,
    ) -> WeighingResult<WeighEvent> {
        let now = self.clock.now();
        let audit = AuditEntry::new(AuditAction::CaptureWeight, session.actor(), now)
            .with_entity_id(&request.transaction_id);

        self.audited(audit, |audit| {
            self.require(session, Permission::CaptureWeight)?;

            if !request.weight.is_finite() || request.weight < 0.0 {
                return Err(WeighingError::validation(format!(
                    "无效重量: {}",
                    request.weight
                )));
            }

            let txn = self.load(&request.transaction_id)?;
            if !txn.is_pending() {
                return Err(WeighingError::state(txn.status.to_string(), "capture_weight"));
            }

            let strategy = strategy_for(txn.mode);
            if !strategy.validate_sequence(request.sequence, request.is_gross) {
                return Err(WeighingError::validation(format!(
                    "{}模式不接受 seq={} gross={}",
                    txn.mode.title_cn(),
                    request.sequence,
                    request.is_gross
                )));
            }

            let event = WeighEvent {
                id: uuid::Uuid::new_v4().to_string(),
                transaction_id: txn.id.clone(),
                seq: request.sequence,
                is_gross: request.is_gross,
                weight: request.weight,
                is_stable: request.is_stable,
                captured_at: now,
                raw_payload: request
                    .raw_payload
                    .clone()
                    .unwrap_or_else(|| indicator_frame(request.weight, request.is_stable)),
                photo_ref: request.photo_ref.clone(),
            };
            self.gateway.insert_weigh_event(&event, audit)?;

            tracing::info!(
                ticket = %txn.ticket_label,
                seq = event.seq,
                weight = event.weight,
                stable = event.is_stable,
                "称重采集"
            );
            Ok(event)
        })
    }

    // ==========================================
    // 完成
    // ==========================================

    pub fn complete_transaction(
        &self,
        session: &OperatorSession,
        transaction_id: &str,
    ) -> WeighingResult<Transaction> {
        let now = self.clock.now();
        let audit = AuditEntry::new(AuditAction::CompleteTransaction, session.actor(), now)
            .with_entity_id(transaction_id);

        self.audited(audit, |audit| {
            let txn = self.load(transaction_id)?;
            if !txn.is_pending() {
                return Err(WeighingError::state(
                    txn.status.to_string(),
                    "complete_transaction",
                ));
            }

            let events = self.gateway.find_weigh_events(transaction_id)?;
            let strategy = strategy_for(txn.mode);
            if !strategy.is_satisfied(&events) {
                return Err(WeighingError::IncompleteWeighing {
                    required: strategy.required_capture_count(),
                    captured: strategy.captured_count(&events),
                });
            }

            let external_tare = if strategy.uses_external_tare() {
                let tare = self.gateway.find_fixed_tare(&txn.vehicle_no)?;
                if tare.is_none() {
                    return Err(WeighingError::MissingTareReference {
                        vehicle_no: txn.vehicle_no.clone(),
                    });
                }
                tare
            } else {
                None
            };

            let net = strategy
                .compute_net_weight(&events, external_tare)
                .map_err(|e| match e {
                    WeighingError::MissingTareReference { .. } => {
                        WeighingError::MissingTareReference {
                            vehicle_no: txn.vehicle_no.clone(),
                        }
                    }
                    other => other,
                })?;
            let net = round_to(net, self.config.net_weight_decimals);

            let completed =
                self.gateway
                    .complete_transaction(transaction_id, net, &session.user_id, now, audit)?;

            tracing::info!(
                ticket = %completed.ticket_label,
                vehicle_no = %completed.vehicle_no,
                net_weight = net,
                "交易完成"
            );
            Ok(completed)
        })
    }

    // ==========================================
    // 作废
    // ==========================================

    pub fn void_transaction(
        &self,
        session: &OperatorSession,
        transaction_id: &str,
        reason: &str,
    ) -> WeighingResult<Transaction> {
        let now = self.clock.now();
        let audit = AuditEntry::new(AuditAction::VoidTransaction, session.actor(), now)
            .with_entity_id(transaction_id);

        self.audited(audit, |audit| {
            self.require(session, Permission::VoidTransaction)?;

            let reason = reason.trim();
            if reason.is_empty() {
                return Err(WeighingError::validation("作废原因不能为空"));
            }

            let voided = self
                .gateway
                .void_transaction(transaction_id, reason, now, &audit.clone().with_reason(reason))?;

            tracing::info!(
                ticket = %voided.ticket_label,
                actor = %session.actor(),
                reason = %reason,
                "交易作废"
            );
            Ok(voided)
        })
    }

    // ==========================================
    // 车辆固定皮重
    // ==========================================

    /// 设置车辆固定皮重，返回旧值
    pub fn set_vehicle_fixed_tare(
        &self,
        session: &OperatorSession,
        vehicle_no: &str,
        fixed_tare: f64,
    ) -> WeighingResult<Option<f64>> {
        let now = self.clock.now();
        let audit = AuditEntry::new(AuditAction::SetFixedTare, session.actor(), now)
            .with_entity_id(vehicle_no.trim().to_uppercase());

        self.audited(audit, |audit| {
            self.require(session, Permission::UpdateMasterData)?;
            let vehicle_no = normalize_vehicle_no(vehicle_no)?;
            if !fixed_tare.is_finite() || fixed_tare <= 0.0 {
                return Err(WeighingError::validation(format!(
                    "固定皮重必须大于 0: {}",
                    fixed_tare
                )));
            }

            let previous = self
                .gateway
                .upsert_fixed_tare(&vehicle_no, fixed_tare, now, audit)?;
            tracing::info!(
                vehicle_no = %vehicle_no,
                fixed_tare,
                previous = ?previous,
                "更新固定皮重"
            );
            Ok(previous)
        })
    }

    pub fn get_vehicle_fixed_tare(&self, vehicle_no: &str) -> WeighingResult<Option<f64>> {
        let vehicle_no = normalize_vehicle_no(vehicle_no)?;
        Ok(self.gateway.find_fixed_tare(&vehicle_no)?)
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn get_transaction_by_id(&self, transaction_id: &str) -> WeighingResult<Option<Transaction>> {
        Ok(self.gateway.find_transaction(transaction_id)?)
    }

    pub fn get_transactions_by_status(
        &self,
        status: TransactionStatus,
        limit: Option<usize>,
    ) -> WeighingResult<Vec<Transaction>> {
        Ok(self.gateway.find_by_status(status, limit)?)
    }

    pub fn get_recent_transactions(&self, limit: usize) -> WeighingResult<Vec<Transaction>> {
        Ok(self.gateway.find_recent(limit)?)
    }

    pub fn get_weigh_events(&self, transaction_id: &str) -> WeighingResult<Vec<WeighEvent>> {
        Ok(self.gateway.find_weigh_events(transaction_id)?)
    }

    pub fn get_pending_transaction_by_vehicle(
        &self,
        vehicle_no: &str,
    ) -> WeighingResult<Option<Transaction>> {
        let vehicle_no = normalize_vehicle_no(vehicle_no)?;
        Ok(self.gateway.find_pending_by_vehicle(&vehicle_no)?)
    }

    pub fn search_transactions(&self, filter: &TransactionFilter) -> WeighingResult<Vec<Transaction>> {
        Ok(self.gateway.search(filter)?)
    }

    /// 超时未完成的 pending 交易（只报告，不做处理）
    pub fn get_stale_transactions(&self) -> WeighingResult<Vec<Transaction>> {
        let cutoff = self.clock.now() - Duration::hours(self.config.stale_pending_hours);
        Ok(self.gateway.find_pending_opened_before(cutoff)?)
    }

    pub fn get_audit_trail(&self, entity_id: &str) -> WeighingResult<Vec<AuditEntry>> {
        Ok(self.gateway.find_audit_by_entity(entity_id)?)
    }

    // ==========================================
    // 内部
    // ==========================================

    fn require(&self, session: &OperatorSession, permission: Permission) -> WeighingResult<()> {
        if self.permissions.has_permission(session.role, permission) {
            Ok(())
        } else {
            Err(WeighingError::Permission {
                role: session.role.to_string(),
                permission: permission.to_string(),
            })
        }
    }

    fn load(&self, transaction_id: &str) -> WeighingResult<Transaction> {
        self.gateway
            .find_transaction(transaction_id)?
            .ok_or_else(|| WeighingError::not_found("transactions", transaction_id))
    }

    /// 执行写操作; 失败时追加失败审计（尽力而为）
    fn audited<T>(
        &self,
        audit: AuditEntry,
        op: impl FnOnce(&AuditEntry) -> WeighingResult<T>,
    ) -> WeighingResult<T> {
        match op(&audit) {
            Ok(value) => Ok(value),
            Err(err) => {
                tracing::warn!(
                    action = %audit.action,
                    actor = %audit.actor,
                    kind = err.kind(),
                    "操作被拒绝: {}",
                    err
                );
                let failed = audit.failed(err.to_string());
                if let Err(audit_err) = self.gateway.append_audit(&failed) {
                    tracing::warn!(
                        action = %failed.action,
                        "失败审计写入失败: {}",
                        audit_err
                    );
                }
                Err(err)
            }
        }
    }
}

// ==========================================
// 辅助函数
// ==========================================

/// 车号规范化: 去空白、转大写，仅允许 [A-Z0-9-]，最长 20
pub fn normalize_vehicle_no(raw: &str) -> WeighingResult<String> {
    let vehicle_no = raw.trim().to_uppercase();
    if vehicle_no.is_empty() {
        return Err(WeighingError::validation("车号不能为空"));
    }
    if vehicle_no.chars().count() > MAX_VEHICLE_NO_LEN {
        return Err(WeighingError::validation(format!(
            "车号超过 {} 个字符: {}",
            MAX_VEHICLE_NO_LEN, vehicle_no
        )));
    }
    if !vehicle_no
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(WeighingError::validation(format!(
            "车号只允许字母、数字和连字符: {}",
            vehicle_no
        )));
    }
    Ok(vehicle_no)
}

/// 按小数位四舍五入, 小数位上限 MAX_NET_WEIGHT_DECIMALS
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10_f64.powi(decimals.min(MAX_NET_WEIGHT_DECIMALS) as i32);
    (value * factor).round() / factor
}

fn clean_optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
