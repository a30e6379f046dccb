// ==========================================
// 地磅称重系统 - 称重流程控制器
// ==========================================
// 两次称重: Idle → AwaitingFirstWeigh → FirstCaptured → AwaitingSecondWeigh → Completed
// 固定皮重: Idle → AwaitingGross → Completed
// 红线: 控制器按会话创建, 不共享可变状态
// 红线: 出错时状态不前进, 错误经通知发出并返回调用方
// ==========================================

use crate::auth::{OperatorSession, Permission};
use crate::domain::sample::WeightSample;
use crate::domain::transaction::{CaptureRequest, NewTransaction, Transaction, WeighEvent};
use crate::domain::types::WeighingMode;
use crate::engine::error::{WeighingError, WeighingResult};
use crate::engine::events::{WorkflowEvent, WorkflowEventSink};
use crate::engine::transaction_manager::{normalize_vehicle_no, TransactionManager};
use crate::engine::weighing_mode::{strategy_for, TARE_MARKER_SEQ};
use crate::engine::weight_validator::{ValidatorConfig, WeightValidator};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

// ==========================================
// 流程状态
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Idle,
    AwaitingFirstWeigh,
    /// 皮重已落库, 瞬时状态
    FirstCaptured,
    AwaitingSecondWeigh,
    AwaitingGross,
    Completed,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Idle => "idle",
            WorkflowState::AwaitingFirstWeigh => "awaiting_first_weigh",
            WorkflowState::FirstCaptured => "first_captured",
            WorkflowState::AwaitingSecondWeigh => "awaiting_second_weigh",
            WorkflowState::AwaitingGross => "awaiting_gross",
            WorkflowState::Completed => "completed",
        }
    }

    pub fn is_awaiting(&self) -> bool {
        matches!(
            self,
            WorkflowState::AwaitingFirstWeigh
                | WorkflowState::AwaitingSecondWeigh
                | WorkflowState::AwaitingGross
        )
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 流程配置
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub auto_capture_enabled: bool,
    /// 稳定持续多少秒后自动采集
    pub auto_capture_delay_secs: f64,
    /// 采集时要求读数稳定
    pub require_stable_capture: bool,
    /// 固定皮重模式开单时写入 seq 0 皮重标记
    pub record_tare_marker: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            auto_capture_enabled: true,
            auto_capture_delay_secs: 2.0,
            require_stable_capture: true,
            record_tare_marker: false,
        }
    }
}

/// 一次采集命令的结果
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// 已采集, 尚需后续称重
    Captured(WeighEvent),
    /// 交易已完成（重试完成时 event 为 None）
    Completed {
        event: Option<WeighEvent>,
        transaction: Transaction,
    },
}

/// 控制器状态快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub state: WorkflowState,
    pub step_description: String,
    pub operator: String,
    pub transaction_id: Option<String>,
    pub ticket_label: Option<String>,
    pub vehicle_no: Option<String>,
    pub mode: Option<WeighingMode>,
    pub captured: usize,
    pub required: usize,
    pub latest_weight: Option<f64>,
    pub is_stable: bool,
    /// 采集已齐但完成失败, 等待重试
    pub completion_pending: bool,
}

struct ActiveTransaction {
    transaction: Transaction,
    events: Vec<WeighEvent>,
}

impl ActiveTransaction {
    fn captures_done(&self) -> bool {
        strategy_for(self.transaction.mode).is_satisfied(&self.events)
    }
}

// ==========================================
// WorkflowController
// ==========================================
pub struct WorkflowController {
    session: OperatorSession,
    manager: Arc<TransactionManager>,
    validator: WeightValidator,
    sink: Arc<dyn WorkflowEventSink>,
    config: WorkflowConfig,
    state: WorkflowState,
    active: Option<ActiveTransaction>,
    latest_sample: Option<WeightSample>,
    /// 最新读数已被采集, 需等待新样本
    latest_consumed: bool,
    auto_armed: bool,
}

impl WorkflowController {
    pub fn new(
        session: OperatorSession,
        manager: Arc<TransactionManager>,
        validator_config: ValidatorConfig,
        config: WorkflowConfig,
        sink: Arc<dyn WorkflowEventSink>,
    ) -> Self {
        Self {
            session,
            manager,
            validator: WeightValidator::new(validator_config),
            sink,
            config,
            state: WorkflowState::Idle,
            active: None,
            latest_sample: None,
            latest_consumed: false,
            auto_armed: true,
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn session(&self) -> &OperatorSession {
        &self.session
    }

    pub fn validator(&self) -> &WeightValidator {
        &self.validator
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn active_transaction(&self) -> Option<&Transaction> {
        self.active.as_ref().map(|a| &a.transaction)
    }

    // ==========================================
    // 开始称重
    // ==========================================

    pub fn start_weighing(&mut self, request: &NewTransaction) -> WeighingResult<Transaction> {
        if self.state.is_awaiting() {
            return self.fail(WeighingError::state(self.state.to_string(), "start_weighing"));
        }
        if let Err(e) = self.require(Permission::WeighVehicle) {
            return self.fail(e);
        }

        let mode = match request.mode.parse::<WeighingMode>() {
            Ok(mode) => mode,
            Err(msg) => return self.fail(WeighingError::Validation(msg)),
        };

        // 固定皮重模式: 没有预存皮重不允许开单
        let fixed_tare = if mode == WeighingMode::FixedTare {
            let vehicle_no = match normalize_vehicle_no(&request.vehicle_no) {
                Ok(v) => v,
                Err(e) => return self.fail(e),
            };
            match self.manager.get_vehicle_fixed_tare(&vehicle_no) {
                Ok(Some(tare)) => Some(tare),
                Ok(None) => return self.fail(WeighingError::MissingTareReference { vehicle_no }),
                Err(e) => return self.fail(e),
            }
        } else {
            None
        };

        let transaction = match self.manager.start_transaction(&self.session, request) {
            Ok(t) => t,
            Err(e) => return self.fail(e),
        };

        self.validator.reset();
        self.latest_sample = None;
        self.latest_consumed = false;
        self.auto_armed = true;
        let mut events = Vec::new();

        if let (Some(tare), true) = (fixed_tare, self.config.record_tare_marker) {
            let marker = CaptureRequest::new(&transaction.id, tare, TARE_MARKER_SEQ, false)
                .with_raw_payload("FIXED_TARE");
            match self.manager.capture_weight(&self.session, &marker) {
                Ok(event) => events.push(event),
                // 标记仅用于诊断, 失败不影响流程
                Err(e) => tracing::warn!(ticket = %transaction.ticket_label, "皮重标记写入失败: {}", e),
            }
        }

        self.sink.publish(WorkflowEvent::TransactionStarted {
            ticket_no: transaction.ticket_label.clone(),
            vehicle_no: transaction.vehicle_no.clone(),
        });
        self.active = Some(ActiveTransaction {
            transaction: transaction.clone(),
            events,
        });

        let first = match mode {
            WeighingMode::TwoPass => WorkflowState::AwaitingFirstWeigh,
            WeighingMode::FixedTare => WorkflowState::AwaitingGross,
        };
        self.transition(first);
        Ok(transaction)
    }

    // ==========================================
    // 样本输入
    // ==========================================

    /// 处理一个仪表样本; 满足自动采集条件时返回采集结果
    pub fn on_sample(&mut self, sample: WeightSample) -> WeighingResult<Option<CaptureOutcome>> {
        self.latest_consumed = false;
        let verdict = match self.validator.add_sample(&sample) {
            Ok(v) => v,
            Err(e) => {
                // 超量程读数仍是仪表当前读数, 采集时由量程校验拒绝
                self.latest_sample = Some(sample);
                return self.fail(e);
            }
        };

        let stable = sample.stable || verdict.is_stable;
        self.sink.publish(WorkflowEvent::WeightUpdated {
            weight: sample.weight,
            stable,
        });
        for warning in &verdict.warnings {
            tracing::debug!(weight = sample.weight, "读数告警: {}", warning.description());
        }

        if !verdict.is_stable {
            self.auto_armed = true;
        }
        let timestamp = sample.timestamp;
        self.latest_sample = Some(sample);

        if !self.should_auto_capture(timestamp) {
            return Ok(None);
        }

        // 同一次稳定只自动采集一次
        self.auto_armed = false;
        tracing::info!(state = %self.state, "自动采集");
        let outcome = self.capture_internal();
        if outcome.is_err() {
            // 失败后下一个稳定样本继续尝试
            self.auto_armed = true;
        }
        outcome.map(Some)
    }

    fn should_auto_capture(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        if !self.config.auto_capture_enabled || !self.auto_armed || !self.state.is_awaiting() {
            return false;
        }
        if self.active.as_ref().map(|a| a.captures_done()).unwrap_or(true) {
            return false;
        }
        let delay = Duration::milliseconds(
            (self.config.auto_capture_delay_secs.max(0.0) * 1000.0).round() as i64,
        );
        match self.validator.stable_since() {
            Some(since) => now - since >= delay,
            None => false,
        }
    }

    // ==========================================
    // 手动采集
    // ==========================================

    pub fn capture_manual(&mut self) -> WeighingResult<CaptureOutcome> {
        if !self.state.is_awaiting() {
            return self.fail(WeighingError::state(self.state.to_string(), "capture_weight"));
        }
        if let Err(e) = self.require(Permission::CaptureWeight) {
            return self.fail(e);
        }
        let outcome = self.capture_internal()?;
        // 手动采集后同样等待下一次不稳定再自动采集
        self.auto_armed = false;
        Ok(outcome)
    }

    fn capture_internal(&mut self) -> WeighingResult<CaptureOutcome> {
        let (transaction_id, mode, captures_done, next) = match self.active.as_ref() {
            Some(active) => (
                active.transaction.id.clone(),
                active.transaction.mode,
                active.captures_done(),
                strategy_for(active.transaction.mode).next_capture(&active.events),
            ),
            None => return self.fail(WeighingError::state(self.state.to_string(), "capture_weight")),
        };

        // 采集已齐, 仅重试完成
        if captures_done {
            return self.finish(None);
        }
        let Some((seq, is_gross)) = next else {
            return self.finish(None);
        };

        let sample = match self.latest_sample.clone() {
            Some(s) => s,
            None => return self.fail(WeighingError::validation("暂无重量读数")),
        };
        if self.latest_consumed {
            return self.fail(WeighingError::validation(format!(
                "读数 {} kg 已采集, 请等待新读数",
                sample.weight
            )));
        }
        let stable = sample.stable || self.validator.is_stable();
        if self.config.require_stable_capture && !stable {
            return self.fail(WeighingError::validation(format!(
                "读数不稳定, 无法采集: {} kg",
                sample.weight
            )));
        }
        if let Err(e) = self.validator.validate_weight(sample.weight) {
            return self.fail(e);
        }

        let request = CaptureRequest {
            transaction_id,
            weight: sample.weight,
            sequence: seq,
            is_gross,
            is_stable: stable,
            raw_payload: Some(sample.raw.clone()),
            photo_ref: None,
        };
        let event = match self.manager.capture_weight(&self.session, &request) {
            Ok(e) => e,
            Err(e) => return self.fail(e),
        };
        self.latest_consumed = true;
        if let Some(active) = self.active.as_mut() {
            active.events.push(event.clone());
        }

        let done = self.active.as_ref().map(|a| a.captures_done()).unwrap_or(false);
        if done {
            return self.finish(Some(event));
        }

        if mode == WeighingMode::TwoPass && seq == 1 {
            self.transition(WorkflowState::FirstCaptured);
            self.transition(WorkflowState::AwaitingSecondWeigh);
        }
        Ok(CaptureOutcome::Captured(event))
    }

    fn finish(&mut self, event: Option<WeighEvent>) -> WeighingResult<CaptureOutcome> {
        let transaction_id = match self.active.as_ref() {
            Some(a) => a.transaction.id.clone(),
            None => return self.fail(WeighingError::state(self.state.to_string(), "complete_transaction")),
        };

        match self.manager.complete_transaction(&self.session, &transaction_id) {
            Ok(completed) => {
                let net_weight = completed.net_weight.unwrap_or_default();
                if let Some(active) = self.active.as_mut() {
                    active.transaction = completed.clone();
                }
                self.transition(WorkflowState::Completed);
                self.sink.publish(WorkflowEvent::TransactionCompleted {
                    ticket_no: completed.ticket_label.clone(),
                    net_weight,
                });
                Ok(CaptureOutcome::Completed {
                    event,
                    transaction: completed,
                })
            }
            // 状态保持在等待态, 下次采集命令仅重试完成
            Err(e) => self.fail(e),
        }
    }

    // ==========================================
    // 作废 / 复位
    // ==========================================

    pub fn void_transaction(&mut self, transaction_id: &str, reason: &str) -> WeighingResult<Transaction> {
        let voided = match self.manager.void_transaction(&self.session, transaction_id, reason) {
            Ok(t) => t,
            Err(e) => return self.fail(e),
        };

        let is_active = self
            .active
            .as_ref()
            .map(|a| a.transaction.id == transaction_id)
            .unwrap_or(false);
        if is_active {
            self.clear_session_state();
            self.transition(WorkflowState::Idle);
        }
        Ok(voided)
    }

    /// 强制回到 Idle; 未完成交易保持 pending, 由操作员或后台处理
    pub fn reset_workflow(&mut self) {
        if let Some(active) = self.active.as_ref() {
            if active.transaction.is_pending() {
                tracing::info!(
                    ticket = %active.transaction.ticket_label,
                    "流程复位, 放弃未完成交易"
                );
            }
        }
        self.clear_session_state();
        self.transition(WorkflowState::Idle);
    }

    fn clear_session_state(&mut self) {
        self.validator.reset();
        self.active = None;
        self.latest_sample = None;
        self.latest_consumed = false;
        self.auto_armed = true;
    }

    // ==========================================
    // 状态查询
    // ==========================================

    pub fn step_description(&self) -> String {
        let ticket = self
            .active
            .as_ref()
            .map(|a| a.transaction.ticket_label.as_str())
            .unwrap_or("");
        match self.state {
            WorkflowState::Idle => "等待开始称重".to_string(),
            WorkflowState::AwaitingFirstWeigh => format!("{}: 第一次称重, 请空车上磅 (皮重)", ticket),
            WorkflowState::FirstCaptured => format!("{}: 皮重已采集", ticket),
            WorkflowState::AwaitingSecondWeigh => format!("{}: 第二次称重, 请重车上磅 (毛重)", ticket),
            WorkflowState::AwaitingGross => format!("{}: 请重车上磅 (毛重)", ticket),
            WorkflowState::Completed => {
                let net = self
                    .active
                    .as_ref()
                    .and_then(|a| a.transaction.net_weight)
                    .unwrap_or_default();
                format!("{}: 称重完成, 净重 {} kg", ticket, net)
            }
        }
    }

    pub fn status(&self) -> WorkflowStatus {
        let (transaction_id, ticket_label, vehicle_no, mode, captured, required, completion_pending) =
            match self.active.as_ref() {
                Some(a) => {
                    let strategy = strategy_for(a.transaction.mode);
                    (
                        Some(a.transaction.id.clone()),
                        Some(a.transaction.ticket_label.clone()),
                        Some(a.transaction.vehicle_no.clone()),
                        Some(a.transaction.mode),
                        strategy.captured_count(&a.events),
                        strategy.required_capture_count(),
                        a.captures_done() && a.transaction.is_pending(),
                    )
                }
                None => (None, None, None, None, 0, 0, false),
            };

        WorkflowStatus {
            state: self.state,
            step_description: self.step_description(),
            operator: self.session.username.clone(),
            transaction_id,
            ticket_label,
            vehicle_no,
            mode,
            captured,
            required,
            latest_weight: self.latest_sample.as_ref().map(|s| s.weight),
            is_stable: self.validator.is_stable(),
            completion_pending,
        }
    }

    // ==========================================
    // 内部
    // ==========================================

    fn transition(&mut self, next: WorkflowState) {
        if self.state != next {
            tracing::info!(from = %self.state, to = %next, "流程状态切换");
        }
        self.state = next;
        self.sink.publish(WorkflowEvent::StepChanged {
            description: self.step_description(),
        });
    }

    fn require(&self, permission: Permission) -> WeighingResult<()> {
        if self
            .manager
            .permissions()
            .has_permission(self.session.role, permission)
        {
            Ok(())
        } else {
            Err(WeighingError::Permission {
                role: self.session.role.to_string(),
                permission: permission.to_string(),
            })
        }
    }

    fn fail<T>(&self, err: WeighingError) -> WeighingResult<T> {
        tracing::warn!(state = %self.state, kind = err.kind(), "流程操作失败: {}", err);
        self.sink.publish(WorkflowEvent::ErrorOccurred {
            message: err.to_string(),
        });
        Err(err)
    }
}

/// 订阅样本流并驱动控制器; 流关闭时任务结束
pub fn spawn_sample_listener(
    controller: Arc<AsyncMutex<WorkflowController>>,
    mut receiver: broadcast::Receiver<WeightSample>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(sample) => {
                    let mut guard = controller.lock().await;
                    // 错误已经通过通知发出
                    let _ = guard.on_sample(sample);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "样本消费落后, 已丢弃最旧样本");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!("样本流已关闭, 监听结束");
                    break;
                }
            }
        }
    })
}
