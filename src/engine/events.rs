// ==========================================
// 地磅称重系统 - 流程通知
// ==========================================
// 职责: 定义称重流程向展示层发出的通知及发布 trait
// 说明: 引擎层定义 trait，展示 / 报表层实现或订阅通道
// 顺序: 单个控制器内 FIFO，跨控制器不保证
// ==========================================

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

// ==========================================
// 通知类型
// ==========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    TransactionStarted { ticket_no: String, vehicle_no: String },
    WeightUpdated { weight: f64, stable: bool },
    StepChanged { description: String },
    TransactionCompleted { ticket_no: String, net_weight: f64 },
    ErrorOccurred { message: String },
}

impl WorkflowEvent {
    /// 转换为字符串标识
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowEvent::TransactionStarted { .. } => "transaction_started",
            WorkflowEvent::WeightUpdated { .. } => "weight_updated",
            WorkflowEvent::StepChanged { .. } => "step_changed",
            WorkflowEvent::TransactionCompleted { .. } => "transaction_completed",
            WorkflowEvent::ErrorOccurred { .. } => "error_occurred",
        }
    }
}

// ==========================================
// 通知发布 Trait
// ==========================================

/// 流程通知接收方
///
/// 发布不得阻塞样本处理，接收方关闭时静默丢弃。
pub trait WorkflowEventSink: Send + Sync {
    fn publish(&self, event: WorkflowEvent);
}

/// 基于 mpsc 通道的通知发布者
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    sender: mpsc::UnboundedSender<WorkflowEvent>,
}

impl ChannelEventSink {
    /// 创建发布者及其接收端
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WorkflowEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl WorkflowEventSink for ChannelEventSink {
    fn publish(&self, event: WorkflowEvent) {
        if let Err(e) = self.sender.send(event) {
            tracing::debug!("通知接收端已关闭, 丢弃事件: {}", e.0.as_str());
        }
    }
}

/// 空操作发布者
///
/// 用于不需要通知的场景（如单元测试）
#[derive(Debug, Clone, Default)]
pub struct NoOpEventSink;

impl WorkflowEventSink for NoOpEventSink {
    fn publish(&self, event: WorkflowEvent) {
        tracing::trace!("NoOpEventSink: 跳过事件 {}", event.as_str());
    }
}
