// ==========================================
// 地磅称重系统 - 重量数据源
// ==========================================
// 职责: 定义仪表数据流接口 (广播订阅, 生产方从不等待消费方)
// 说明: 串口等真实仪表在此 trait 后接入, 本库自带模拟器
// ==========================================

pub mod simulator;

use crate::domain::sample::WeightSample;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

pub use simulator::{LoadProfile, SimulatedScale};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("数据源已在运行")]
    AlreadyRunning,

    #[error("数据源未配置采样曲线")]
    NoProfile,
}

/// 重量数据源
#[async_trait]
pub trait WeightSource: Send + Sync {
    /// 订阅样本流; 消费方落后时最旧的样本被丢弃
    fn subscribe(&self) -> broadcast::Receiver<WeightSample>;

    async fn start(&self) -> Result<(), SourceError>;

    async fn stop(&self);

    fn is_running(&self) -> bool;
}
