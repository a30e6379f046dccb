// ==========================================
// 地磅称重系统 - 模拟仪表
// ==========================================
// 确定性的“上磅 → 稳定”曲线, 用于演示与测试
// ==========================================

use super::{SourceError, WeightSource};
use crate::clock::Clock;
use crate::domain::sample::WeightSample;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// 广播通道容量
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// 上磅曲线: 从 0 线性爬升到目标重量, 然后在目标附近小幅抖动
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadProfile {
    pub target_weight: f64,
    pub approach_steps: usize,
    pub settle_steps: usize,
    /// 稳定段抖动幅度 (kg)
    pub jitter: f64,
}

impl LoadProfile {
    pub fn new(target_weight: f64) -> Self {
        Self {
            target_weight,
            approach_steps: 5,
            settle_steps: 10,
            jitter: 1.0,
        }
    }

    /// 展开为 (重量, 仪表稳定标志) 序列
    pub fn samples(&self) -> Vec<(f64, bool)> {
        let mut out = Vec::with_capacity(self.approach_steps + self.settle_steps);
        for step in 1..=self.approach_steps {
            let w = self.target_weight * step as f64 / self.approach_steps as f64;
            out.push((w, false));
        }
        for step in 0..self.settle_steps {
            let offset = match step % 4 {
                1 => self.jitter,
                3 => -self.jitter,
                _ => 0.0,
            };
            out.push((self.target_weight + offset, true));
        }
        out
    }
}

// ==========================================
// SimulatedScale
// ==========================================
pub struct SimulatedScale {
    sender: broadcast::Sender<WeightSample>,
    clock: Arc<dyn Clock>,
    profile: Mutex<Option<(LoadProfile, Duration)>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedScale {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(clock, DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(clock: Arc<dyn Clock>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            clock,
            profile: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// 设置 start() 时播放的曲线
    pub fn set_profile(&self, profile: LoadProfile, period: Duration) {
        if let Ok(mut slot) = self.profile.lock() {
            *slot = Some((profile, period));
        }
    }

    /// 推送一个样本，返回收到样本的订阅者数
    pub fn emit(&self, weight: f64, stable: bool) -> usize {
        let sample = WeightSample::new(weight, stable, self.clock.now());
        self.send(sample)
    }

    /// 推送现成样本
    pub fn send(&self, sample: WeightSample) -> usize {
        self.sender.send(sample).unwrap_or(0)
    }

    /// 按固定周期播放一条曲线
    pub fn spawn_profile(&self, profile: LoadProfile, period: Duration) -> JoinHandle<()> {
        let sender = self.sender.clone();
        let clock = self.clock.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            for (weight, stable) in profile.samples() {
                ticker.tick().await;
                let sample = WeightSample::new(weight, stable, clock.now());
                if sender.send(sample).is_err() {
                    tracing::debug!("模拟仪表: 无订阅者, 样本丢弃");
                }
            }
            tracing::debug!(target = profile.target_weight, "模拟曲线播放完毕");
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl WeightSource for SimulatedScale {
    fn subscribe(&self) -> broadcast::Receiver<WeightSample> {
        self.sender.subscribe()
    }

    async fn start(&self) -> Result<(), SourceError> {
        if self.is_running() {
            return Err(SourceError::AlreadyRunning);
        }
        let (profile, period) = self
            .profile
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
            .ok_or(SourceError::NoProfile)?;

        let handle = self.spawn_profile(profile, period);
        if let Ok(mut task) = self.task.lock() {
            *task = Some(handle);
        }
        tracing::info!("模拟仪表启动");
        Ok(())
    }

    async fn stop(&self) {
        let handle = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(handle) = handle {
            handle.abort();
            tracing::info!("模拟仪表停止");
        }
    }

    fn is_running(&self) -> bool {
        self.task
            .lock()
            .ok()
            .and_then(|task| task.as_ref().map(|h| !h.is_finished()))
            .unwrap_or(false)
    }
}
