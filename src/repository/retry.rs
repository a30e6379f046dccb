// ==========================================
// 地磅称重系统 - 持久化重试策略
// ==========================================
// 仅对瞬时错误（SQLITE_BUSY / SQLITE_LOCKED）做有限次重试
// 其余错误原样返回，重试耗尽后作为致命错误上抛
// ==========================================

use crate::repository::error::{RepositoryError, RepositoryResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 重试策略（线性退避）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 每次退避的基础毫秒数，第 n 次重试等待 n * backoff_ms
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 50,
        }
    }
}

impl RetryPolicy {
    /// 不重试（测试/单连接场景）
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }

    /// 执行操作，瞬时错误时按策略重试
    pub fn run<T, F>(&self, operation: &str, mut f: F) -> RepositoryResult<T>
    where
        F: FnMut() -> RepositoryResult<T>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match f() {
                Err(e) if e.is_transient() => {
                    if attempt >= max_attempts {
                        tracing::error!(
                            "持久化重试耗尽: operation={}, attempts={}, error={}",
                            operation,
                            attempt,
                            e
                        );
                        return Err(RepositoryError::RetryExhausted {
                            operation: operation.to_string(),
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }
                    tracing::warn!(
                        "持久化瞬时错误，准备重试: operation={}, attempt={}, error={}",
                        operation,
                        attempt,
                        e
                    );
                    if self.backoff_ms > 0 {
                        std::thread::sleep(Duration::from_millis(self.backoff_ms * attempt as u64));
                    }
                }
                other => return other,
            }
        }
    }
}
