// ==========================================
// 地磅称重系统 - 日志初始化
// ==========================================
// 使用 tracing + tracing-subscriber
// 过滤器: RUST_LOG 优先, 否则使用 DEFAULT_DIRECTIVE
// ==========================================

use tracing_subscriber::{fmt, EnvFilter};

/// 默认过滤指令: 本库 info, 依赖库 warn
pub const DEFAULT_DIRECTIVE: &str = "warn,scale_weighbridge=info";

fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// 初始化控制台日志
///
/// # 环境变量
/// - RUST_LOG: 例如 `RUST_LOG=scale_weighbridge::engine=debug`
///
/// # 示例
/// ```no_run
/// scale_weighbridge::logging::init();
/// ```
///
/// 重复初始化时静默忽略（已有全局 subscriber）
pub fn init() {
    let result = fmt()
        .with_env_filter(env_filter(DEFAULT_DIRECTIVE))
        .with_target(true)
        .with_line_number(true)
        .try_init();
    if result.is_err() {
        tracing::debug!("日志系统已初始化, 跳过");
    }
}

/// 以 JSON 行格式初始化日志（现场采集日志落盘时使用）
pub fn init_json() {
    let _ = fmt()
        .json()
        .with_env_filter(env_filter(DEFAULT_DIRECTIVE))
        .with_current_span(false)
        .try_init();
}

/// 测试环境日志: debug 级别, 输出到测试捕获
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(env_filter("debug"))
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_test();
        init_test();
        init();
        tracing::info!("日志初始化测试");
    }
}
