// ==========================================
// 地磅称重系统 - 演示入口
// ==========================================
// 流程: 模拟仪表 → 流程控制器 → 交易管理器 → SQLite
// 数据库路径: WEIGHBRIDGE_DB_PATH 或用户数据目录
// ==========================================

use anyhow::Context;
use scale_weighbridge::auth::{OperatorSession, Role, RolePermissionGateway};
use scale_weighbridge::clock::{Clock, SystemClock};
use scale_weighbridge::config::{default_db_path, ConfigManager};
use scale_weighbridge::db::{init_schema, open_sqlite_connection};
use scale_weighbridge::domain::{NewTransaction, WeighingMode};
use scale_weighbridge::engine::{
    spawn_sample_listener, ChannelEventSink, TransactionManager, WorkflowController, WorkflowState,
};
use scale_weighbridge::repository::TransactionRepository;
use scale_weighbridge::source::simulator::{LoadProfile, SimulatedScale};
use scale_weighbridge::source::WeightSource;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    scale_weighbridge::logging::init();

    tracing::info!("==================================================");
    tracing::info!("{} v{}", scale_weighbridge::APP_NAME, scale_weighbridge::VERSION);
    tracing::info!("==================================================");

    let db_path = default_db_path();
    tracing::info!("使用数据库: {}", db_path);

    let conn = open_sqlite_connection(&db_path).context("无法打开数据库")?;
    init_schema(&conn).context("数据库初始化失败")?;
    let conn = Arc::new(Mutex::new(conn));

    let config = ConfigManager::from_connection(conn.clone())
        .load()
        .context("配置加载失败")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let repo = Arc::new(TransactionRepository::with_retry(conn, config.retry));
    let permissions = Arc::new(RolePermissionGateway::new(config.void_min_role));
    let manager = Arc::new(TransactionManager::new(
        repo,
        permissions,
        clock.clone(),
        config.manager.clone(),
    ));

    let (sink, mut notifications) = ChannelEventSink::channel();
    let session = OperatorSession::new("op-001", "operator", Role::Operator);
    let controller = Arc::new(AsyncMutex::new(WorkflowController::new(
        session,
        manager.clone(),
        config.validator.clone(),
        config.workflow.clone(),
        Arc::new(sink),
    )));

    let scale = SimulatedScale::new(clock);
    let listener = spawn_sample_listener(controller.clone(), scale.subscribe());

    let vehicle_no = std::env::args().nth(1).unwrap_or_else(|| "ABC-1234".to_string());
    let started = controller
        .lock()
        .await
        .start_weighing(&NewTransaction::new(vehicle_no, WeighingMode::TwoPass))?;
    tracing::info!(ticket = %started.ticket_label, "开单成功");

    // 自动采集在稳定持续后触发, 曲线稳定段需覆盖稳定时长与延时
    let period = Duration::from_millis(250);
    let mut profile = LoadProfile::new(2500.0);
    profile.settle_steps = 30;
    for target in [2500.0, 8750.0] {
        profile.target_weight = target;
        scale.set_profile(profile.clone(), period);
        scale.start().await?;
        while scale.is_running() {
            tokio::time::sleep(period).await;
        }
        if controller.lock().await.state() == WorkflowState::Completed {
            break;
        }
    }

    let status = controller.lock().await.status();
    tracing::info!(state = %status.state, step = %status.step_description, "流程结束");

    drop(scale);
    let _ = listener.await;

    while let Ok(event) = notifications.try_recv() {
        println!("{}", serde_json::to_string(&event)?);
    }

    for tx in manager.get_recent_transactions(5)? {
        println!(
            "{} {} {} {:?}",
            tx.ticket_label,
            tx.vehicle_no,
            tx.status.to_db_str(),
            tx.net_weight
        );
    }

    Ok(())
}
