// ==========================================
// 地磅称重系统 - 核心库
// ==========================================
// 职责: 称重交易引擎 (开单 / 采集 / 完成 / 作废)
// 技术栈: Rust + SQLite + Tokio
// 系统定位: 现场操作员发起, 引擎负责校验与落账
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则与流程
pub mod engine;

// 权限层 - 角色与会话
pub mod auth;

// 时钟抽象
pub mod clock;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// 称重数据源（仪表 / 模拟器）
pub mod source;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{AuditOutcome, TransactionStatus, WeighingMode};

// 领域实体
pub use domain::{
    AuditAction, AuditEntry, CaptureRequest, NewTransaction, Transaction, TransactionFilter,
    WeighEvent, WeightSample,
};

// 引擎
pub use engine::{
    TransactionManager, WeighingError, WeighingResult, WeightValidator, WorkflowController,
    WorkflowEvent, WorkflowState,
};

// 权限
pub use auth::{OperatorSession, Permission, Role, RolePermissionGateway};

// 仓储
pub use repository::{PersistenceGateway, RepositoryError, TransactionRepository};

// 配置
pub use config::{ConfigManager, WeighbridgeConfig};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "地磅称重系统";
