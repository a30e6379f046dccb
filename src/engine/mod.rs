// ==========================================
// 地磅称重系统 - 引擎层
// ==========================================
// 职责: 称重业务规则与流程编排, 不拼 SQL
// 红线: Engine 只依赖 PersistenceGateway / PermissionGateway / Clock 抽象
// ==========================================

pub mod error;
pub mod events;
pub mod ticket;
pub mod transaction_manager;
pub mod weighing_mode;
pub mod weight_validator;
pub mod workflow;

// 重导出核心引擎
pub use error::{WeighingError, WeighingResult};
pub use events::{ChannelEventSink, NoOpEventSink, WorkflowEvent, WorkflowEventSink};
pub use ticket::{NeverReset, TicketConfig, TicketResetMode, TicketResetPolicy, YearlyReset};
pub use transaction_manager::{ManagerConfig, TransactionManager};
pub use weighing_mode::{strategy_for, FixedTareWeighing, TwoPassWeighing, WeighingStrategy};
pub use weight_validator::{
    AnomalyKind, ExportFormat, StabilityStatus, ValidatorConfig, WeightAnomaly, WeightValidator,
    WeightWarning, WindowStatistics,
};
pub use workflow::{
    spawn_sample_listener, CaptureOutcome, WorkflowConfig, WorkflowController, WorkflowState,
    WorkflowStatus,
};
