// ==========================================
// 地磅称重系统 - 权限与会话
// ==========================================
// 职责: 角色 / 权限映射, 操作员会话值对象
// 红线: 无全局会话单例, 会话作为值显式传递
// ==========================================

pub mod rbac;
pub mod session;

pub use rbac::{Permission, PermissionGateway, Role, RolePermissionGateway};
pub use session::OperatorSession;
