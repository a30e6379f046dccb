// ==========================================
// 地磅称重系统 - 角色权限
// ==========================================
// 角色全序: Operator < Supervisor < Admin
// 所有“至少某角色”的判断都比较枚举顺序
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Operator,
    Supervisor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Operator => "operator",
            Role::Supervisor => "supervisor",
            Role::Admin => "admin",
        }
    }

    pub fn at_least(&self, required: Role) -> bool {
        *self >= required
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "operator" => Ok(Role::Operator),
            "supervisor" => Ok(Role::Supervisor),
            "admin" => Ok(Role::Admin),
            other => Err(format!("未知角色: {}", other)),
        }
    }
}

// ==========================================
// 权限
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    // 称重
    WeighVehicle,
    ViewWeights,
    CaptureWeight,
    // 交易
    CreateTransaction,
    ViewTransaction,
    VoidTransaction,
    // 主数据
    ViewMasterData,
    CreateMasterData,
    UpdateMasterData,
    // 报表 / 审计
    ExportReports,
    ViewAuditLogs,
    // 系统
    UpdateSettings,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::WeighVehicle => "weigh_vehicle",
            Permission::ViewWeights => "view_weights",
            Permission::CaptureWeight => "capture_weight",
            Permission::CreateTransaction => "create_transaction",
            Permission::ViewTransaction => "view_transaction",
            Permission::VoidTransaction => "void_transaction",
            Permission::ViewMasterData => "view_master_data",
            Permission::CreateMasterData => "create_master_data",
            Permission::UpdateMasterData => "update_master_data",
            Permission::ExportReports => "export_reports",
            Permission::ViewAuditLogs => "view_audit_logs",
            Permission::UpdateSettings => "update_settings",
        }
    }

    /// 默认所需的最低角色
    pub fn default_min_role(&self) -> Role {
        match self {
            Permission::WeighVehicle
            | Permission::ViewWeights
            | Permission::CaptureWeight
            | Permission::CreateTransaction
            | Permission::ViewTransaction
            | Permission::ViewMasterData
            | Permission::CreateMasterData => Role::Operator,
            Permission::VoidTransaction
            | Permission::UpdateMasterData
            | Permission::ExportReports
            | Permission::ViewAuditLogs => Role::Supervisor,
            Permission::UpdateSettings => Role::Admin,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 权限判定接口
pub trait PermissionGateway: Send + Sync {
    fn has_permission(&self, role: Role, permission: Permission) -> bool;
}

/// 基于角色顺序的权限判定，作废门槛可配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolePermissionGateway {
    void_min_role: Role,
}

impl RolePermissionGateway {
    pub fn new(void_min_role: Role) -> Self {
        Self { void_min_role }
    }

    pub fn required_role(&self, permission: Permission) -> Role {
        match permission {
            Permission::VoidTransaction => self.void_min_role,
            other => other.default_min_role(),
        }
    }
}

impl Default for RolePermissionGateway {
    fn default() -> Self {
        Self::new(Role::Supervisor)
    }
}

impl PermissionGateway for RolePermissionGateway {
    fn has_permission(&self, role: Role, permission: Permission) -> bool {
        role.at_least(self.required_role(permission))
    }
}
