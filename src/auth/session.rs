use crate::auth::rbac::Role;
use serde::{Deserialize, Serialize};

/// 操作员会话（值对象，随控制器 / 调用显式传递）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorSession {
    pub user_id: String,
    pub username: String,
    pub role: Role,
}

impl OperatorSession {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            role,
        }
    }

    /// 审计中的操作人标识
    pub fn actor(&self) -> &str {
        &self.username
    }
}
