// ==========================================
// 地磅称重系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写
// 存储: config_kv 表 (key-value), 缺失键回落到默认值
// ==========================================

use crate::auth::Role;
use crate::db::open_sqlite_connection;
use crate::engine::ticket::{TicketConfig, TicketResetMode};
use crate::engine::transaction_manager::{ManagerConfig, MAX_NET_WEIGHT_DECIMALS};
use crate::engine::weight_validator::ValidatorConfig;
use crate::engine::workflow::WorkflowConfig;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::retry::RetryPolicy;
use crate::repository::sql_time::fmt_ts;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

// ==========================================
// 配置聚合
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeighbridgeConfig {
    pub validator: ValidatorConfig,
    pub workflow: WorkflowConfig,
    /// 含票号配置
    pub manager: ManagerConfig,
    /// 作废所需最低角色
    pub void_min_role: Role,
    pub retry: RetryPolicy,
}

impl Default for WeighbridgeConfig {
    fn default() -> Self {
        Self {
            validator: ValidatorConfig::default(),
            workflow: WorkflowConfig::default(),
            manager: ManagerConfig::default(),
            void_min_role: Role::Supervisor,
            retry: RetryPolicy::default(),
        }
    }
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 打开数据库文件创建 ConfigManager
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 读取配置值
    pub fn get_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入配置值（UPSERT）
    pub fn update_config(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO config_kv (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            params![key, value, fmt_ts(&Utc::now())],
        )?;
        tracing::info!(key, value, "配置已更新");
        Ok(())
    }

    /// 获取所有配置的快照（JSON）
    pub fn get_config_snapshot(&self) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM config_kv ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut config_map: BTreeMap<String, String> = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        serde_json::to_string(&config_map)
            .map_err(|e| RepositoryError::InternalError(format!("配置快照序列化失败: {}", e)))
    }

    /// 读取并解析配置, 缺失或格式错误时使用默认值
    fn get_parsed<T>(&self, key: &str, default: T) -> RepositoryResult<T>
    where
        T: FromStr,
    {
        let Some(raw) = self.get_config_value(key)? else {
            return Ok(default);
        };
        match raw.trim().parse::<T>() {
            Ok(v) => Ok(v),
            Err(_) => {
                tracing::warn!(config_key = key, raw_value = %raw, "配置格式错误，使用默认值");
                Ok(default)
            }
        }
    }

    // ==========================================
    // 分组读取
    // ==========================================

    pub fn validator_config(&self) -> RepositoryResult<ValidatorConfig> {
        let d = ValidatorConfig::default();
        let max_age: f64 = self.get_parsed(config_keys::WINDOW_MAX_AGE_SECS, 0.0)?;
        Ok(ValidatorConfig {
            min_weight: self.get_parsed(config_keys::MIN_WEIGHT, d.min_weight)?,
            max_weight: self.get_parsed(config_keys::MAX_WEIGHT, d.max_weight)?,
            stability_threshold: self.get_parsed(config_keys::STABILITY_THRESHOLD, d.stability_threshold)?,
            stability_duration_secs: self
                .get_parsed(config_keys::STABILITY_DURATION_SECS, d.stability_duration_secs)?,
            window_size: self.get_parsed(config_keys::WINDOW_SIZE, d.window_size)?,
            max_age_secs: if max_age > 0.0 { Some(max_age) } else { None },
            anomaly_threshold: self.get_parsed(config_keys::ANOMALY_THRESHOLD, d.anomaly_threshold)?,
            trend_radius: self.get_parsed(config_keys::TREND_RADIUS, d.trend_radius)?,
            oscillation_threshold: self
                .get_parsed(config_keys::OSCILLATION_THRESHOLD, d.oscillation_threshold)?,
        })
    }

    pub fn workflow_config(&self) -> RepositoryResult<WorkflowConfig> {
        let d = WorkflowConfig::default();
        Ok(WorkflowConfig {
            auto_capture_enabled: self
                .get_parsed(config_keys::AUTO_CAPTURE_ENABLED, d.auto_capture_enabled)?,
            auto_capture_delay_secs: self
                .get_parsed(config_keys::AUTO_CAPTURE_DELAY_SECS, d.auto_capture_delay_secs)?,
            require_stable_capture: self
                .get_parsed(config_keys::REQUIRE_STABLE_CAPTURE, d.require_stable_capture)?,
            record_tare_marker: self.get_parsed(config_keys::RECORD_TARE_MARKER, d.record_tare_marker)?,
        })
    }

    pub fn ticket_config(&self) -> RepositoryResult<TicketConfig> {
        let d = TicketConfig::default();
        let prefix = self
            .get_config_value(config_keys::TICKET_PREFIX)?
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or(d.prefix);
        Ok(TicketConfig {
            prefix,
            padding: self.get_parsed(config_keys::TICKET_PADDING, d.padding)?,
            reset: self.get_parsed::<TicketResetMode>(config_keys::TICKET_RESET, d.reset)?,
        })
    }

    pub fn manager_config(&self) -> RepositoryResult<ManagerConfig> {
        let d = ManagerConfig::default();
        Ok(ManagerConfig {
            net_weight_decimals: self
                .get_parsed(config_keys::NET_WEIGHT_DECIMALS, d.net_weight_decimals)?
                .min(MAX_NET_WEIGHT_DECIMALS),
            stale_pending_hours: self
                .get_parsed(config_keys::STALE_PENDING_HOURS, d.stale_pending_hours)?,
            ticket: self.ticket_config()?,
        })
    }

    pub fn retry_policy(&self) -> RepositoryResult<RetryPolicy> {
        let d = RetryPolicy::default();
        Ok(RetryPolicy {
            max_attempts: self.get_parsed(config_keys::RETRY_MAX_ATTEMPTS, d.max_attempts)?,
            backoff_ms: self.get_parsed(config_keys::RETRY_BACKOFF_MS, d.backoff_ms)?,
        })
    }

    /// 读取完整配置
    pub fn load(&self) -> RepositoryResult<WeighbridgeConfig> {
        Ok(WeighbridgeConfig {
            validator: self.validator_config()?,
            workflow: self.workflow_config()?,
            manager: self.manager_config()?,
            void_min_role: self.get_parsed(config_keys::VOID_MIN_ROLE, Role::Supervisor)?,
            retry: self.retry_policy()?,
        })
    }
}

/// 获取默认数据库路径
///
/// 优先使用环境变量 `WEIGHBRIDGE_DB_PATH`，否则放在用户数据目录下。
pub fn default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var("WEIGHBRIDGE_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./weighbridge.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("scale-weighbridge");
        // 目录创建失败时退回当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("weighbridge.db");
        }
    }
    path.to_string_lossy().to_string()
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 校验器
    pub const MIN_WEIGHT: &str = "min_weight";
    pub const MAX_WEIGHT: &str = "max_weight";
    pub const STABILITY_THRESHOLD: &str = "stability_threshold";
    pub const STABILITY_DURATION_SECS: &str = "stability_duration_secs";
    pub const WINDOW_SIZE: &str = "window_size";
    pub const WINDOW_MAX_AGE_SECS: &str = "window_max_age_secs"; // 0 = 不按时长淘汰
    pub const ANOMALY_THRESHOLD: &str = "anomaly_threshold";
    pub const TREND_RADIUS: &str = "trend_radius";
    pub const OSCILLATION_THRESHOLD: &str = "oscillation_threshold";

    // 票号
    pub const TICKET_PREFIX: &str = "ticket_prefix";
    pub const TICKET_PADDING: &str = "ticket_padding";
    pub const TICKET_RESET: &str = "ticket_reset"; // never / yearly

    // 交易
    pub const NET_WEIGHT_DECIMALS: &str = "net_weight_decimals";
    pub const STALE_PENDING_HOURS: &str = "stale_pending_hours";
    pub const VOID_MIN_ROLE: &str = "void_min_role";

    // 流程
    pub const AUTO_CAPTURE_ENABLED: &str = "auto_capture_enabled";
    pub const AUTO_CAPTURE_DELAY_SECS: &str = "auto_capture_delay_secs";
    pub const REQUIRE_STABLE_CAPTURE: &str = "require_stable_capture";
    pub const RECORD_TARE_MARKER: &str = "record_tare_marker";

    // 持久化重试
    pub const RETRY_MAX_ATTEMPTS: &str = "retry_max_attempts";
    pub const RETRY_BACKOFF_MS: &str = "retry_backoff_ms";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> ConfigManager {
        let conn = crate::db::open_in_memory().unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn test_defaults_when_empty() {
        let manager = setup();
        let config = manager.load().unwrap();
        assert_eq!(config, WeighbridgeConfig::default());
        assert_eq!(config.validator.max_weight, 100_000.0);
        assert_eq!(config.manager.ticket.prefix, "SC");
        assert_eq!(config.manager.ticket.reset, TicketResetMode::Yearly);
        assert_eq!(config.void_min_role, Role::Supervisor);
        assert!(config.workflow.auto_capture_enabled);
    }

    #[test]
    fn test_update_and_reload() {
        let manager = setup();
        manager.update_config(config_keys::TICKET_PREFIX, "WB").unwrap();
        manager.update_config(config_keys::TICKET_RESET, "never").unwrap();
        manager.update_config(config_keys::VOID_MIN_ROLE, "admin").unwrap();
        manager.update_config(config_keys::STABILITY_THRESHOLD, "2.5").unwrap();
        manager.update_config(config_keys::WINDOW_MAX_AGE_SECS, "10").unwrap();
        manager.update_config(config_keys::AUTO_CAPTURE_ENABLED, "false").unwrap();

        let config = manager.load().unwrap();
        assert_eq!(config.manager.ticket.prefix, "WB");
        assert_eq!(config.manager.ticket.reset, TicketResetMode::Never);
        assert_eq!(config.void_min_role, Role::Admin);
        assert_eq!(config.validator.stability_threshold, 2.5);
        assert_eq!(config.validator.max_age_secs, Some(10.0));
        assert!(!config.workflow.auto_capture_enabled);
    }

    #[test]
    fn test_malformed_value_falls_back() {
        let manager = setup();
        manager.update_config(config_keys::MAX_WEIGHT, "lots").unwrap();
        let config = manager.validator_config().unwrap();
        assert_eq!(config.max_weight, 100_000.0);
    }

    #[test]
    fn test_net_weight_decimals_clamped() {
        let manager = setup();
        manager
            .update_config(config_keys::NET_WEIGHT_DECIMALS, "4294967295")
            .unwrap();
        let config = manager.manager_config().unwrap();
        assert_eq!(config.net_weight_decimals, MAX_NET_WEIGHT_DECIMALS);

        manager.update_config(config_keys::NET_WEIGHT_DECIMALS, "3").unwrap();
        assert_eq!(manager.manager_config().unwrap().net_weight_decimals, 3);
    }

    #[test]
    fn test_snapshot_lists_keys() {
        let manager = setup();
        manager.update_config(config_keys::MIN_WEIGHT, "10").unwrap();
        manager.update_config(config_keys::TICKET_PREFIX, "SC").unwrap();
        let snapshot: BTreeMap<String, String> =
            serde_json::from_str(&manager.get_config_snapshot().unwrap()).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("min_weight").map(String::as_str), Some("10"));
    }
}
