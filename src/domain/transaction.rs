// ==========================================
// 地磅称重系统 - 称重交易领域模型
// ==========================================
// 对齐: schema transactions / weigh_events / vehicles 表
// 红线: 同一车辆同一时刻最多一笔 pending 交易
// 红线: 称重事件只追加,不修改不删除
// ==========================================

use crate::domain::types::{TransactionStatus, WeighingMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// Transaction - 称重交易
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    // ===== 主键 =====
    pub id: String,            // 交易ID (UUID)
    pub ticket_no: i64,        // 全局单调递增票号 (永不重置)
    pub ticket_label: String,  // 票据编号 (前缀 + 周期 + 周期内序号)

    // ===== 业务字段 =====
    pub vehicle_no: String,
    pub product_id: Option<String>,     // 外部主数据引用
    pub party_id: Option<String>,       // 外部主数据引用
    pub transporter_id: Option<String>, // 外部主数据引用
    pub do_po_no: Option<String>,       // 提货单/采购单号
    pub mode: WeighingMode,
    pub status: TransactionStatus,
    pub net_weight: Option<f64>, // 完成前为 None
    pub notes: Option<String>,

    // ===== 操作人 / 时间 =====
    pub operator_open_id: String,
    pub operator_close_id: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub voided_at: Option<DateTime<Utc>>,
    pub void_reason: Option<String>, // 当且仅当 status=void 时有值
}

impl Transaction {
    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }

    /// 审计快照 (JSON)
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "ticket_no": self.ticket_no,
            "ticket_label": self.ticket_label,
            "vehicle_no": self.vehicle_no,
            "mode": self.mode.as_str(),
            "status": self.status.to_db_str(),
            "net_weight": self.net_weight,
            "void_reason": self.void_reason,
        })
    }
}

// ==========================================
// NewTransaction - 开单请求
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTransaction {
    pub vehicle_no: String,
    pub mode: String, // 原始模式字符串,由管理器解析校验
    pub product_id: Option<String>,
    pub party_id: Option<String>,
    pub transporter_id: Option<String>,
    pub do_po_no: Option<String>,
    pub notes: Option<String>,
}

impl NewTransaction {
    pub fn new(vehicle_no: impl Into<String>, mode: WeighingMode) -> Self {
        Self {
            vehicle_no: vehicle_no.into(),
            mode: mode.as_str().to_string(),
            ..Default::default()
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_references(
        mut self,
        product_id: Option<String>,
        party_id: Option<String>,
        transporter_id: Option<String>,
    ) -> Self {
        self.product_id = product_id;
        self.party_id = party_id;
        self.transporter_id = transporter_id;
        self
    }
}

// ==========================================
// WeighEvent - 称重事件
// ==========================================
// seq: 两次称重 1=皮重 2=毛重; 固定皮重 0=皮重标记(可选) 1=毛重
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeighEvent {
    pub id: String,
    pub transaction_id: String,
    pub seq: i32,
    pub is_gross: bool,
    pub weight: f64,
    pub is_stable: bool,
    pub captured_at: DateTime<Utc>,
    pub raw_payload: String, // 诊断用原始报文
    pub photo_ref: Option<String>,
}

impl WeighEvent {
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "transaction_id": self.transaction_id,
            "seq": self.seq,
            "gross_flag": self.is_gross,
            "weight": self.weight,
            "stable": self.is_stable,
        })
    }
}

// ==========================================
// CaptureRequest - 采集请求
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub transaction_id: String,
    pub weight: f64,
    pub sequence: i32,
    pub is_gross: bool,
    pub is_stable: bool,
    pub raw_payload: Option<String>,
    pub photo_ref: Option<String>,
}

impl CaptureRequest {
    pub fn new(transaction_id: impl Into<String>, weight: f64, sequence: i32, is_gross: bool) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            weight,
            sequence,
            is_gross,
            is_stable: true,
            raw_payload: None,
            photo_ref: None,
        }
    }

    pub fn unstable(mut self) -> Self {
        self.is_stable = false;
        self
    }

    pub fn with_raw_payload(mut self, raw: impl Into<String>) -> Self {
        self.raw_payload = Some(raw.into());
        self
    }
}

// ==========================================
// TransactionFilter - 交易检索条件
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub vehicle_no: Option<String>, // 模糊匹配
    pub ticket_no: Option<i64>,
    pub opened_from: Option<DateTime<Utc>>,
    pub opened_to: Option<DateTime<Utc>>,
    pub status: Option<TransactionStatus>,
    pub limit: Option<usize>,
}

// ==========================================
// VehicleRecord - 车辆主数据 (固定皮重)
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub vehicle_no: String,
    pub fixed_tare: Option<f64>,
    pub updated_at: DateTime<Utc>,
}
