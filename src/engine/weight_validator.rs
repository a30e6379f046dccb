// ==========================================
// 地磅称重系统 - 重量校验器
// ==========================================
// 职责: 滚动窗口内的量程校验 / 稳定判定 / 异常标记 / 统计
// 红线: 只有量程越界是硬错误; 稳定与异常只做判定, 不阻断
// ==========================================

use crate::domain::sample::WeightSample;
use crate::engine::error::{WeighingError, WeighingResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

// ==========================================
// 配置
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    pub min_weight: f64,
    pub max_weight: f64,
    /// 相邻样本允许的最大差值 (kg)
    pub stability_threshold: f64,
    /// 稳定段需持续的秒数
    pub stability_duration_secs: f64,
    /// 窗口最大样本数
    pub window_size: usize,
    /// 窗口最大时长（秒），None = 只按样本数淘汰
    pub max_age_secs: Option<f64>,
    /// 偏离局部趋势的异常阈值 (kg)
    pub anomaly_threshold: f64,
    /// 局部趋势取左右各 N 个样本
    pub trend_radius: usize,
    /// 振荡判定的单步阈值 (kg)
    pub oscillation_threshold: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_weight: 0.0,
            max_weight: 100_000.0,
            stability_threshold: 5.0,
            stability_duration_secs: 3.0,
            window_size: 20,
            max_age_secs: None,
            anomaly_threshold: 1_000.0,
            trend_radius: 2,
            oscillation_threshold: 50.0,
        }
    }
}

// ==========================================
// 窗口内的读数
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightReading {
    pub weight: f64,
    pub timestamp: DateTime<Utc>,
    /// 仪表稳定标志或校验器判定稳定
    pub is_stable: bool,
    pub raw_data: String,
}

/// 非阻断告警
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WeightWarning {
    ZeroReading,
    RoundNumber { weight: f64 },
}

impl WeightWarning {
    pub fn description(&self) -> String {
        match self {
            WeightWarning::ZeroReading => "读数为零".to_string(),
            WeightWarning::RoundNumber { weight } => format!("读数 {} kg 为可疑整数", weight),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    TrendDeviation,
    Oscillation,
}

/// 异常诊断条目（只标记，不丢弃样本）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightAnomaly {
    pub kind: AnomalyKind,
    pub description: String,
    /// 窗口内下标（振荡为最后一个样本）
    pub reading_index: usize,
    pub weight: f64,
}

/// 单个样本的判定结果
#[derive(Debug, Clone, PartialEq)]
pub struct SampleVerdict {
    pub is_stable: bool,
    pub stable_weight: Option<f64>,
    pub warnings: Vec<WeightWarning>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowStatistics {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// 样本标准差，少于两个样本时为 None
    pub std_dev: Option<f64>,
    pub latest: f64,
    pub stable_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityStatus {
    pub is_stable: bool,
    pub stable_weight: Option<f64>,
    pub run_duration_secs: f64,
    pub max_deviation: Option<f64>,
    pub sample_count: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl FromStr for ExportFormat {
    type Err = WeighingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(WeighingError::validation(format!("不支持的导出格式: {}", other))),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Csv => write!(f, "csv"),
            ExportFormat::Json => write!(f, "json"),
        }
    }
}

// 当前连续稳定段（不受窗口淘汰影响）
#[derive(Debug, Clone)]
struct StableRun {
    started_at: DateTime<Utc>,
    last_weight: f64,
    last_at: DateTime<Utc>,
    samples: usize,
    max_step: f64,
    stable_since: Option<DateTime<Utc>>,
}

// ==========================================
// WeightValidator
// ==========================================
pub struct WeightValidator {
    config: ValidatorConfig,
    window: VecDeque<WeightReading>,
    run: Option<StableRun>,
}

impl WeightValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        let capacity = config.window_size.max(1);
        Self {
            config,
            window: VecDeque::with_capacity(capacity),
            run: None,
        }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// 更新配置（窗口按新上限立即裁剪）
    pub fn configure(&mut self, config: ValidatorConfig) {
        self.config = config;
        self.enforce_count_limit();
    }

    // ==========================================
    // 量程 / 告警
    // ==========================================

    /// 量程校验，返回非阻断告警
    pub fn validate_weight(&self, weight: f64) -> WeighingResult<Vec<WeightWarning>> {
        if !weight.is_finite() {
            return Err(WeighingError::validation(format!("无效读数: {}", weight)));
        }
        if weight < self.config.min_weight {
            return Err(WeighingError::validation(format!(
                "重量 {} kg 低于下限 {} kg",
                weight, self.config.min_weight
            )));
        }
        if weight > self.config.max_weight {
            return Err(WeighingError::validation(format!(
                "重量 {} kg 超过上限 {} kg",
                weight, self.config.max_weight
            )));
        }

        let mut warnings = Vec::new();
        if weight == 0.0 {
            warnings.push(WeightWarning::ZeroReading);
        }
        if weight > 100.0 && weight % 10.0 == 0.0 {
            warnings.push(WeightWarning::RoundNumber { weight });
        }
        Ok(warnings)
    }

    // ==========================================
    // 样本输入
    // ==========================================

    /// 加入一个样本; 越界样本返回错误且不进入窗口
    pub fn add_sample(&mut self, sample: &WeightSample) -> WeighingResult<SampleVerdict> {
        let warnings = self.validate_weight(sample.weight)?;

        self.advance_run(sample.weight, sample.timestamp);
        let is_stable = self.is_stable();

        self.evict_expired(sample.timestamp);
        self.window.push_back(WeightReading {
            weight: sample.weight,
            timestamp: sample.timestamp,
            is_stable: sample.stable || is_stable,
            raw_data: sample.raw.clone(),
        });
        self.enforce_count_limit();

        tracing::debug!(
            weight = sample.weight,
            stable = is_stable,
            window = self.window.len(),
            "样本入窗"
        );

        Ok(SampleVerdict {
            is_stable,
            stable_weight: self.stable_weight(),
            warnings,
        })
    }

    fn advance_run(&mut self, weight: f64, at: DateTime<Utc>) {
        let threshold = self.config.stability_threshold;
        let continues = match &self.run {
            Some(run) => (weight - run.last_weight).abs() <= threshold && at >= run.last_at,
            None => false,
        };

        if continues {
            if let Some(run) = self.run.as_mut() {
                run.max_step = run.max_step.max((weight - run.last_weight).abs());
                run.last_weight = weight;
                run.last_at = at;
                run.samples += 1;
            }
        } else {
            self.run = Some(StableRun {
                started_at: at,
                last_weight: weight,
                last_at: at,
                samples: 1,
                max_step: 0.0,
                stable_since: None,
            });
        }

        let required = duration_secs_to_ms(self.config.stability_duration_secs);
        if let Some(run) = self.run.as_mut() {
            let spanned = (run.last_at - run.started_at).num_milliseconds();
            if run.stable_since.is_none() && run.samples >= 2 && spanned >= required {
                run.stable_since = Some(at);
            }
        }
    }

    fn evict_expired(&mut self, now: DateTime<Utc>) {
        if let Some(max_age) = self.config.max_age_secs {
            let max_age_ms = duration_secs_to_ms(max_age);
            while let Some(front) = self.window.front() {
                if (now - front.timestamp).num_milliseconds() > max_age_ms {
                    self.window.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    fn enforce_count_limit(&mut self) {
        let limit = self.config.window_size.max(1);
        while self.window.len() > limit {
            self.window.pop_front();
        }
    }

    // ==========================================
    // 稳定判定
    // ==========================================

    pub fn is_stable(&self) -> bool {
        self.run
            .as_ref()
            .map(|run| run.stable_since.is_some())
            .unwrap_or(false)
    }

    /// 稳定时返回稳定段中最新的读数
    pub fn stable_weight(&self) -> Option<f64> {
        self.run
            .as_ref()
            .filter(|run| run.stable_since.is_some())
            .map(|run| run.last_weight)
    }

    /// 本次稳定开始的时刻（首次满足持续时长的样本时间）
    pub fn stable_since(&self) -> Option<DateTime<Utc>> {
        self.run.as_ref().and_then(|run| run.stable_since)
    }

    pub fn stability_status(&self) -> StabilityStatus {
        let Some(run) = self.run.as_ref() else {
            return StabilityStatus {
                is_stable: false,
                stable_weight: None,
                run_duration_secs: 0.0,
                max_deviation: None,
                sample_count: self.window.len(),
                message: "暂无读数".to_string(),
            };
        };

        let run_duration_secs = (run.last_at - run.started_at).num_milliseconds() as f64 / 1000.0;
        let is_stable = run.stable_since.is_some();
        let message = if is_stable {
            format!("重量稳定: {} kg", run.last_weight)
        } else if run.samples < 2 {
            "等待更多读数".to_string()
        } else {
            format!(
                "稳定中: 已持续 {:.1}s / 需要 {:.1}s",
                run_duration_secs, self.config.stability_duration_secs
            )
        };

        StabilityStatus {
            is_stable,
            stable_weight: if is_stable { Some(run.last_weight) } else { None },
            run_duration_secs,
            max_deviation: if run.samples >= 2 { Some(run.max_step) } else { None },
            sample_count: self.window.len(),
            message,
        }
    }

    // ==========================================
    // 异常检测
    // ==========================================

    pub fn detect_anomalies(&self) -> Vec<WeightAnomaly> {
        let weights: Vec<f64> = self.window.iter().map(|r| r.weight).collect();
        let mut anomalies = Vec::new();
        if weights.len() < 3 {
            return anomalies;
        }

        let radius = self.config.trend_radius.max(1);
        for (i, &w) in weights.iter().enumerate() {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius).min(weights.len() - 1);
            let neighbours: Vec<f64> = (lo..=hi).filter(|&j| j != i).map(|j| weights[j]).collect();
            if neighbours.is_empty() {
                continue;
            }
            let trend = neighbours.iter().sum::<f64>() / neighbours.len() as f64;
            let deviation = (w - trend).abs();
            if deviation > self.config.anomaly_threshold {
                anomalies.push(WeightAnomaly {
                    kind: AnomalyKind::TrendDeviation,
                    description: format!("偏离局部趋势 {:.1} kg (趋势 {:.1} kg)", deviation, trend),
                    reading_index: i,
                    weight: w,
                });
            }
        }

        if weights.len() >= 5 {
            let last5 = &weights[weights.len() - 5..];
            let steps: Vec<f64> = last5.windows(2).map(|p| p[1] - p[0]).collect();
            let alternating = steps
                .windows(2)
                .all(|p| p[0].signum() != p[1].signum() && p[0] != 0.0 && p[1] != 0.0);
            let significant = steps.iter().all(|d| d.abs() > self.config.oscillation_threshold);
            if alternating && significant {
                let amplitude = steps.iter().fold(0.0_f64, |acc, d| acc.max(d.abs()));
                anomalies.push(WeightAnomaly {
                    kind: AnomalyKind::Oscillation,
                    description: format!("重量来回振荡, 幅度 {:.1} kg", amplitude),
                    reading_index: weights.len() - 1,
                    weight: weights[weights.len() - 1],
                });
            }
        }

        anomalies
    }

    // ==========================================
    // 统计 / 导出
    // ==========================================

    pub fn statistics(&self) -> Option<WindowStatistics> {
        let latest = self.window.back()?.weight;
        let weights: Vec<f64> = self.window.iter().map(|r| r.weight).collect();
        let count = weights.len();
        let mean = weights.iter().sum::<f64>() / count as f64;
        let min = weights.iter().copied().fold(f64::INFINITY, f64::min);
        let max = weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let std_dev = if count > 1 {
            let var = weights.iter().map(|w| (w - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
            Some(var.sqrt())
        } else {
            None
        };

        Some(WindowStatistics {
            count,
            mean,
            min,
            max,
            std_dev,
            latest,
            stable_count: self.window.iter().filter(|r| r.is_stable).count(),
        })
    }

    pub fn readings(&self) -> impl Iterator<Item = &WeightReading> {
        self.window.iter()
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// 导出窗口读数（诊断用）
    pub fn export_readings(&self, format: ExportFormat) -> WeighingResult<String> {
        match format {
            ExportFormat::Csv => {
                let mut writer = csv::Writer::from_writer(Vec::new());
                for reading in &self.window {
                    writer
                        .serialize(ExportRow::from(reading))
                        .map_err(|e| WeighingError::Export(e.to_string()))?;
                }
                let bytes = writer
                    .into_inner()
                    .map_err(|e| WeighingError::Export(e.to_string()))?;
                String::from_utf8(bytes).map_err(|e| WeighingError::Export(e.to_string()))
            }
            ExportFormat::Json => {
                let rows: Vec<ExportRow> = self.window.iter().map(ExportRow::from).collect();
                serde_json::to_string_pretty(&rows).map_err(|e| WeighingError::Export(e.to_string()))
            }
        }
    }

    /// 清空窗口与稳定段
    pub fn reset(&mut self) {
        self.window.clear();
        self.run = None;
    }
}

impl Default for WeightValidator {
    fn default() -> Self {
        Self::new(ValidatorConfig::default())
    }
}

#[derive(Serialize)]
struct ExportRow {
    timestamp: String,
    weight: f64,
    is_stable: bool,
    raw_data: String,
}

impl From<&WeightReading> for ExportRow {
    fn from(r: &WeightReading) -> Self {
        Self {
            timestamp: r.timestamp.to_rfc3339(),
            weight: r.weight,
            is_stable: r.is_stable,
            raw_data: r.raw_data.clone(),
        }
    }
}

fn duration_secs_to_ms(secs: f64) -> i64 {
    (secs.max(0.0) * 1000.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 10, 0, 0).unwrap()
    }

    fn sample(weight: f64, secs: f64) -> WeightSample {
        WeightSample::new(weight, false, t0() + Duration::milliseconds((secs * 1000.0) as i64))
    }

    #[test]
    fn test_stable_after_duration() {
        let mut v = WeightValidator::default();
        assert!(!v.add_sample(&sample(8750.0, 0.0)).unwrap().is_stable);
        assert!(!v.add_sample(&sample(8752.0, 1.0)).unwrap().is_stable);
        assert!(!v.add_sample(&sample(8749.0, 2.0)).unwrap().is_stable);
        let verdict = v.add_sample(&sample(8751.0, 3.0)).unwrap();
        assert!(verdict.is_stable);
        assert_eq!(verdict.stable_weight, Some(8751.0));
        assert_eq!(v.stable_since(), Some(t0() + Duration::seconds(3)));
    }

    #[test]
    fn test_large_step_restarts_run() {
        let mut v = WeightValidator::default();
        for i in 0..4 {
            v.add_sample(&sample(8750.0, i as f64)).unwrap();
        }
        assert!(v.is_stable());
        v.add_sample(&sample(8790.0, 4.0)).unwrap();
        assert!(!v.is_stable());
        assert_eq!(v.stable_weight(), None);
    }

    #[test]
    fn test_single_sample_never_stable() {
        let mut v = WeightValidator::new(ValidatorConfig {
            stability_duration_secs: 0.0,
            ..Default::default()
        });
        assert!(!v.add_sample(&sample(5000.0, 0.0)).unwrap().is_stable);
        assert!(v.add_sample(&sample(5000.0, 0.1)).unwrap().is_stable);
    }

    #[test]
    fn test_range_violation_is_error_and_not_added() {
        let mut v = WeightValidator::default();
        for i in 0..4 {
            v.add_sample(&sample(8750.0, i as f64)).unwrap();
        }
        assert!(v.is_stable());

        let err = v.add_sample(&sample(100_001.0, 4.0)).unwrap_err();
        assert!(matches!(err, WeighingError::Validation(_)));
        let err = v.add_sample(&sample(-1.0, 4.0)).unwrap_err();
        assert!(matches!(err, WeighingError::Validation(_)));
        assert!(v.add_sample(&sample(f64::NAN, 4.0)).is_err());

        assert_eq!(v.len(), 4);
        assert!(v.is_stable());
    }

    #[test]
    fn test_window_is_bounded() {
        let mut v = WeightValidator::new(ValidatorConfig {
            window_size: 5,
            ..Default::default()
        });
        for i in 0..12 {
            v.add_sample(&sample(1000.0 + i as f64, i as f64)).unwrap();
        }
        assert_eq!(v.len(), 5);
        assert_eq!(v.readings().next().unwrap().weight, 1007.0);
    }

    #[test]
    fn test_window_max_age() {
        let mut v = WeightValidator::new(ValidatorConfig {
            max_age_secs: Some(2.0),
            ..Default::default()
        });
        for i in 0..6 {
            v.add_sample(&sample(1000.0, i as f64)).unwrap();
        }
        // t=3,4,5 留在窗口
        assert_eq!(v.len(), 3);
    }

    #[test]
    fn test_warnings() {
        let v = WeightValidator::default();
        assert_eq!(v.validate_weight(0.0).unwrap(), vec![WeightWarning::ZeroReading]);
        assert_eq!(
            v.validate_weight(8750.0).unwrap(),
            vec![WeightWarning::RoundNumber { weight: 8750.0 }]
        );
        assert!(v.validate_weight(8751.5).unwrap().is_empty());
        assert!(v.validate_weight(100.0).unwrap().is_empty());
    }

    #[test]
    fn test_trend_deviation_flagged_not_discarded() {
        let mut v = WeightValidator::default();
        let weights = [5000.0, 5001.0, 5002.0, 7000.0, 5001.0, 4999.0, 5000.0];
        for (i, w) in weights.iter().enumerate() {
            v.add_sample(&sample(*w, i as f64)).unwrap();
        }
        let anomalies = v.detect_anomalies();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::TrendDeviation);
        assert_eq!(anomalies[0].reading_index, 3);
        assert_eq!(anomalies[0].weight, 7000.0);
        assert_eq!(v.len(), 7);
    }

    #[test]
    fn test_oscillation_flagged() {
        let mut v = WeightValidator::default();
        for (i, w) in [5000.0, 5100.0, 5000.0, 5100.0, 5000.0].iter().enumerate() {
            v.add_sample(&sample(*w, i as f64)).unwrap();
        }
        let anomalies = v.detect_anomalies();
        assert!(anomalies.iter().any(|a| a.kind == AnomalyKind::Oscillation));
        assert!(anomalies.iter().all(|a| a.kind != AnomalyKind::TrendDeviation));
    }

    #[test]
    fn test_statistics() {
        let mut v = WeightValidator::default();
        assert!(v.statistics().is_none());
        for (i, w) in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0].iter().enumerate() {
            v.add_sample(&sample(*w, i as f64 * 10.0)).unwrap();
        }
        let stats = v.statistics().unwrap();
        assert_eq!(stats.count, 8);
        assert_eq!(stats.mean, 5.0);
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 9.0);
        assert_eq!(stats.latest, 9.0);
        let sd = stats.std_dev.unwrap();
        assert!((sd - (32.0_f64 / 7.0).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_stability_status_messages() {
        let mut v = WeightValidator::default();
        assert!(!v.stability_status().is_stable);
        v.add_sample(&sample(3000.0, 0.0)).unwrap();
        v.add_sample(&sample(3003.0, 1.5)).unwrap();
        let status = v.stability_status();
        assert!(!status.is_stable);
        assert_eq!(status.max_deviation, Some(3.0));
        assert_eq!(status.run_duration_secs, 1.5);

        v.add_sample(&sample(3001.0, 3.0)).unwrap();
        let status = v.stability_status();
        assert!(status.is_stable);
        assert_eq!(status.stable_weight, Some(3001.0));
    }

    #[test]
    fn test_export_csv_and_json() {
        let mut v = WeightValidator::default();
        v.add_sample(&sample(1234.5, 0.0)).unwrap();
        v.add_sample(&sample(1235.5, 1.0)).unwrap();

        let csv_text = v.export_readings(ExportFormat::Csv).unwrap();
        let mut lines = csv_text.lines();
        assert_eq!(lines.next(), Some("timestamp,weight,is_stable,raw_data"));
        assert_eq!(csv_text.lines().count(), 3);

        let json_text = v.export_readings("json".parse().unwrap()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json_text).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 2);
        assert_eq!(parsed[1]["weight"], 1235.5);

        assert!("xml".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_reset_clears_state() {
        let mut v = WeightValidator::default();
        for i in 0..4 {
            v.add_sample(&sample(8750.0, i as f64)).unwrap();
        }
        v.reset();
        assert!(v.is_empty());
        assert!(!v.is_stable());
    }
}
