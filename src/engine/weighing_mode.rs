// ==========================================
// 地磅称重系统 - 称重模式策略
// ==========================================
// 两次称重: seq 1 = 皮重(gross=false), seq 2 = 毛重(gross=true)
// 固定皮重: seq 1 = 毛重(gross=true) + 车辆预存皮重; seq 0 = 可选皮重标记
// 红线: 纯计算，不访问存储
// ==========================================

use crate::domain::transaction::WeighEvent;
use crate::domain::types::WeighingMode;
use crate::engine::error::{WeighingError, WeighingResult};

/// 称重策略
pub trait WeighingStrategy: Send + Sync {
    fn mode(&self) -> WeighingMode;

    /// 完成交易所必需的 (seq, is_gross) 序列，按采集顺序
    fn required_sequences(&self) -> &'static [(i32, bool)];

    /// 是否依赖车辆预存皮重
    fn uses_external_tare(&self) -> bool {
        false
    }

    fn required_capture_count(&self) -> usize {
        self.required_sequences().len()
    }

    /// (seq, is_gross) 组合是否属于本模式
    fn validate_sequence(&self, seq: i32, is_gross: bool) -> bool {
        self.required_sequences().contains(&(seq, is_gross))
    }

    /// 已采集的必需事件个数
    fn captured_count(&self, events: &[WeighEvent]) -> usize {
        self.required_sequences()
            .iter()
            .filter(|(seq, gross)| find_event(events, *seq, *gross).is_some())
            .count()
    }

    /// 下一次应采集的 (seq, is_gross)，全部完成时返回 None
    fn next_capture(&self, events: &[WeighEvent]) -> Option<(i32, bool)> {
        self.required_sequences()
            .iter()
            .copied()
            .find(|(seq, gross)| find_event(events, *seq, *gross).is_none())
    }

    fn is_satisfied(&self, events: &[WeighEvent]) -> bool {
        self.next_capture(events).is_none()
    }

    /// 计算净重（未舍入）
    fn compute_net_weight(
        &self,
        events: &[WeighEvent],
        external_tare: Option<f64>,
    ) -> WeighingResult<f64>;
}

fn find_event(events: &[WeighEvent], seq: i32, is_gross: bool) -> Option<&WeighEvent> {
    events
        .iter()
        .find(|e| e.seq == seq && e.is_gross == is_gross)
}

fn ensure_complete(strategy: &dyn WeighingStrategy, events: &[WeighEvent]) -> WeighingResult<()> {
    if strategy.is_satisfied(events) {
        Ok(())
    } else {
        Err(WeighingError::IncompleteWeighing {
            required: strategy.required_capture_count(),
            captured: strategy.captured_count(events),
        })
    }
}

fn non_negative(net: f64, gross: f64, tare: f64) -> WeighingResult<f64> {
    if net < 0.0 {
        return Err(WeighingError::validation(format!(
            "净重为负: 毛重 {} < 皮重 {}",
            gross, tare
        )));
    }
    Ok(net)
}

// ==========================================
// TwoPassWeighing - 两次称重
// ==========================================
#[derive(Debug, Clone, Copy, Default)]
pub struct TwoPassWeighing;

impl WeighingStrategy for TwoPassWeighing {
    fn mode(&self) -> WeighingMode {
        WeighingMode::TwoPass
    }

    fn required_sequences(&self) -> &'static [(i32, bool)] {
        &[(1, false), (2, true)]
    }

    fn compute_net_weight(
        &self,
        events: &[WeighEvent],
        _external_tare: Option<f64>,
    ) -> WeighingResult<f64> {
        ensure_complete(self, events)?;
        let (tare, gross) = match (find_event(events, 1, false), find_event(events, 2, true)) {
            (Some(t), Some(g)) => (t.weight, g.weight),
            _ => {
                return Err(WeighingError::IncompleteWeighing {
                    required: self.required_capture_count(),
                    captured: self.captured_count(events),
                })
            }
        };
        non_negative(gross - tare, gross, tare)
    }
}

// ==========================================
// FixedTareWeighing - 固定皮重
// ==========================================
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedTareWeighing;

/// 固定皮重模式下的皮重标记序号
pub const TARE_MARKER_SEQ: i32 = 0;

impl WeighingStrategy for FixedTareWeighing {
    fn mode(&self) -> WeighingMode {
        WeighingMode::FixedTare
    }

    fn required_sequences(&self) -> &'static [(i32, bool)] {
        &[(1, true)]
    }

    fn uses_external_tare(&self) -> bool {
        true
    }

    fn validate_sequence(&self, seq: i32, is_gross: bool) -> bool {
        (seq, is_gross) == (TARE_MARKER_SEQ, false) || (seq, is_gross) == (1, true)
    }

    fn compute_net_weight(
        &self,
        events: &[WeighEvent],
        external_tare: Option<f64>,
    ) -> WeighingResult<f64> {
        ensure_complete(self, events)?;
        let gross = match find_event(events, 1, true) {
            Some(g) => g.weight,
            None => {
                return Err(WeighingError::IncompleteWeighing {
                    required: 1,
                    captured: 0,
                })
            }
        };
        // 车号由调用方补齐
        let tare = external_tare.ok_or_else(|| WeighingError::MissingTareReference {
            vehicle_no: String::new(),
        })?;
        non_negative(gross - tare, gross, tare)
    }
}

/// 按模式获取策略实例
pub fn strategy_for(mode: WeighingMode) -> &'static dyn WeighingStrategy {
    match mode {
        WeighingMode::TwoPass => &TwoPassWeighing,
        WeighingMode::FixedTare => &FixedTareWeighing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ev(seq: i32, is_gross: bool, weight: f64) -> WeighEvent {
        WeighEvent {
            id: format!("e{}", seq),
            transaction_id: "t1".to_string(),
            seq,
            is_gross,
            weight,
            is_stable: true,
            captured_at: Utc::now(),
            raw_payload: String::new(),
            photo_ref: None,
        }
    }

    #[test]
    fn test_two_pass_net_weight() {
        let s = strategy_for(WeighingMode::TwoPass);
        let events = vec![ev(1, false, 8000.0), ev(2, true, 23000.0)];
        assert_eq!(s.required_capture_count(), 2);
        assert_eq!(s.compute_net_weight(&events, None).unwrap(), 15000.0);
    }

    #[test]
    fn test_two_pass_sequence_rules() {
        let s = TwoPassWeighing;
        assert!(s.validate_sequence(1, false));
        assert!(s.validate_sequence(2, true));
        assert!(!s.validate_sequence(1, true));
        assert!(!s.validate_sequence(0, false));
        assert!(!s.validate_sequence(3, true));
    }

    #[test]
    fn test_two_pass_incomplete() {
        let s = TwoPassWeighing;
        let events = vec![ev(1, false, 8000.0)];
        assert_eq!(s.next_capture(&events), Some((2, true)));
        let err = s.compute_net_weight(&events, None).unwrap_err();
        assert!(matches!(
            err,
            WeighingError::IncompleteWeighing { required: 2, captured: 1 }
        ));
    }

    #[test]
    fn test_negative_net_is_rejected() {
        let s = TwoPassWeighing;
        let events = vec![ev(1, false, 23000.0), ev(2, true, 8000.0)];
        assert!(matches!(
            s.compute_net_weight(&events, None),
            Err(WeighingError::Validation(_))
        ));
    }

    #[test]
    fn test_fixed_tare_uses_external_tare() {
        let s = strategy_for(WeighingMode::FixedTare);
        let events = vec![ev(1, true, 20000.0)];
        assert_eq!(s.required_capture_count(), 1);
        assert_eq!(s.compute_net_weight(&events, Some(7500.0)).unwrap(), 12500.0);
    }

    #[test]
    fn test_fixed_tare_marker_is_optional() {
        let s = FixedTareWeighing;
        assert!(s.validate_sequence(0, false));
        assert!(s.validate_sequence(1, true));
        assert!(!s.validate_sequence(2, true));

        let events = vec![ev(0, false, 7400.0)];
        assert_eq!(s.next_capture(&events), Some((1, true)));
        assert_eq!(s.captured_count(&events), 0);
    }

    #[test]
    fn test_fixed_tare_missing_reference() {
        let s = FixedTareWeighing;
        let events = vec![ev(1, true, 20000.0)];
        assert!(matches!(
            s.compute_net_weight(&events, None),
            Err(WeighingError::MissingTareReference { .. })
        ));
        assert!(matches!(
            s.compute_net_weight(&[], Some(7500.0)),
            Err(WeighingError::IncompleteWeighing { .. })
        ));
    }
}
