use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-turn cognitive metric snapshot.  All values live in `[0, 1]`.
///
/// Core metrics: COP (cognitive offloading prevention), DTE (deep thinking
/// engagement), SE (scaffolding effectiveness), KI (knowledge integration),
/// LP (learning progression), MA (metacognitive awareness).  Auxiliary
/// metrics track anthropomorphism and interaction health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub turn_index: u32,
    pub ts: DateTime<Utc>,
    pub cop: f32,
    pub dte: f32,
    pub se: f32,
    pub ki: f32,
    pub lp: f32,
    pub ma: f32,
    pub cai: f32,
    pub ads: f32,
    pub nes: f32,
    pub pbi: f32,
    pub brs: f32,
    /// Weighted composite of the six core metrics.
    pub effectiveness: f32,
}

impl MetricSnapshot {
    /// Neutral snapshot for sessions that never saw a user turn: 0.5 where a
    /// neutral midpoint is defined, 0 otherwise.
    pub fn neutral(turn_index: u32) -> Self {
        Self {
            turn_index,
            ts: Utc::now(),
            cop: 0.5,
            dte: 0.5,
            se: 0.5,
            ki: 0.0,
            lp: 0.5,
            ma: 0.0,
            cai: 0.5,
            ads: 0.0,
            nes: 0.0,
            pbi: 0.0,
            brs: 0.0,
            effectiveness: Self::composite(0.5, 0.5, 0.5, 0.0, 0.5, 0.0),
        }
    }

    /// The fixed composite weighting over the six core metrics.
    pub fn composite(cop: f32, dte: f32, se: f32, ki: f32, lp: f32, ma: f32) -> f32 {
        (0.25 * cop + 0.20 * dte + 0.20 * se + 0.15 * ki + 0.10 * lp + 0.10 * ma).clamp(0.0, 1.0)
    }

    pub fn core_values(&self) -> [f32; 6] {
        [self.cop, self.dte, self.se, self.ki, self.lp, self.ma]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_weights_sum_to_one() {
        let full = MetricSnapshot::composite(1.0, 1.0, 1.0, 1.0, 1.0, 1.0);
        assert!((full - 1.0).abs() < 1e-6);
        let none = MetricSnapshot::composite(0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        assert_eq!(none, 0.0);
    }

    #[test]
    fn neutral_snapshot_is_in_range() {
        let snap = MetricSnapshot::neutral(0);
        for value in snap.core_values() {
            assert!((0.0..=1.0).contains(&value));
        }
        assert!((0.0..=1.0).contains(&snap.effectiveness));
    }
}
