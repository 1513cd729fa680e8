//! Risk/reward evaluation.
//!
//! Pure scoring of a verdict's price levels: risk is the entry-to-stop
//! distance, reward the entry-to-target distance. The ratio is rounded
//! to cents and compared against the configured cutoff.

use crate::types::Decision;

/// Default minimum reward/risk ratio for an EXECUTE decision.
pub const DEFAULT_MIN_RATIO: f64 = 1.5;

/// Scored risk/reward for one set of levels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskReward {
    pub risk: f64,
    pub reward: f64,
    pub ratio: f64,
    pub decision: Decision,
}

/// Score `entry` / `stop_loss` / `take_profit`.
///
/// Total over every input: an absent, non-finite or zero risk is replaced
/// by 1, an absent or non-finite reward counts as 0, and a quotient that
/// still overflows is reported as 0. The returned ratio is always finite
/// and non-negative.
pub fn evaluate(
    entry: Option<f64>,
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
    min_ratio: f64,
) -> RiskReward {
    let risk = match (entry, stop_loss) {
        (Some(e), Some(s)) => {
            let r = (e - s).abs();
            if r.is_finite() && r > 0.0 { r } else { 1.0 }
        }
        _ => 1.0,
    };

    let reward = match (take_profit, entry) {
        (Some(t), Some(e)) => {
            let r = (t - e).abs();
            if r.is_finite() { r } else { 0.0 }
        }
        _ => 0.0,
    };

    let ratio = round2(reward / risk);
    let ratio = if ratio.is_finite() { ratio } else { 0.0 };

    let decision = if ratio >= min_ratio {
        Decision::Execute
    } else {
        Decision::Veto
    };

    RiskReward { risk, reward, ratio, decision }
}

/// Round to 2 decimals, half away from zero.
///
/// Values too large to scale by 100 have no fractional part and are
/// returned as-is.
fn round2(x: f64) -> f64 {
    let scaled = x * 100.0;
    if !scaled.is_finite() {
        return x;
    }
    scaled.round() / 100.0
}
