use crate::analysis::equity::MAX_EQUITY;
use crate::analysis::fill::MAX_FILL;
use crate::analysis::urgency::MAX_URGENCY;

pub const MAX_PROFITABILITY: f64 = 130.0;
/// Urgency can lift the fill-based score by at most this share
const MAX_URGENCY_BOOST: f64 = 0.5;
const EQUITY_POINTS: f64 = 30.0;

/// Combine the component scores into the ranking score (0–130)
/// - base = expected_fill / 10 × 100
/// - urgency multiplies the base by 1.0 to 1.5
/// - equity adds up to 30 points on top
pub fn profitability_score(expected_fill: f64, urgency: f64, equity: f64) -> f64 {
    let normalized_fill = expected_fill / MAX_FILL;
    let normalized_urgency = urgency / MAX_URGENCY;
    let normalized_equity = equity / MAX_EQUITY;

    let base = normalized_fill * 100.0;
    let urgency_multiplier = 1.0 + normalized_urgency * MAX_URGENCY_BOOST;
    let equity_bonus = normalized_equity * EQUITY_POINTS;

    (base * urgency_multiplier + equity_bonus).clamp(0.0, MAX_PROFITABILITY)
}
