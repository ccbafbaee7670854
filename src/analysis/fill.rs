use crate::models::box_record::BoxRecord;

/// Number of weeks (ending at the box's current week) that feed the fill score
pub const HISTORY_WEEKS: usize = 4;
pub const MAX_TREND_BONUS: f64 = 2.0;
const TREND_FACTOR: f64 = 0.5;
const RECENT_WEIGHT: f64 = 0.7;
const AVERAGE_WEIGHT: f64 = 0.3;
pub const MAX_FILL: f64 = 10.0;

/// Latest week with a known reading for this box (1-based).
/// Falls back to week 1 when the box has no readings at all.
pub fn current_week_for_box(record: &BoxRecord) -> usize {
    record
        .weekly_fill
        .iter()
        .rposition(Option::is_some)
        .map(|idx| idx + 1)
        .unwrap_or(1)
}

/// Known readings of the window ending at `current_week`, oldest first
pub fn recent_readings(record: &BoxRecord, current_week: usize) -> Vec<f64> {
    let window = HISTORY_WEEKS.min(current_week);
    let first_week = current_week + 1 - window;
    (first_week..=current_week)
        .filter_map(|week| record.reading(week))
        .collect()
}

/// Fill score from the box's own current week.
pub fn fill_score(record: &BoxRecord) -> f64 {
    fill_score_at(record, current_week_for_box(record))
}

/// Compute fill score (≥ 0, at most ~12)
/// - mean of the readings in the last `HISTORY_WEEKS` weeks
/// - plus a trend bonus of half the least-squares slope, capped at +2
pub fn fill_score_at(record: &BoxRecord, current_week: usize) -> f64 {
    if current_week == 0 {
        return 0.0;
    }

    let readings = recent_readings(record, current_week);
    if readings.is_empty() {
        return 0.0;
    }

    let mean = readings.iter().sum::<f64>() / readings.len() as f64;
    let trend_bonus = if readings.len() >= 2 {
        (linear_slope(&readings) * TREND_FACTOR).min(MAX_TREND_BONUS)
    } else {
        0.0
    };

    (mean + trend_bonus).max(0.0)
}

/// Weighted blend of the recent fill score and the long-run average, kept within 0–10
pub fn expected_fill(record: &BoxRecord) -> f64 {
    expected_fill_from(fill_score(record), record.average_fill)
}

pub fn expected_fill_from(fill_score: f64, average_fill: Option<f64>) -> f64 {
    let average = average_fill.filter(|v| v.is_finite()).unwrap_or(0.0);
    (fill_score * RECENT_WEIGHT + average * AVERAGE_WEIGHT).clamp(0.0, MAX_FILL)
}

/// Slope of the first-degree least-squares fit over x = 0, 1, .., n-1
fn linear_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;

    let (num, den) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, y)| {
            let dx = i as f64 - mean_x;
            (num + dx * (y - mean_y), den + dx * dx)
        });

    if den.abs() < f64::EPSILON {
        0.0
    } else {
        num / den
    }
}
