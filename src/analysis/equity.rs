use crate::analysis::recency::DaysSince;

pub const MAX_EQUITY: f64 = 15.0;
const NEVER_VISITED_EQUITY: f64 = 8.0;

/// Compute equity score (0–15), independent of fill behavior
/// - never visited = 8
/// - 0–7 days: 0.5 per day (0.5 → 3.5)
/// - 7–30 days: 3.5 + 0.2 per day past 7 (3.5 → 8.1)
/// - past 30 days: 8.0 + 0.1 per day past 30, capped at 15
pub fn equity_score(days: DaysSince) -> f64 {
    let days = match days {
        DaysSince::Never => return NEVER_VISITED_EQUITY,
        DaysSince::Days(days) => days as f64,
    };

    if days <= 0.0 {
        0.0
    } else if days <= 7.0 {
        days * 0.5
    } else if days <= 30.0 {
        3.5 + (days - 7.0) * 0.2
    } else {
        (8.0 + (days - 30.0) * 0.1).min(MAX_EQUITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_visited_is_flat_eight() {
        assert_eq!(equity_score(DaysSince::Never), 8.0);
    }

    #[test]
    fn same_day_or_future_visit_scores_zero() {
        assert_eq!(equity_score(DaysSince::Days(0)), 0.0);
        assert_eq!(equity_score(DaysSince::Days(-3)), 0.0);
    }

    #[test]
    fn breakpoint_at_seven_days() {
        assert!((equity_score(DaysSince::Days(7)) - 3.5).abs() < 1e-9);
        assert!((equity_score(DaysSince::Days(1)) - 0.5).abs() < 1e-9);
        assert!((equity_score(DaysSince::Days(8)) - 3.7).abs() < 1e-9);
    }

    #[test]
    fn breakpoint_at_thirty_days() {
        // the 7–30 segment reaches 8.1 at day 30; the tail restarts at 8.0 just past it
        assert!((equity_score(DaysSince::Days(30)) - 8.1).abs() < 1e-9);
        assert!((equity_score(DaysSince::Days(31)) - 8.1).abs() < 1e-9);
        assert!((equity_score(DaysSince::Days(10)) - 4.1).abs() < 1e-9);
    }

    #[test]
    fn caps_at_fifteen() {
        assert!((equity_score(DaysSince::Days(100)) - 15.0).abs() < 1e-9);
        assert_eq!(equity_score(DaysSince::Days(10_000)), 15.0);
    }
}
