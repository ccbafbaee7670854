use crate::analysis::recency::DaysSince;

const INFLECTION_DAYS: f64 = 7.0;
const STEEPNESS: f64 = 0.5;
pub const MAX_URGENCY: f64 = 10.0;
/// Never-visited boxes are capped below a long-overdue one
const NEVER_VISITED_CAP: f64 = 8.0;
const NEVER_VISITED_FACTOR: f64 = 0.8;
const NEVER_VISITED_DEFAULT: f64 = 3.0;

/// Compute urgency score (0–10)
/// - never visited: 0.8 × long-run average (max 8), or 3.0 when the average is unknown
/// - otherwise a logistic curve in days since the last visit, centered on day 7
/// - floors of 1.0 (≤ 1 day) and 2.0 (≤ 3 days) right after a visit
pub fn urgency_score(days: DaysSince, average_fill: Option<f64>) -> f64 {
    let urgency = match days {
        DaysSince::Never => never_visited_urgency(average_fill),
        DaysSince::Days(days) => {
            let logistic = logistic_urgency(days as f64);
            if days <= 1 {
                logistic.max(1.0)
            } else if days <= 3 {
                logistic.max(2.0)
            } else {
                logistic
            }
        }
    };

    urgency.clamp(0.0, MAX_URGENCY)
}

fn never_visited_urgency(average_fill: Option<f64>) -> f64 {
    match average_fill {
        Some(avg) if avg.is_finite() && avg > 0.0 => {
            (avg * NEVER_VISITED_FACTOR).min(NEVER_VISITED_CAP)
        }
        _ => NEVER_VISITED_DEFAULT,
    }
}

fn logistic_urgency(days: f64) -> f64 {
    MAX_URGENCY / (1.0 + (-STEEPNESS * (days - INFLECTION_DAYS)).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_visited_uses_average_as_proxy() {
        assert!((urgency_score(DaysSince::Never, Some(9.0)) - 7.2).abs() < 1e-9);
        assert!((urgency_score(DaysSince::Never, Some(5.0)) - 4.0).abs() < 1e-9);
        assert_eq!(urgency_score(DaysSince::Never, Some(12.0)), 8.0);
    }

    #[test]
    fn never_visited_without_usable_average_is_moderate() {
        assert_eq!(urgency_score(DaysSince::Never, None), 3.0);
        assert_eq!(urgency_score(DaysSince::Never, Some(0.0)), 3.0);
        assert_eq!(urgency_score(DaysSince::Never, Some(-2.0)), 3.0);
        assert_eq!(urgency_score(DaysSince::Never, Some(f64::NAN)), 3.0);
    }

    #[test]
    fn inflection_point_is_day_seven() {
        assert!((urgency_score(DaysSince::Days(7), None) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn ten_days_matches_logistic_curve() {
        let expected = 10.0 / (1.0 + (-1.5f64).exp());
        let got = urgency_score(DaysSince::Days(10), None);
        assert!((got - expected).abs() < 1e-9);
        assert!((got - 8.176).abs() < 1e-3);
    }

    #[test]
    fn recent_visits_get_floors() {
        assert_eq!(urgency_score(DaysSince::Days(0), None), 1.0);
        assert_eq!(urgency_score(DaysSince::Days(1), None), 1.0);
        assert_eq!(urgency_score(DaysSince::Days(2), None), 2.0);
        assert_eq!(urgency_score(DaysSince::Days(3), None), 2.0);
        // day 4 is past the floors: 10 / (1 + e^1.5) ≈ 1.82
        assert!(urgency_score(DaysSince::Days(4), None) < 2.0);
    }

    #[test]
    fn stays_within_bounds_and_grows_with_time() {
        let mut previous = 0.0;
        for days in 4..400 {
            let u = urgency_score(DaysSince::Days(days), Some(5.0));
            assert!((0.0..=10.0).contains(&u));
            assert!(u >= previous);
            previous = u;
        }
        assert!(urgency_score(DaysSince::Days(-5), None) >= 1.0);
    }
}
