use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitEvent {
    pub date: DateTime<FixedOffset>,
    pub fill_level: Option<f64>,
    /// Expected fill computed just before the visit was recorded
    pub expected_fill: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub last_visit: Option<DateTime<FixedOffset>>,
    pub history: Vec<VisitEvent>,
}

/// One append-only audit row per visit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitRecord {
    pub timestamp: DateTime<FixedOffset>,
    pub box_id: u32,
    pub address: String,
    pub municipality: String,
    pub postal_code: String,
    pub container_type: String,
    pub expected_fill: f64,
    pub observed_fill: Option<f64>,
    pub fill_difference: Option<f64>,
    /// Days since the visit before this one; `None` on a first visit
    pub days_since_previous_visit: Option<i64>,
    pub average_fill: Option<f64>,
}
