use crate::models::visit::VisitEvent;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub fill_score: f64,
    pub urgency_score: f64,
    pub equity_score: f64,
    pub expected_fill: f64,
    pub profitability_score: f64,
    /// `None` when the box has never been visited
    pub days_since_last_visit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub box_id: u32,
    pub address: String,
    pub municipality: String,
    pub postal_code: String,
    pub container_type: String,
    pub profitability_score: f64,
    pub expected_fill: f64,
    pub equity_score: f64,
    pub days_since_last_visit: Option<i64>,
    pub average_fill: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyReading {
    pub week: usize,
    pub fill_level: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxDetails {
    pub box_id: u32,
    pub address: String,
    pub municipality: String,
    pub postal_code: String,
    pub container_type: String,
    pub average_fill: f64,
    pub current_score: f64,
    pub expected_fill: f64,
    pub days_since_last_visit: Option<i64>,
    pub recent_history: Vec<WeeklyReading>,
    pub visit_history: Vec<VisitEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxSummary {
    pub box_id: u32,
    pub address: String,
    pub municipality: String,
    pub postal_code: String,
    pub container_type: String,
    pub average_fill: f64,
    pub profitability_score: f64,
    pub expected_fill: f64,
    pub days_since_last_visit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitedBox {
    pub box_id: u32,
    pub address: String,
    pub municipality: String,
    pub postal_code: String,
    pub container_type: String,
    pub last_visit: DateTime<FixedOffset>,
    pub days_since_last_visit: Option<i64>,
    pub visit_history: Vec<VisitEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopBox {
    pub box_id: u32,
    pub address: String,
    pub average_fill: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogStats {
    pub total_boxes: usize,
    pub visited_boxes: usize,
    pub visit_rate: f64,
    pub average_fill: f64,
    pub top_boxes: Vec<TopBox>,
}

/// Summary of one scoring pass, logged after each recommendation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringStats {
    pub total: usize,
    pub scored: usize,
    pub mean: f64,
    pub std_dev: f64,
}
