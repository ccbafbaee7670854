use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxRecord {
    pub id: u32,
    pub address: String,
    pub municipality: String,
    pub postal_code: String,
    pub container_type: String,
    /// Weekly fill readings, oldest first; index 0 is week 1. `None` = unknown.
    pub weekly_fill: Vec<Option<f64>>,
    pub average_fill: Option<f64>,
}

impl BoxRecord {
    /// Long-run average with unknown treated as zero.
    pub fn average_or_zero(&self) -> f64 {
        self.average_fill.unwrap_or(0.0)
    }

    /// 1-based week reading, `None` when out of range or unknown.
    pub fn reading(&self, week: usize) -> Option<f64> {
        if week == 0 {
            return None;
        }
        self.weekly_fill.get(week - 1).copied().flatten()
    }
}

/// Payload for adding a box to the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBox {
    pub id: u32,
    pub address: String,
    pub municipality: String,
    pub postal_code: String,
    pub container_type: String,
    pub average_fill: f64,
}

/// Partial update; absent fields are left untouched. The id is immutable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoxUpdate {
    pub address: Option<String>,
    pub municipality: Option<String>,
    pub postal_code: Option<String>,
    pub container_type: Option<String>,
    pub average_fill: Option<f64>,
    pub weekly_fill: Option<Vec<Option<f64>>>,
}

impl BoxUpdate {
    pub fn is_empty(&self) -> bool {
        self.address.is_none()
            && self.municipality.is_none()
            && self.postal_code.is_none()
            && self.container_type.is_none()
            && self.average_fill.is_none()
            && self.weekly_fill.is_none()
    }
}
