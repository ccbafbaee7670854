pub mod equity;
pub mod fill;
pub mod profitability;
pub mod recency;
pub mod urgency;
