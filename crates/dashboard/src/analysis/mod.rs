//! Moisture analysis: per-zone status, trend, threshold crossings and
//! soil-health risk, plus cross-zone watering suggestions.
//!
//! Every entry point returns a result value. Missing thresholds, missing
//! data and query failures are reported through the result's status field,
//! never as an `Err`.

pub mod crossings;
pub mod risk;
pub mod status;
pub mod suggestions;
pub mod thresholds;
pub mod trend;

pub use crossings::{count_crossings, count_crossings_with, CrossingErrorType, CrossingReport};
pub use risk::{evaluate_risk, evaluate_risk_with, RiskLevel, RiskResult};
pub use status::{analyze_status, analyze_status_with, MoistureStatus, StatusResult, Urgency};
pub use suggestions::{generate_suggestions, rank_statuses, Suggestion};
pub use thresholds::{fetch_thresholds, ThresholdMap};
pub use trend::{analyze_trend, analyze_trend_at, CrossingPrediction, Trend, TrendResult};
