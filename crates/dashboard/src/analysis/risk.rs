//! Soil-health risk from prolonged saturation.
//!
//! The risk tier is driven by the longest single excursion above the crop's
//! maximum moisture, not by the total time spent above it.

use serde::Serialize;
use tracing::error;

use super::thresholds::{fetch_thresholds, ThresholdMap};
use crate::db::{Db, Reading};

/// Readings considered for excursion detection.
pub const RISK_WINDOW: i64 = 100;

/// Smallest duration credited to a lone above-max reading.
const MIN_SPIKE_HOURS: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    None,
    Moderate,
    High,
    Unknown,
    NoData,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskResult {
    pub zone_id: i64,
    pub risk: RiskLevel,
    pub hours_above_max: f64,
}

impl RiskResult {
    fn flat(zone_id: i64, risk: RiskLevel) -> Self {
        Self {
            zone_id,
            risk,
            hours_above_max: 0.0,
        }
    }
}

fn hours_between(from: i64, to: i64) -> f64 {
    (to - from) as f64 / 3600.0
}

/// Duration in hours of the longest contiguous run of readings above `max`.
///
/// A run of several readings lasts from its first to its last reading. A lone
/// reading is credited half the gap to the next reading, at least
/// `MIN_SPIKE_HOURS`; a lone reading at the end of the series gets exactly
/// `MIN_SPIKE_HOURS`.
pub fn longest_excursion_hours(readings: &[Reading], max: f64) -> f64 {
    let mut longest: f64 = 0.0;
    let mut i = 0;

    while i < readings.len() {
        if readings[i].moisture <= max {
            i += 1;
            continue;
        }

        let start = i;
        while i + 1 < readings.len() && readings[i + 1].moisture > max {
            i += 1;
        }
        let end = i;

        let hours = if start == end {
            match readings.get(end + 1) {
                Some(next) => {
                    (hours_between(readings[end].ts, next.ts) / 2.0).max(MIN_SPIKE_HOURS)
                }
                None => MIN_SPIKE_HOURS,
            }
        } else {
            hours_between(readings[start].ts, readings[end].ts)
        };

        longest = longest.max(hours);
        i += 1;
    }

    longest
}

pub fn risk_tier(hours: f64, moderate_hours: f64, high_hours: f64) -> RiskLevel {
    if hours >= high_hours {
        RiskLevel::High
    } else if hours >= moderate_hours {
        RiskLevel::Moderate
    } else {
        RiskLevel::None
    }
}

/// Risk for a zone from its most recent readings.
pub async fn evaluate_risk(db: &Db, zone_id: i64, crop_type: &str) -> RiskResult {
    let thresholds = fetch_thresholds(db).await;
    evaluate_risk_with(db, &thresholds, zone_id, crop_type).await
}

/// Risk for a zone against an already fetched threshold map.
pub async fn evaluate_risk_with(
    db: &Db,
    thresholds: &ThresholdMap,
    zone_id: i64,
    crop_type: &str,
) -> RiskResult {
    let Some(t) = thresholds.lookup(crop_type) else {
        return RiskResult::flat(zone_id, RiskLevel::Unknown);
    };
    let (Some(moderate), Some(high)) = (t.moderate_risk, t.high_risk) else {
        return RiskResult::flat(zone_id, RiskLevel::None);
    };

    let readings = match db.recent_readings(zone_id, RISK_WINDOW).await {
        Ok(readings) => readings,
        Err(e) => {
            error!(zone = zone_id, "risk: recent_readings failed: {e:#}");
            return RiskResult::flat(zone_id, RiskLevel::Error);
        }
    };
    if readings.is_empty() {
        return RiskResult::flat(zone_id, RiskLevel::NoData);
    }

    let hours = longest_excursion_hours(&readings, t.max_moisture);
    RiskResult {
        zone_id,
        risk: risk_tier(hours, moderate, high),
        hours_above_max: hours,
    }
}

// ===========================================================================
// Tests
// ===========================================================================
