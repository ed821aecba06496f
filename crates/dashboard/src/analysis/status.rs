//! Moisture status classification for a single zone.
//!
//! The newest reading is compared with the crop's thresholds:
//!
//! ```text
//!   critical  |  low  |      normal      |  saturated
//! ------------+-------+------------------+------------
//!            min  min+10%              max
//! ```
//!
//! Missing thresholds, missing readings and query failures come back as
//! `unknown`, `no_data` and `error` results instead of errors.

use serde::Serialize;
use tracing::error;

use super::thresholds::{fetch_thresholds, ThresholdMap};
use crate::db::{Db, Threshold};

/// Readings in the bottom 10% of the healthy range count as `low`.
const LOW_BAND_PERCENT: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MoistureStatus {
    Critical,
    Low,
    Normal,
    Saturated,
    Unknown,
    NoData,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    High,
    Medium,
    Low,
}

impl Urgency {
    /// Sort rank: high first, missing urgency last.
    pub fn rank(urgency: Option<Urgency>) -> u8 {
        match urgency {
            Some(Urgency::High) => 0,
            Some(Urgency::Medium) => 1,
            Some(Urgency::Low) => 2,
            None => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusResult {
    pub zone_id: i64,
    pub zone_name: String,
    pub status: MoistureStatus,
    pub message: String,
    pub current_moisture: Option<f64>,
    pub min_moisture: Option<f64>,
    pub max_moisture: Option<f64>,
    pub needs_watering: bool,
    pub urgency: Option<Urgency>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub status: MoistureStatus,
    pub urgency: Urgency,
    pub needs_watering: bool,
}

/// Classify a moisture value against a threshold.
///
/// A degenerate range (`max <= min`) has no width to take a percentage of;
/// a value inside it is treated as sitting at 0% of the range, i.e. `low`.
pub fn classify(current: f64, t: &Threshold) -> Classification {
    let (min, max) = (t.min_moisture, t.max_moisture);

    if current < min {
        return Classification {
            status: MoistureStatus::Critical,
            urgency: Urgency::High,
            needs_watering: true,
        };
    }
    if current > max {
        return Classification {
            status: MoistureStatus::Saturated,
            urgency: Urgency::Low,
            needs_watering: false,
        };
    }

    let pct_of_range = if max > min {
        (current - min) / (max - min) * 100.0
    } else {
        0.0
    };

    if pct_of_range < LOW_BAND_PERCENT {
        Classification {
            status: MoistureStatus::Low,
            urgency: Urgency::Medium,
            needs_watering: true,
        }
    } else {
        Classification {
            status: MoistureStatus::Normal,
            urgency: Urgency::Low,
            needs_watering: false,
        }
    }
}

fn message_for(status: MoistureStatus, current: f64, t: &Threshold) -> String {
    let (min, max) = (t.min_moisture, t.max_moisture);
    match status {
        MoistureStatus::Critical => {
            format!("Moisture {current:.1}% is below the {min:.1}% minimum. Water now.")
        }
        MoistureStatus::Low => format!(
            "Moisture {current:.1}% is close to the {min:.1}% minimum. Plan to water soon."
        ),
        MoistureStatus::Normal => {
            format!("Moisture {current:.1}% is within the {min:.1}-{max:.1}% range.")
        }
        MoistureStatus::Saturated => format!(
            "Moisture {current:.1}% is above the {max:.1}% maximum. Hold off on watering."
        ),
        MoistureStatus::Unknown | MoistureStatus::NoData | MoistureStatus::Error => {
            String::new()
        }
    }
}

impl StatusResult {
    fn bare(zone_id: i64, zone_name: &str, status: MoistureStatus, message: String) -> Self {
        Self {
            zone_id,
            zone_name: zone_name.to_string(),
            status,
            message,
            current_moisture: None,
            min_moisture: None,
            max_moisture: None,
            needs_watering: false,
            urgency: None,
        }
    }
}

/// Analyze one zone, fetching thresholds for this call only.
pub async fn analyze_status(
    db: &Db,
    zone_id: i64,
    zone_name: &str,
    crop_type: &str,
) -> StatusResult {
    let thresholds = fetch_thresholds(db).await;
    analyze_status_with(db, &thresholds, zone_id, zone_name, crop_type).await
}

/// Analyze one zone against an already fetched threshold map.
pub async fn analyze_status_with(
    db: &Db,
    thresholds: &ThresholdMap,
    zone_id: i64,
    zone_name: &str,
    crop_type: &str,
) -> StatusResult {
    let Some(t) = thresholds.lookup(crop_type) else {
        return StatusResult::bare(
            zone_id,
            zone_name,
            MoistureStatus::Unknown,
            format!("No moisture thresholds configured for crop '{}'.", crop_type.trim()),
        );
    };

    let latest = match db.latest_reading(zone_id).await {
        Ok(latest) => latest,
        Err(e) => {
            error!(zone = zone_id, "status: latest_reading failed: {e:#}");
            return StatusResult::bare(
                zone_id,
                zone_name,
                MoistureStatus::Error,
                "Could not load moisture data for this zone.".to_string(),
            );
        }
    };

    let current = match latest.and_then(|r| r.moisture) {
        Some(m) if m.is_finite() => m,
        _ => {
            return StatusResult {
                min_moisture: Some(t.min_moisture),
                max_moisture: Some(t.max_moisture),
                ..StatusResult::bare(
                    zone_id,
                    zone_name,
                    MoistureStatus::NoData,
                    "No moisture readings yet.".to_string(),
                )
            };
        }
    };

    let c = classify(current, t);
    StatusResult {
        zone_id,
        zone_name: zone_name.to_string(),
        status: c.status,
        message: message_for(c.status, current, t),
        current_moisture: Some(current),
        min_moisture: Some(t.min_moisture),
        max_moisture: Some(t.max_moisture),
        needs_watering: c.needs_watering,
        urgency: Some(c.urgency),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
