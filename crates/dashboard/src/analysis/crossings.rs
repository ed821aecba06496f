//! Edge-triggered counting of threshold crossings.
//!
//! A crossing is counted when a reading moves *into* the above-max (or
//! below-min) band. A run of consecutive out-of-band readings counts once.

use serde::Serialize;
use tracing::error;

use super::thresholds::{fetch_thresholds, ThresholdMap};
use crate::db::{Db, Reading, Threshold};

/// Crossings in one direction at which the zone is flagged.
pub const CROSSING_ERROR_CUTOFF: u32 = 3;

/// Readings considered, newest first before re-sorting.
pub const CROSSING_WINDOW: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossingErrorType {
    AboveMax,
    BelowMin,
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrossingReport {
    pub zone_id: i64,
    pub crossings_above_max: u32,
    pub crossings_below_min: u32,
    pub has_error: bool,
    pub error_type: Option<CrossingErrorType>,
}

impl CrossingReport {
    fn empty(zone_id: i64) -> Self {
        Self::from_counts(zone_id, 0, 0)
    }

    fn from_counts(zone_id: i64, above: u32, below: u32) -> Self {
        let error_type = match (above >= CROSSING_ERROR_CUTOFF, below >= CROSSING_ERROR_CUTOFF) {
            (true, true) => Some(CrossingErrorType::Both),
            (true, false) => Some(CrossingErrorType::AboveMax),
            (false, true) => Some(CrossingErrorType::BelowMin),
            (false, false) => None,
        };
        Self {
            zone_id,
            crossings_above_max: above,
            crossings_below_min: below,
            has_error: error_type.is_some(),
            error_type,
        }
    }
}

/// Count crossings over readings sorted oldest first.
pub fn count_crossings_in(zone_id: i64, readings: &[Reading], t: &Threshold) -> CrossingReport {
    let mut above = 0;
    let mut below = 0;
    let mut was_above = false;
    let mut was_below = false;

    for r in readings {
        let is_above = r.moisture > t.max_moisture;
        let is_below = r.moisture < t.min_moisture;

        if is_above && !was_above {
            above += 1;
        }
        if is_below && !was_below {
            below += 1;
        }

        was_above = is_above;
        was_below = is_below;
    }

    CrossingReport::from_counts(zone_id, above, below)
}

/// Crossing report for a zone's most recent readings.
///
/// A crop without thresholds, a zone without readings and a failed query all
/// produce a zero report.
pub async fn count_crossings(db: &Db, zone_id: i64, crop_type: &str) -> CrossingReport {
    let thresholds = fetch_thresholds(db).await;
    count_crossings_with(db, &thresholds, zone_id, crop_type).await
}

/// Crossing counts against an already fetched threshold map.
pub async fn count_crossings_with(
    db: &Db,
    thresholds: &ThresholdMap,
    zone_id: i64,
    crop_type: &str,
) -> CrossingReport {
    let Some(t) = thresholds.lookup(crop_type) else {
        return CrossingReport::empty(zone_id);
    };

    match db.recent_readings(zone_id, CROSSING_WINDOW).await {
        Ok(readings) => count_crossings_in(zone_id, &readings, t),
        Err(e) => {
            error!(zone = zone_id, "crossings: recent_readings failed: {e:#}");
            CrossingReport::empty(zone_id)
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
