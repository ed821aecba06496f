//! Moisture trend over a trailing time window, with a linear extrapolation
//! of when a target moisture will be reached.

use serde::Serialize;
use tracing::error;

use crate::db::{Db, Reading};
use crate::now_unix;

/// Rate (moisture units per hour) below which a zone is drying fast.
const FAST_DECLINE_RATE: f64 = -0.5;
const DECLINE_RATE: f64 = -0.1;
const RISE_RATE: f64 = 0.1;

/// Number of most recent readings averaged into `average_moisture`.
const AVERAGE_WINDOW: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    DecliningFast,
    Declining,
    Stable,
    Rising,
    InsufficientData,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CrossingPrediction {
    pub target_moisture: f64,
    pub hours_until_crossing: f64,
    /// The latest reading is already at or below the target.
    pub immediate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendResult {
    pub zone_id: i64,
    pub trend: Trend,
    pub rate_of_change: f64,
    pub average_moisture: Option<f64>,
    pub current_moisture: Option<f64>,
    pub reading_count: usize,
    pub predicted_crossing: Option<CrossingPrediction>,
}

pub fn classify_rate(rate: f64) -> Trend {
    if rate < FAST_DECLINE_RATE {
        Trend::DecliningFast
    } else if rate < DECLINE_RATE {
        Trend::Declining
    } else if rate > RISE_RATE {
        Trend::Rising
    } else {
        Trend::Stable
    }
}

/// Trend over readings that are already sorted oldest first.
pub fn compute_trend(zone_id: i64, readings: &[Reading]) -> TrendResult {
    let tail = &readings[readings.len().saturating_sub(AVERAGE_WINDOW)..];
    let average_moisture = if tail.is_empty() {
        None
    } else {
        Some(tail.iter().map(|r| r.moisture).sum::<f64>() / tail.len() as f64)
    };

    let mut result = TrendResult {
        zone_id,
        trend: Trend::InsufficientData,
        rate_of_change: 0.0,
        average_moisture,
        current_moisture: readings.last().map(|r| r.moisture),
        reading_count: readings.len(),
        predicted_crossing: None,
    };

    let (Some(first), Some(last)) = (readings.first(), readings.last()) else {
        return result;
    };
    if readings.len() < 2 {
        return result;
    }

    let hours = (last.ts - first.ts) as f64 / 3600.0;
    result.rate_of_change = if hours > 0.0 {
        (last.moisture - first.moisture) / hours
    } else {
        0.0
    };
    result.trend = classify_rate(result.rate_of_change);
    result
}

impl TrendResult {
    /// Hours until moisture reaches `target` at the current rate.
    ///
    /// Already at or below target yields an immediate crossing. A zone that
    /// is not drying never crosses, so the result is `None`.
    pub fn predict_threshold_crossing(&self, target: f64) -> Option<CrossingPrediction> {
        let current = self.current_moisture?;
        if current <= target {
            return Some(CrossingPrediction {
                target_moisture: target,
                hours_until_crossing: 0.0,
                immediate: true,
            });
        }
        if self.rate_of_change >= 0.0 {
            return None;
        }
        Some(CrossingPrediction {
            target_moisture: target,
            hours_until_crossing: (current - target) / self.rate_of_change.abs(),
            immediate: false,
        })
    }

    pub fn with_prediction(mut self, target: f64) -> Self {
        self.predicted_crossing = self.predict_threshold_crossing(target);
        self
    }
}

/// Trend over the last `hours_window` hours.
pub async fn analyze_trend(db: &Db, zone_id: i64, hours_window: f64) -> TrendResult {
    analyze_trend_at(db, zone_id, hours_window, now_unix()).await
}

/// Trend over the `hours_window` hours ending at unix time `now`.
pub async fn analyze_trend_at(db: &Db, zone_id: i64, hours_window: f64, now: i64) -> TrendResult {
    let since = now - (hours_window * 3600.0).round() as i64;
    match db.readings_since(zone_id, since).await {
        Ok(readings) => compute_trend(zone_id, &readings),
        Err(e) => {
            error!(zone = zone_id, "trend: readings_since failed: {e:#}");
            compute_trend(zone_id, &[])
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{test_db, zone_input};

    const T0: i64 = 1_700_000_000;
    const HOUR: i64 = 3600;

    fn r(ts: i64, moisture: f64) -> Reading {
        Reading { ts, moisture }
    }

    #[test]
    fn two_readings_falling_ten_over_two_hours() {
        let t = compute_trend(1, &[r(T0, 50.0), r(T0 + 2 * HOUR, 40.0)]);
        assert_eq!(t.rate_of_change, -5.0);
        assert_eq!(t.trend, Trend::DecliningFast);
        assert_eq!(t.current_moisture, Some(40.0));
        assert_eq!(t.average_moisture, Some(45.0));
    }

    #[test]
    fn fewer_than_two_readings_is_insufficient() {
        let empty = compute_trend(1, &[]);
        assert_eq!(empty.trend, Trend::InsufficientData);
        assert_eq!(empty.rate_of_change, 0.0);
        assert_eq!(empty.average_moisture, None);

        let one = compute_trend(1, &[r(T0, 33.0)]);
        assert_eq!(one.trend, Trend::InsufficientData);
        assert_eq!(one.rate_of_change, 0.0);
        assert_eq!(one.average_moisture, Some(33.0));
    }

    #[test]
    fn rate_classification_boundaries() {
        assert_eq!(classify_rate(-0.51), Trend::DecliningFast);
        assert_eq!(classify_rate(-0.5), Trend::Declining);
        assert_eq!(classify_rate(-0.2), Trend::Declining);
        assert_eq!(classify_rate(-0.1), Trend::Stable);
        assert_eq!(classify_rate(0.0), Trend::Stable);
        assert_eq!(classify_rate(0.1), Trend::Stable);
        assert_eq!(classify_rate(0.11), Trend::Rising);
    }

    #[test]
    fn same_timestamp_readings_are_stable() {
        let t = compute_trend(1, &[r(T0, 50.0), r(T0, 20.0)]);
        assert_eq!(t.rate_of_change, 0.0);
        assert_eq!(t.trend, Trend::Stable);
    }

    #[test]
    fn average_uses_last_six_readings() {
        let readings: Vec<Reading> = (0..8).map(|i| r(T0 + i * HOUR, i as f64 * 10.0)).collect();
        let t = compute_trend(1, &readings);
        // last six: 20, 30, 40, 50, 60, 70
        assert_eq!(t.average_moisture, Some(45.0));
        assert_eq!(t.reading_count, 8);
        assert_eq!(t.trend, Trend::Rising);
    }

    // -- prediction -------------------------------------------------------

    #[test]
    fn prediction_extrapolates_decline() {
        let t = compute_trend(1, &[r(T0, 50.0), r(T0 + 2 * HOUR, 40.0)]);
        let p = t.predict_threshold_crossing(30.0).unwrap();
        assert_eq!(p.hours_until_crossing, 2.0);
        assert!(!p.immediate);
    }

    #[test]
    fn prediction_when_already_below_is_immediate() {
        let t = compute_trend(1, &[r(T0, 50.0), r(T0 + 2 * HOUR, 40.0)]);
        let p = t.predict_threshold_crossing(45.0).unwrap();
        assert!(p.immediate);
        assert_eq!(p.hours_until_crossing, 0.0);
    }

    #[test]
    fn prediction_none_when_not_declining() {
        let t = compute_trend(1, &[r(T0, 40.0), r(T0 + HOUR, 42.0)]);
        assert!(t.predict_threshold_crossing(30.0).is_none());

        let insufficient = compute_trend(1, &[]);
        assert!(insufficient.predict_threshold_crossing(30.0).is_none());
    }

    #[test]
    fn with_prediction_fills_field() {
        let t = compute_trend(1, &[r(T0, 50.0), r(T0 + 2 * HOUR, 40.0)]).with_prediction(35.0);
        assert_eq!(t.predicted_crossing.unwrap().hours_until_crossing, 1.0);
    }

    // -- analyze_trend_at -------------------------------------------------

    #[tokio::test]
    async fn window_excludes_older_readings() {
        let db = test_db().await;
        let z = db.save_zone("alice", &zone_input("Beds", "Tomato")).await.unwrap().unwrap();
        let now = T0 + 48 * HOUR;
        db.insert_reading(z.id, now - 30 * HOUR, Some(90.0), None).await.unwrap();
        db.insert_reading(z.id, now - 4 * HOUR, Some(50.0), None).await.unwrap();
        db.insert_reading(z.id, now - 3 * HOUR, Some(f64::NAN), None).await.unwrap();
        db.insert_reading(z.id, now - 2 * HOUR, Some(40.0), None).await.unwrap();

        let t = analyze_trend_at(&db, z.id, 24.0, now).await;
        assert_eq!(t.reading_count, 2);
        assert_eq!(t.rate_of_change, -5.0);
        assert_eq!(t.trend, Trend::DecliningFast);
    }

    #[tokio::test]
    async fn query_failure_is_insufficient_data() {
        let db = test_db().await;
        db.pool().close().await;

        let t = analyze_trend(&db, 1, 24.0).await;
        assert_eq!(t.trend, Trend::InsufficientData);
        assert_eq!(t.reading_count, 0);
    }
}
