//! Cross-zone watering suggestions for one owner.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error};

use super::status::{analyze_status_with, MoistureStatus, StatusResult, Urgency};
use super::thresholds::{fetch_thresholds, ThresholdMap};
use crate::db::{Db, Zone};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub zone_id: i64,
    pub zone_name: String,
    pub status: MoistureStatus,
    pub urgency: Option<Urgency>,
    pub current_moisture: Option<f64>,
    pub min_moisture: Option<f64>,
    pub max_moisture: Option<f64>,
    pub action: String,
}

impl From<StatusResult> for Suggestion {
    fn from(s: StatusResult) -> Self {
        let action = if s.status == MoistureStatus::Critical {
            "Water immediately: moisture is below the crop minimum."
        } else {
            "Schedule watering soon: moisture is close to the crop minimum."
        };
        Self {
            zone_id: s.zone_id,
            zone_name: s.zone_name,
            status: s.status,
            urgency: s.urgency,
            current_moisture: s.current_moisture,
            min_moisture: s.min_moisture,
            max_moisture: s.max_moisture,
            action: action.to_string(),
        }
    }
}

/// Order by urgency (high first, none last), then zones that need water
/// first. The sort is stable, so equal entries keep their input order.
pub fn rank_statuses(mut statuses: Vec<StatusResult>) -> Vec<StatusResult> {
    statuses.sort_by_key(|s| (Urgency::rank(s.urgency), !s.needs_watering));
    statuses
}

/// Analyze every zone concurrently against one threshold snapshot.
///
/// The tasks live in a `JoinSet`, so dropping this future aborts whatever is
/// still in flight. Results come back in zone order.
async fn analyze_zones(db: &Db, thresholds: Arc<ThresholdMap>, zones: &[Zone]) -> Vec<StatusResult> {
    let mut set = JoinSet::new();
    for (idx, zone) in zones.iter().enumerate() {
        let db = db.clone();
        let thresholds = Arc::clone(&thresholds);
        let zone = zone.clone();
        set.spawn(async move {
            let status =
                analyze_status_with(&db, &thresholds, zone.id, &zone.name, &zone.crop_type).await;
            (idx, status)
        });
    }

    let mut slots: Vec<Option<StatusResult>> = vec![None; zones.len()];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, status)) => slots[idx] = Some(status),
            Err(e) => error!("suggestions: zone analysis task failed: {e}"),
        }
    }
    slots.into_iter().flatten().collect()
}

/// Ranked suggestions for every zone of `owner` that needs watering.
pub async fn generate_suggestions(db: &Db, owner: &str) -> Vec<Suggestion> {
    let zones = match db.zones_for_owner(owner).await {
        Ok(zones) => zones,
        Err(e) => {
            error!(owner = %owner, "suggestions: zones_for_owner failed: {e:#}");
            return Vec::new();
        }
    };

    let thresholds = Arc::new(fetch_thresholds(db).await);
    let statuses = analyze_zones(db, thresholds, &zones).await;
    debug!(owner = %owner, zones = statuses.len(), "suggestions: zones analyzed");

    rank_statuses(statuses)
        .into_iter()
        .filter(|s| s.needs_watering)
        .map(Suggestion::from)
        .collect()
}

// ===========================================================================
// Tests
// ===========================================================================
