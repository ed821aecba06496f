use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::db::Db;
use crate::state::SharedState;

// ---------------------------------------------------------------------------
// MQTT message types
// ---------------------------------------------------------------------------

/// Topic filter the hub subscribes to.
pub const TELEMETRY_TOPIC: &str = "tele/+/moisture";

/// Payload on `tele/<zone_id>/moisture`. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
pub struct TelemetryMsg {
    pub ts: i64,
    #[serde(default)]
    pub moisture: Option<f64>,
    #[serde(default)]
    pub rain: Option<f64>,
}

/// A telemetry message that passed validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySample {
    pub ts: i64,
    pub moisture: Option<f64>,
    pub rain: Option<f64>,
}

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

/// Extract the numeric zone id from "tele/<zone_id>/moisture".
pub fn extract_zone_id(topic: &str) -> Option<i64> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() == 3 && parts[0] == "tele" && parts[2] == "moisture" {
        parts[1].parse().ok()
    } else {
        None
    }
}

impl TelemetryMsg {
    /// A non-finite moisture value is treated as absent. A message with
    /// neither a usable moisture nor a rain value is rejected, as is a
    /// negative rain amount.
    pub fn validate(self) -> Result<TelemetrySample, String> {
        let moisture = self.moisture.filter(|m| m.is_finite());
        let rain = self.rain.filter(|r| r.is_finite());

        if let Some(r) = rain {
            if r < 0.0 {
                return Err(format!("negative rain value {r}"));
            }
        }
        if moisture.is_none() && rain.is_none() {
            return Err("telemetry has no usable moisture or rain value".to_string());
        }

        Ok(TelemetrySample {
            ts: self.ts,
            moisture,
            rain,
        })
    }
}

/// Parse and validate a telemetry payload.
pub fn parse_telemetry(payload: &[u8]) -> Result<TelemetrySample, String> {
    let msg: TelemetryMsg =
        serde_json::from_slice(payload).map_err(|e| format!("bad telemetry json: {e}"))?;
    msg.validate()
}

// ---------------------------------------------------------------------------
// Ingest
// ---------------------------------------------------------------------------

/// Why a publish did not produce a stored reading.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestError {
    UnhandledTopic,
    Invalid(String),
    UnknownZone(i64),
    Store(String),
}

/// Validate one publish and append it to the zone's telemetry. Every
/// outcome is logged and recorded in the event log.
pub async fn ingest(
    db: &Db,
    shared: &SharedState,
    topic: &str,
    payload: &[u8],
) -> Result<i64, IngestError> {
    let Some(zone_id) = extract_zone_id(topic) else {
        debug!(topic = %topic, "mqtt: unhandled topic");
        return Err(IngestError::UnhandledTopic);
    };

    let sample = match parse_telemetry(payload) {
        Ok(s) => s,
        Err(msg) => {
            warn!(zone = zone_id, "mqtt: {msg}");
            shared.write().await.record_error(format!("zone {zone_id}: {msg}"));
            return Err(IngestError::Invalid(msg));
        }
    };

    match db.get_zone(zone_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            warn!(zone = zone_id, "mqtt: telemetry for unknown zone, skipping");
            shared
                .write()
                .await
                .record_error(format!("telemetry for unknown zone {zone_id}"));
            return Err(IngestError::UnknownZone(zone_id));
        }
        Err(e) => {
            error!(zone = zone_id, "mqtt: get_zone failed: {e:#}");
            shared.write().await.record_error(format!("zone lookup failed: {e}"));
            return Err(IngestError::Store(format!("{e:#}")));
        }
    }

    if let Err(e) = db
        .insert_reading(zone_id, sample.ts, sample.moisture, sample.rain)
        .await
    {
        error!(zone = zone_id, "mqtt: insert_reading failed: {e:#}");
        shared.write().await.record_error(format!("insert_reading failed zone={zone_id}: {e}"));
        return Err(IngestError::Store(format!("{e:#}")));
    }

    debug!(zone = zone_id, ts = sample.ts, moisture = ?sample.moisture, rain = ?sample.rain, "telemetry stored");
    shared.write().await.record_reading(zone_id, sample.moisture);
    Ok(zone_id)
}

// ===========================================================================
// Tests
// ===========================================================================
