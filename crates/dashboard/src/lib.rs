//! Irrigation dashboard core: moisture analysis over zone telemetry and the
//! watering schedule board, plus the persistence, ingest and API plumbing
//! the `irrigation-dashboard` binary runs them with.

pub mod analysis;
pub mod config;
pub mod db;
pub mod mqtt;
pub mod schedule;
pub mod state;
pub mod web;

use time::OffsetDateTime;

/// Current unix time in seconds.
pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Current unix time in milliseconds. Schedule cards use this clock.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
