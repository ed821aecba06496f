use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

use crate::now_unix;

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Zone {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub crop_type: String,
    pub watering_amount_l: f64,
    pub soil_inches: f64,
    pub auto_irrigation_enabled: bool,
    pub created_at: i64,
}

/// What a user submits when saving a zone. `id` is set when editing.
#[derive(Debug, Clone, Deserialize)]
pub struct ZoneInput {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    pub crop_type: String,
    #[serde(default)]
    pub watering_amount_l: f64,
    #[serde(default)]
    pub soil_inches: f64,
    #[serde(default)]
    pub auto_irrigation_enabled: bool,
}

/// Crop-specific moisture bounds (percent) and risk-duration cutoffs (hours).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Threshold {
    pub crop_name: String,
    pub min_moisture: f64,
    pub max_moisture: f64,
    pub moderate_risk: Option<f64>,
    pub high_risk: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Profile {
    pub id: String,
    pub display_name: String,
}

/// One valid moisture sample. Rows with a null or non-finite moisture never
/// become a `Reading`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    pub ts: i64,
    pub moisture: f64,
}

/// Newest telemetry row for a zone, before validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatestReading {
    pub ts: i64,
    pub moisture: Option<f64>,
}

/// Renaming a zone onto a name its owner already uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneNameTaken {
    pub owner: String,
    pub name: String,
    pub existing_id: i64,
}

impl std::fmt::Display for ZoneNameTaken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} already has a zone named '{}' (zone {})",
            self.owner, self.name, self.existing_id
        )
    }
}

impl std::error::Error for ZoneNameTaken {}

fn valid_readings(rows: Vec<(i64, Option<f64>)>) -> Vec<Reading> {
    rows.into_iter()
        .filter_map(|(ts, m)| match m {
            Some(moisture) if moisture.is_finite() => Some(Reading { ts, moisture }),
            _ => None,
        })
        .collect()
}

const ZONE_COLUMNS: &str = "id, owner, name, crop_type, watering_amount_l, soil_inches, \
                            auto_irrigation_enabled, created_at";

impl Db {
    /// db_url examples:
    /// - "sqlite:/home/pi/irrigation/dashboard.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Profiles
    // ----------------------------

    pub async fn upsert_profile(&self, p: &Profile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO profiles (id, display_name) VALUES (?, ?)
            ON CONFLICT(id) DO UPDATE SET display_name=excluded.display_name
            "#,
        )
        .bind(&p.id)
        .bind(&p.display_name)
        .execute(&self.pool)
        .await
        .context("upsert_profile failed")?;
        Ok(())
    }

    pub async fn get_profile(&self, id: &str) -> Result<Option<Profile>> {
        sqlx::query_as::<_, Profile>("SELECT id, display_name FROM profiles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("get_profile failed")
    }

    // ----------------------------
    // Thresholds
    // ----------------------------

    pub async fn upsert_threshold(&self, t: &Threshold) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO thresholds (crop_name, min_moisture, max_moisture, moderate_risk, high_risk)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(crop_name) DO UPDATE SET
              crop_name=excluded.crop_name,
              min_moisture=excluded.min_moisture,
              max_moisture=excluded.max_moisture,
              moderate_risk=excluded.moderate_risk,
              high_risk=excluded.high_risk
            "#,
        )
        .bind(&t.crop_name)
        .bind(t.min_moisture)
        .bind(t.max_moisture)
        .bind(t.moderate_risk)
        .bind(t.high_risk)
        .execute(&self.pool)
        .await
        .context("upsert_threshold failed")?;
        Ok(())
    }

    pub async fn load_thresholds(&self) -> Result<Vec<Threshold>> {
        sqlx::query_as::<_, Threshold>(
            r#"
            SELECT crop_name, min_moisture, max_moisture, moderate_risk, high_risk
            FROM thresholds
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("load_thresholds failed")
    }

    // ----------------------------
    // Zones
    // ----------------------------

    /// Save a zone for `owner`.
    ///
    /// An explicit `id` edits that zone (returns `None` when it does not exist
    /// or belongs to someone else). Without an id the zone is matched by
    /// `(owner, name)`: an existing row is updated in place, otherwise a new
    /// one is inserted.
    ///
    /// Renaming onto another zone's name fails with [`ZoneNameTaken`].
    pub async fn save_zone(&self, owner: &str, z: &ZoneInput) -> Result<Option<Zone>> {
        let target = match z.id {
            Some(id) => match self.get_zone(id).await? {
                Some(zone) if zone.owner == owner => {
                    if let Some(other) = self.find_zone_by_name(owner, &z.name).await? {
                        if other.id != id {
                            return Err(ZoneNameTaken {
                                owner: owner.to_string(),
                                name: z.name.clone(),
                                existing_id: other.id,
                            }
                            .into());
                        }
                    }
                    Some(zone.id)
                }
                _ => return Ok(None),
            },
            None => self.find_zone_by_name(owner, &z.name).await?.map(|zone| zone.id),
        };

        let id = match target {
            Some(id) => {
                sqlx::query(
                    r#"
                    UPDATE zones SET
                      name = ?,
                      crop_type = ?,
                      watering_amount_l = ?,
                      soil_inches = ?,
                      auto_irrigation_enabled = ?
                    WHERE id = ? AND owner = ?
                    "#,
                )
                .bind(&z.name)
                .bind(&z.crop_type)
                .bind(z.watering_amount_l)
                .bind(z.soil_inches)
                .bind(z.auto_irrigation_enabled)
                .bind(id)
                .bind(owner)
                .execute(&self.pool)
                .await
                .with_context(|| format!("update zone {id} failed"))?;
                id
            }
            None => sqlx::query(
                r#"
                INSERT INTO zones (
                  owner, name, crop_type,
                  watering_amount_l, soil_inches, auto_irrigation_enabled,
                  created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(owner)
            .bind(&z.name)
            .bind(&z.crop_type)
            .bind(z.watering_amount_l)
            .bind(z.soil_inches)
            .bind(z.auto_irrigation_enabled)
            .bind(now_unix())
            .execute(&self.pool)
            .await
            .with_context(|| format!("insert zone '{}' failed", z.name))?
            .last_insert_rowid(),
        };

        self.get_zone(id).await
    }

    pub async fn get_zone(&self, id: i64) -> Result<Option<Zone>> {
        sqlx::query_as::<_, Zone>(&format!("SELECT {ZONE_COLUMNS} FROM zones WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("get_zone failed")
    }

    pub async fn find_zone_by_name(&self, owner: &str, name: &str) -> Result<Option<Zone>> {
        sqlx::query_as::<_, Zone>(&format!(
            "SELECT {ZONE_COLUMNS} FROM zones WHERE owner = ? AND name = ?"
        ))
        .bind(owner)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("find_zone_by_name failed")
    }

    pub async fn zones_for_owner(&self, owner: &str) -> Result<Vec<Zone>> {
        sqlx::query_as::<_, Zone>(&format!(
            "SELECT {ZONE_COLUMNS} FROM zones WHERE owner = ? ORDER BY id"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .context("zones_for_owner failed")
    }

    pub async fn load_zones(&self) -> Result<Vec<Zone>> {
        sqlx::query_as::<_, Zone>(&format!("SELECT {ZONE_COLUMNS} FROM zones ORDER BY id"))
            .fetch_all(&self.pool)
            .await
            .context("load_zones failed")
    }

    // ----------------------------
    // Telemetry
    // ----------------------------

    pub async fn insert_reading(
        &self,
        zone_id: i64,
        ts: i64,
        moisture: Option<f64>,
        rain: Option<f64>,
    ) -> Result<()> {
        sqlx::query("INSERT INTO telemetry (zone_id, ts, moisture, rain) VALUES (?, ?, ?, ?)")
            .bind(zone_id)
            .bind(ts)
            .bind(moisture)
            .bind(rain)
            .execute(&self.pool)
            .await
            .context("insert_reading failed")?;
        Ok(())
    }

    /// The single newest row for a zone, whether or not its moisture is usable.
    pub async fn latest_reading(&self, zone_id: i64) -> Result<Option<LatestReading>> {
        let row = sqlx::query_as::<_, (i64, Option<f64>)>(
            r#"
            SELECT ts, moisture
            FROM telemetry
            WHERE zone_id = ?
            ORDER BY ts DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(zone_id)
        .fetch_optional(&self.pool)
        .await
        .context("latest_reading failed")?;

        Ok(row.map(|(ts, moisture)| LatestReading { ts, moisture }))
    }

    /// Valid readings with `ts >= since`, oldest first.
    pub async fn readings_since(&self, zone_id: i64, since: i64) -> Result<Vec<Reading>> {
        let rows = sqlx::query_as::<_, (i64, Option<f64>)>(
            r#"
            SELECT ts, moisture
            FROM telemetry
            WHERE zone_id = ? AND ts >= ? AND moisture IS NOT NULL
            ORDER BY ts ASC, id ASC
            "#,
        )
        .bind(zone_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .context("readings_since failed")?;

        Ok(valid_readings(rows))
    }

    /// The newest `limit` valid readings, returned oldest first.
    pub async fn recent_readings(&self, zone_id: i64, limit: i64) -> Result<Vec<Reading>> {
        let rows = sqlx::query_as::<_, (i64, Option<f64>)>(
            r#"
            SELECT ts, moisture FROM (
              SELECT id, ts, moisture
              FROM telemetry
              WHERE zone_id = ? AND moisture IS NOT NULL
              ORDER BY ts DESC, id DESC
              LIMIT ?
            )
            ORDER BY ts ASC, id ASC
            "#,
        )
        .bind(zone_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("recent_readings failed")?;

        Ok(valid_readings(rows))
    }

    // ----------------------------
    // Watering activity
    // ----------------------------

    pub async fn insert_watering_activity(
        &self,
        zone_id: i64,
        ts: i64,
        inches_saved: f64,
    ) -> Result<()> {
        sqlx::query("INSERT INTO watering_activity (zone_id, ts, inches_saved) VALUES (?, ?, ?)")
            .bind(zone_id)
            .bind(ts)
            .bind(inches_saved)
            .execute(&self.pool)
            .await
            .context("insert_watering_activity failed")?;
        Ok(())
    }

    /// Total inches of water saved across every zone the owner has.
    pub async fn inches_saved_for_owner(&self, owner: &str) -> Result<f64> {
        sqlx::query_scalar::<_, f64>(
            r#"
            SELECT COALESCE(SUM(wa.inches_saved), 0.0)
            FROM watering_activity wa
            JOIN zones z ON z.id = wa.zone_id
            WHERE z.owner = ?
            "#,
        )
        .bind(owner)
        .fetch_one(&self.pool)
        .await
        .context("inches_saved_for_owner failed")
    }
}

// ===========================================================================
// Tests
// ===========================================================================
