//! TOML seed file loading, validation, and database seeding for crop
//! thresholds, owner profiles and zones.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use crate::db::{Db, Profile, Threshold, ZoneInput};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub thresholds: Vec<ThresholdEntry>,
    #[serde(default)]
    pub profiles: Vec<ProfileEntry>,
    #[serde(default)]
    pub zones: Vec<ZoneEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ThresholdEntry {
    pub crop_name: String,
    pub min_moisture: f64,
    pub max_moisture: f64,
    /// Hours above max before risk is moderate. Omit to disable risk tracking.
    pub moderate_risk: Option<f64>,
    pub high_risk: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ProfileEntry {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
pub struct ZoneEntry {
    pub owner: String,
    pub name: String,
    pub crop_type: String,
    #[serde(default)]
    pub watering_amount_l: f64,
    pub soil_inches: f64,
    #[serde(default)]
    pub auto_irrigation_enabled: bool,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all entries. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_thresholds(&mut errors);
        self.validate_profiles(&mut errors);
        self.validate_zones(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_thresholds(&self, errors: &mut Vec<String>) {
        let mut seen: HashSet<String> = HashSet::new();

        for (i, t) in self.thresholds.iter().enumerate() {
            let key = t.crop_name.trim().to_lowercase();
            let ctx = || {
                if key.is_empty() {
                    format!("thresholds[{i}]")
                } else {
                    format!("crop '{}'", t.crop_name.trim())
                }
            };

            if key.is_empty() {
                errors.push(format!("{}: crop_name is empty", ctx()));
            } else if !seen.insert(key.clone()) {
                errors.push(format!("{}: duplicate crop_name (case-insensitive)", ctx()));
            }

            for (field, v) in [("min_moisture", t.min_moisture), ("max_moisture", t.max_moisture)] {
                if !(0.0..=100.0).contains(&v) {
                    errors.push(format!("{}: {field} {v} out of range [0, 100]", ctx()));
                }
            }
            if t.max_moisture <= t.min_moisture {
                errors.push(format!(
                    "{}: max_moisture ({}) must be greater than min_moisture ({})",
                    ctx(),
                    t.max_moisture,
                    t.min_moisture
                ));
            }

            for (field, v) in [("moderate_risk", t.moderate_risk), ("high_risk", t.high_risk)] {
                if let Some(hours) = v {
                    if !(hours > 0.0) {
                        errors.push(format!("{}: {field} must be positive, got {hours}", ctx()));
                    }
                }
            }
            if let (Some(moderate), Some(high)) = (t.moderate_risk, t.high_risk) {
                if high < moderate {
                    errors.push(format!(
                        "{}: high_risk ({high}) must not be less than moderate_risk ({moderate})",
                        ctx()
                    ));
                }
            }
        }
    }

    fn validate_profiles(&self, errors: &mut Vec<String>) {
        let mut seen: HashSet<&str> = HashSet::new();

        for (i, p) in self.profiles.iter().enumerate() {
            if p.id.trim().is_empty() {
                errors.push(format!("profiles[{i}]: id is empty"));
            } else if !seen.insert(p.id.as_str()) {
                errors.push(format!("profile '{}': duplicate id", p.id));
            }
        }
    }

    fn validate_zones(&self, errors: &mut Vec<String>) {
        let mut seen: HashSet<(&str, &str)> = HashSet::new();

        for (i, z) in self.zones.iter().enumerate() {
            let ctx = || {
                if z.name.trim().is_empty() {
                    format!("zones[{i}]")
                } else {
                    format!("zone '{}/{}'", z.owner, z.name)
                }
            };

            // ── Identity ────────────────────────────────────────
            if z.owner.trim().is_empty() {
                errors.push(format!("{}: owner is empty", ctx()));
            }
            if z.name.trim().is_empty() {
                errors.push(format!("{}: name is empty", ctx()));
            } else if !seen.insert((z.owner.as_str(), z.name.as_str())) {
                errors.push(format!("{}: duplicate name for owner", ctx()));
            }
            if z.crop_type.trim().is_empty() {
                errors.push(format!("{}: crop_type is empty", ctx()));
            }

            // ── Quantities ──────────────────────────────────────
            if !(z.watering_amount_l >= 0.0) {
                errors.push(format!(
                    "{}: watering_amount_l must not be negative, got {}",
                    ctx(),
                    z.watering_amount_l
                ));
            }
            if !(z.soil_inches > 0.0) {
                errors.push(format!(
                    "{}: soil_inches must be positive, got {}",
                    ctx(),
                    z.soil_inches
                ));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load + apply
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

/// Like [`load`], but a missing file is `Ok(None)`.
pub fn load_optional(path: &str) -> Result<Option<Config>> {
    if !Path::new(path).exists() {
        return Ok(None);
    }
    load(path).map(Some)
}

/// Upsert all thresholds, profiles and zones from the config into the
/// database.
pub async fn apply(config: &Config, db: &Db) -> Result<()> {
    for t in &config.thresholds {
        db.upsert_threshold(&Threshold {
            crop_name: t.crop_name.trim().to_string(),
            min_moisture: t.min_moisture,
            max_moisture: t.max_moisture,
            moderate_risk: t.moderate_risk,
            high_risk: t.high_risk,
        })
        .await
        .with_context(|| format!("failed to upsert threshold '{}'", t.crop_name))?;
    }

    for p in &config.profiles {
        db.upsert_profile(&Profile {
            id: p.id.clone(),
            display_name: p.display_name.clone(),
        })
        .await
        .with_context(|| format!("failed to upsert profile '{}'", p.id))?;
    }

    for z in &config.zones {
        db.save_zone(
            &z.owner,
            &ZoneInput {
                id: None,
                name: z.name.clone(),
                crop_type: z.crop_type.clone(),
                watering_amount_l: z.watering_amount_l,
                soil_inches: z.soil_inches,
                auto_irrigation_enabled: z.auto_irrigation_enabled,
            },
        )
        .await
        .with_context(|| format!("failed to save zone '{}/{}'", z.owner, z.name))?;
    }

    tracing::info!(
        thresholds = config.thresholds.len(),
        profiles = config.profiles.len(),
        zones = config.zones.len(),
        "config applied"
    );

    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
