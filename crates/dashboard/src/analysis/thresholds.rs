//! Crop threshold lookup, keyed by lowercased, trimmed crop name.

use std::collections::HashMap;

use tracing::error;

use crate::db::{Db, Threshold};

#[derive(Debug, Clone, Default)]
pub struct ThresholdMap {
    by_crop: HashMap<String, Threshold>,
}

fn crop_key(crop: &str) -> String {
    crop.trim().to_lowercase()
}

impl ThresholdMap {
    pub fn from_thresholds(thresholds: impl IntoIterator<Item = Threshold>) -> Self {
        let by_crop = thresholds
            .into_iter()
            .map(|t| (crop_key(&t.crop_name), t))
            .collect();
        Self { by_crop }
    }

    pub fn lookup(&self, crop_type: &str) -> Option<&Threshold> {
        self.by_crop.get(&crop_key(crop_type))
    }

    pub fn len(&self) -> usize {
        self.by_crop.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_crop.is_empty()
    }
}

/// Load every threshold. Never fails: a query error is logged and produces
/// an empty map, which callers read as "no threshold data".
pub async fn fetch_thresholds(db: &Db) -> ThresholdMap {
    match db.load_thresholds().await {
        Ok(rows) => ThresholdMap::from_thresholds(rows),
        Err(e) => {
            error!("thresholds: load failed: {e:#}");
            ThresholdMap::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::test_db;

    fn tomato() -> Threshold {
        Threshold {
            crop_name: "  Tomato ".into(),
            min_moisture: 30.0,
            max_moisture: 60.0,
            moderate_risk: Some(12.0),
            high_risk: Some(24.0),
        }
    }

    #[test]
    fn lookup_is_case_insensitive_and_trimmed() {
        let map = ThresholdMap::from_thresholds([tomato()]);
        assert!(map.lookup("tomato").is_some());
        assert!(map.lookup("TOMATO").is_some());
        assert!(map.lookup("  ToMaTo\t").is_some());
        assert!(map.lookup("lettuce").is_none());
    }

    #[tokio::test]
    async fn fetch_reads_all_rows() {
        let db = test_db().await;
        db.upsert_threshold(&tomato()).await.unwrap();
        db.upsert_threshold(&Threshold {
            crop_name: "Lettuce".into(),
            ..tomato()
        })
        .await
        .unwrap();

        let map = fetch_thresholds(&db).await;
        assert_eq!(map.len(), 2);
        assert_eq!(map.lookup("lettuce").unwrap().min_moisture, 30.0);
    }

    #[tokio::test]
    async fn fetch_failure_yields_empty_map() {
        let db = test_db().await;
        db.upsert_threshold(&tomato()).await.unwrap();
        db.pool().close().await;

        let map = fetch_thresholds(&db).await;
        assert!(map.is_empty());
    }
}
