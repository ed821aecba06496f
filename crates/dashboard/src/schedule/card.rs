use serde::{Deserialize, Serialize};

/// How close to its start a watering card is.
///
/// Variants are declared from least to most urgent so `Ord` compares
/// urgency. `Completed` is terminal and sits outside the time-based cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Upcoming,
    Imminent,
    Delayed,
    Completed,
}

/// Start times within this many milliseconds are imminent.
pub const IMMINENT_WINDOW_MS: i64 = 5 * 60 * 1000;

impl Category {
    /// Time-based category for a card scheduled at `scheduled_ms`.
    pub fn for_time(scheduled_ms: i64, now_ms: i64) -> Self {
        let until = scheduled_ms - now_ms;
        if until < 0 {
            Category::Delayed
        } else if until <= IMMINENT_WINDOW_MS {
            Category::Imminent
        } else {
            Category::Upcoming
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Upcoming => "upcoming",
            Category::Imminent => "imminent",
            Category::Delayed => "delayed",
            Category::Completed => "completed",
        }
    }
}

/// Identity of a card: the zone plus the start time it was scheduled for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CardKey {
    pub zone: String,
    pub scheduled_time: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleCard {
    pub zone_key: String,
    /// Epoch milliseconds.
    pub scheduled_time: i64,
    pub category: Category,
    pub enabled: bool,
    /// Category the user dragged the card into, if any.
    pub manual_category: Option<Category>,
    pub countdown: String,
}

impl ScheduleCard {
    pub fn new(zone_key: impl Into<String>, scheduled_time: i64, enabled: bool) -> Self {
        Self {
            zone_key: zone_key.into(),
            scheduled_time,
            category: Category::Upcoming,
            enabled,
            manual_category: None,
            countdown: String::new(),
        }
    }

    pub fn key(&self) -> CardKey {
        CardKey {
            zone: self.zone_key.clone(),
            scheduled_time: self.scheduled_time,
        }
    }

    pub fn matches(&self, key: &CardKey) -> bool {
        self.zone_key == key.zone && self.scheduled_time == key.scheduled_time
    }
}

/// A card as the rendering layer sees it. The `data-*` names are the
/// attributes used to join rendered cards back to board state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardView {
    #[serde(rename = "data-zone")]
    pub zone: String,
    #[serde(rename = "data-scheduled-time")]
    pub scheduled_time: i64,
    #[serde(rename = "data-category")]
    pub category: Category,
    pub enabled: bool,
    pub countdown: String,
}

impl From<&ScheduleCard> for CardView {
    fn from(c: &ScheduleCard) -> Self {
        Self {
            zone: c.zone_key.clone(),
            scheduled_time: c.scheduled_time,
            category: c.category,
            enabled: c.enabled,
            countdown: c.countdown.clone(),
        }
    }
}
