//! In-memory watering schedule: the cards, the removed set and the halt flag.
//!
//! ## Card lifecycle
//!
//! ```text
//!   upcoming ──[≤ 5 min to start]──▶ imminent ──[start passed]──▶ delayed
//!      ▲                                                            │
//!      │                                              [watered 10 s]│
//!      └────[enabled: rescheduled after latest card]── completed ◀──┘
//! ```
//!
//! `categorize` owns `category`; `tick_countdowns` owns `countdown` and the
//! completion/reschedule step. Marked-watered cards leave the board for good.

use std::collections::HashSet;

use serde::Serialize;

use super::card::{CardKey, CardView, Category, ScheduleCard};
use crate::db::Zone;

/// Synthetic watering run time once a card's start has passed.
pub const WATERING_DURATION_MS: i64 = 10_000;

/// Gap between a re-added card and the latest active card.
pub const RESCHEDULE_STAGGER_MS: i64 = 60_000;

/// Gap between consecutive cards in the initial plan.
pub const SEED_SPACING_MS: i64 = 2 * 60_000;

const HALTED: &str = "Halted";
const COMPLETED: &str = "Completed";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    pub key: CardKey,
    /// New start time, or `None` when the zone is disabled.
    pub rescheduled_to: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleView {
    pub halted: bool,
    pub upcoming: Vec<CardView>,
    pub imminent: Vec<CardView>,
    pub delayed: Vec<CardView>,
    pub completed: Vec<CardView>,
}

#[derive(Debug, Default)]
pub struct ScheduleBoard {
    cards: Vec<ScheduleCard>,
    removed: HashSet<CardKey>,
    halted: bool,
}

fn starts_in(ms: i64) -> String {
    let total = (ms + 999) / 1000;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("Starts in {h}h {m:02}m")
    } else {
        format!("Starts in {m}m {s:02}s")
    }
}

impl ScheduleBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// One card per zone, spaced `SEED_SPACING_MS` apart starting one
    /// spacing after `now_ms`. Zones without auto irrigation get disabled
    /// cards.
    pub fn plan_initial(zones: &[Zone], now_ms: i64) -> Vec<ScheduleCard> {
        zones
            .iter()
            .zip(1..)
            .map(|(z, slot)| {
                ScheduleCard::new(
                    z.id.to_string(),
                    now_ms + slot * SEED_SPACING_MS,
                    z.auto_irrigation_enabled,
                )
            })
            .collect()
    }

    /// Add cards, skipping any that were marked watered or already exist.
    /// Returns how many were added.
    pub fn seed(&mut self, cards: impl IntoIterator<Item = ScheduleCard>) -> usize {
        let mut added = 0;
        for card in cards {
            let key = card.key();
            if self.removed.contains(&key) || self.cards.iter().any(|c| c.matches(&key)) {
                continue;
            }
            self.cards.push(card);
            added += 1;
        }
        added
    }

    /// Re-evaluate every non-completed card against `now_ms`. A manual
    /// category survives while it is more urgent than the time-based one.
    /// Returns how many cards changed category.
    pub fn categorize(&mut self, now_ms: i64) -> usize {
        let mut changed = 0;
        for card in self
            .cards
            .iter_mut()
            .filter(|c| c.category != Category::Completed)
        {
            let by_time = Category::for_time(card.scheduled_time, now_ms);
            let next = match card.manual_category {
                Some(manual) if manual > by_time => manual,
                _ => by_time,
            };
            if card.category != next {
                card.category = next;
                changed += 1;
            }
        }
        changed
    }

    /// Refresh countdown text and finish cards whose watering run is over.
    /// While halted only the text changes.
    pub fn tick_countdowns(&mut self, now_ms: i64) -> Vec<Completion> {
        if self.halted {
            for card in &mut self.cards {
                card.countdown = HALTED.to_string();
            }
            return Vec::new();
        }

        let mut finished = Vec::new();
        for (idx, card) in self.cards.iter_mut().enumerate() {
            if card.category == Category::Completed {
                card.countdown = COMPLETED.to_string();
                continue;
            }
            let elapsed = now_ms - card.scheduled_time;
            if elapsed < 0 {
                card.countdown = starts_in(-elapsed);
            } else if elapsed < WATERING_DURATION_MS {
                let left = (WATERING_DURATION_MS - elapsed + 999) / 1000;
                card.countdown = format!("Watering: {left}s left");
            } else {
                finished.push(idx);
            }
        }

        finished
            .into_iter()
            .map(|idx| self.complete(idx, now_ms))
            .collect()
    }

    fn complete(&mut self, idx: usize, now_ms: i64) -> Completion {
        let key = self.cards[idx].key();

        if !self.cards[idx].enabled {
            let card = &mut self.cards[idx];
            card.category = Category::Completed;
            card.manual_category = None;
            card.countdown = COMPLETED.to_string();
            return Completion {
                key,
                rescheduled_to: None,
            };
        }

        let latest = self
            .cards
            .iter()
            .enumerate()
            .filter(|(i, c)| *i != idx && c.category != Category::Completed)
            .map(|(_, c)| c.scheduled_time)
            .max()
            .unwrap_or(now_ms)
            .max(now_ms);
        let next = latest + RESCHEDULE_STAGGER_MS;

        let card = &mut self.cards[idx];
        card.scheduled_time = next;
        card.category = Category::Upcoming;
        card.manual_category = None;
        card.countdown = starts_in(next - now_ms);

        Completion {
            key,
            rescheduled_to: Some(next),
        }
    }

    /// Drag a card into `target`. Upcoming and completed are not drop
    /// targets; dropping there changes nothing and returns `false`.
    pub fn move_card(&mut self, key: &CardKey, target: Category) -> bool {
        if matches!(target, Category::Upcoming | Category::Completed) {
            return false;
        }
        let Some(card) = self.cards.iter_mut().find(|c| c.matches(key)) else {
            return false;
        };
        if card.category == Category::Completed {
            return false;
        }
        card.manual_category = Some(target);
        card.category = target;
        true
    }

    /// Remove cards for good. Their keys are remembered so re-seeding never
    /// brings them back. Returns how many cards were on the board.
    pub fn mark_watered(&mut self, keys: &[CardKey]) -> usize {
        let before = self.cards.len();
        for key in keys {
            self.removed.insert(key.clone());
        }
        let removed = &self.removed;
        self.cards.retain(|c| !removed.contains(&c.key()));
        before - self.cards.len()
    }

    pub fn set_halted(&mut self, halted: bool) {
        self.halted = halted;
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn is_removed(&self, key: &CardKey) -> bool {
        self.removed.contains(key)
    }

    pub fn get(&self, key: &CardKey) -> Option<&ScheduleCard> {
        self.cards.iter().find(|c| c.matches(key))
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Cards in `category`, earliest start first.
    pub fn cards_in(&self, category: Category) -> Vec<&ScheduleCard> {
        let mut out: Vec<&ScheduleCard> =
            self.cards.iter().filter(|c| c.category == category).collect();
        out.sort_by_key(|c| c.scheduled_time);
        out
    }

    /// Every card for one zone, earliest start first.
    pub fn cards_for_zone(&self, zone_key: &str) -> Vec<&ScheduleCard> {
        let mut out: Vec<&ScheduleCard> =
            self.cards.iter().filter(|c| c.zone_key == zone_key).collect();
        out.sort_by_key(|c| c.scheduled_time);
        out
    }

    pub fn view(&self) -> ScheduleView {
        let column = |cat: Category| -> Vec<CardView> {
            self.cards_in(cat).into_iter().map(CardView::from).collect()
        };
        ScheduleView {
            halted: self.halted,
            upcoming: column(Category::Upcoming),
            imminent: column(Category::Imminent),
            delayed: column(Category::Delayed),
            completed: column(Category::Completed),
        }
    }

    pub fn zone_view(&self, zone_key: &str) -> Vec<CardView> {
        self.cards_for_zone(zone_key)
            .into_iter()
            .map(CardView::from)
            .collect()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
