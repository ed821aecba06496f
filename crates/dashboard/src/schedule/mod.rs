//! Watering schedule engine.
//!
//! [`ScheduleBoard`] holds the cards and every rule for moving them between
//! categories. [`Scheduler`] owns the two timers that drive it: a slow
//! categorization tick and a fast countdown tick that also completes and
//! reschedules cards. Both take the board's write lock for one tick at a
//! time, and each only writes its own fields.

pub mod board;
pub mod card;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

pub use board::{Completion, ScheduleBoard, ScheduleView};
pub use card::{CardKey, CardView, Category, ScheduleCard};

use crate::now_millis;
use crate::state::SharedState;

pub type SharedBoard = Arc<RwLock<ScheduleBoard>>;

/// How often cards are re-bucketed by start time.
pub const CATEGORIZE_INTERVAL: Duration = Duration::from_secs(10);

/// How often countdown text is refreshed and finished cards are completed.
pub const COUNTDOWN_INTERVAL: Duration = Duration::from_millis(250);

pub fn shared_board(board: ScheduleBoard) -> SharedBoard {
    Arc::new(RwLock::new(board))
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct Scheduler {
    board: SharedBoard,
    shared: SharedState,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(board: SharedBoard, shared: SharedState) -> Self {
        Self {
            board,
            shared,
            tasks: Vec::new(),
        }
    }

    pub fn board(&self) -> &SharedBoard {
        &self.board
    }

    /// Spawn both timers. Calling it again while running does nothing.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }

        self.tasks.push(tokio::spawn(categorize_loop(Arc::clone(&self.board))));
        self.tasks.push(tokio::spawn(countdown_loop(
            Arc::clone(&self.board),
            Arc::clone(&self.shared),
        )));

        info!(
            categorize_ms = CATEGORIZE_INTERVAL.as_millis() as u64,
            countdown_ms = COUNTDOWN_INTERVAL.as_millis() as u64,
            "scheduler started"
        );
    }

    /// Abort both timers. The board keeps its cards.
    pub fn stop(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Timer tasks
// ---------------------------------------------------------------------------

async fn categorize_loop(board: SharedBoard) {
    let mut ticker = tokio::time::interval(CATEGORIZE_INTERVAL);
    loop {
        ticker.tick().await;
        let changed = board.write().await.categorize(now_millis());
        if changed > 0 {
            debug!(changed, "scheduler: cards recategorized");
        }
    }
}

async fn countdown_loop(board: SharedBoard, shared: SharedState) {
    let mut ticker = tokio::time::interval(COUNTDOWN_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let completed = board.write().await.tick_countdowns(now_millis());
        if completed.is_empty() {
            continue;
        }

        let mut st = shared.write().await;
        for c in completed {
            let detail = match c.rescheduled_to {
                Some(next) => {
                    info!(zone = %c.key.zone, next_ms = next, "scheduler: watering completed, rescheduled");
                    format!("zone {} watered, next run at {next}", c.key.zone)
                }
                None => {
                    info!(zone = %c.key.zone, "scheduler: watering completed, zone disabled");
                    format!("zone {} watered, auto irrigation off", c.key.zone)
                }
            };
            st.record_schedule(detail);
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
