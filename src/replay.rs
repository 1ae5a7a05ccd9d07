use chrono::{DateTime, Utc};
use log::debug;
use rand::rngs::StdRng;

use crate::dataset::AttemptEvent;
use crate::error::{LetrackerError, Result};
use crate::scheduler::Scheduler;
use crate::state::{AttemptLog, ItemId, ReviewInput, ReviewState, after_days, fractional_days};

/// Attempts closer than this to the previous scheduled attempt count as the
/// same sitting and do not move the schedule.
pub const SAME_DAY_THRESHOLD_DAYS: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct Replay {
    pub state: ReviewState,
    /// One entry per event, oldest first, including same-day repeats.
    pub logs: Vec<AttemptLog>,
    /// How many events advanced the schedule.
    pub scheduled: usize,
}

/// Rebuilds the schedule of one item from its past attempts.
///
/// `events` may be in any order; attempts sharing a timestamp are replayed
/// accepted first. The returned state is anchored on the last
/// event that advanced the schedule, not on the current time.
pub fn replay(
    scheduler: &Scheduler,
    user_id: &str,
    item_id: ItemId,
    events: &[AttemptEvent],
    rng: &mut StdRng,
) -> Result<Replay> {
    replay_with_threshold(
        scheduler,
        user_id,
        item_id,
        events,
        SAME_DAY_THRESHOLD_DAYS,
        rng,
    )
}

pub(crate) fn replay_with_threshold(
    scheduler: &Scheduler,
    user_id: &str,
    item_id: ItemId,
    events: &[AttemptEvent],
    same_day_threshold_days: f64,
    rng: &mut StdRng,
) -> Result<Replay> {
    let mut events: Vec<&AttemptEvent> = events.iter().collect();
    events.sort_by_key(|e| (e.timestamp, e.outcome));
    let first = events.first().ok_or(LetrackerError::EmptyHistory)?;

    let mut state = ReviewState::new(user_id, item_id, first.timestamp);
    let mut logs = Vec::with_capacity(events.len());
    let mut anchor: Option<DateTime<Utc>> = None;
    let mut scheduled = 0;

    for event in events {
        let grade = event.grade();
        logs.push(AttemptLog::new(user_id, item_id, grade, event.timestamp));

        let actual_elapsed_days = match anchor {
            Some(last) => {
                let elapsed = fractional_days(event.timestamp - last);
                if elapsed < same_day_threshold_days {
                    debug!(
                        "item {item_id}: attempt at {} within {elapsed:.2} days of the last one, schedule unchanged",
                        event.timestamp
                    );
                    continue;
                }
                elapsed
            }
            None => 0.0,
        };

        let output = scheduler.next_review(
            &ReviewInput::from(&state),
            grade,
            actual_elapsed_days,
            event.timestamp,
            rng,
        );
        state.apply(&output);
        anchor = Some(event.timestamp);
        scheduled += 1;
    }

    if let Some(last) = anchor {
        state.last_reviewed_at = Some(last);
        state.next_review_at = after_days(last, state.interval_days);
    }

    Ok(Replay {
        state,
        logs,
        scheduled,
    })
}
