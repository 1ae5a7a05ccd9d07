use chrono::{DateTime, Utc};
use itertools::Itertools;

use crate::state::{DueCandidate, Status, Task, fractional_days};

/// Score of an item that has never been scheduled; puts it ahead of any
/// realistic overdue ratio.
pub const UNSCHEDULED_SCORE: f64 = 1000.0;

/// Whether an item belongs on today's list at all.
pub fn is_due(candidate: &DueCandidate, now: DateTime<Utc>) -> bool {
    candidate.next_review_at <= now || candidate.status == Status::New
}

/// Overdue time as a multiple of the item's own interval.
pub fn priority_score(candidate: &DueCandidate, now: DateTime<Utc>) -> f64 {
    if candidate.interval_days == 0 {
        return UNSCHEDULED_SCORE;
    }
    fractional_days(now - candidate.next_review_at) / f64::from(candidate.interval_days)
}

/// Picks the `limit` most urgent due items, most urgent first.
///
/// Equal scores keep the order of `candidates`.
pub fn rank_due_tasks(
    candidates: Vec<DueCandidate>,
    now: DateTime<Utc>,
    limit: usize,
) -> Vec<Task> {
    candidates
        .into_iter()
        .filter(|c| is_due(c, now))
        .map(|c| (priority_score(&c, now), c))
        .sorted_by(|(a, _), (b, _)| b.total_cmp(a))
        .take(limit)
        .map(|(_, c)| Task {
            overdue_by_days: fractional_days(now - c.next_review_at),
            item_id: c.item.id,
            title: c.item.title,
            slug: c.item.slug,
            difficulty: c.item.difficulty,
            status: c.status,
            next_review_at: c.next_review_at,
        })
        .collect()
}
