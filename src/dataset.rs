use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{LetrackerError, Result};
use crate::state::Grade;

const ACCEPTED: &str = "Accepted";

/// One submission as exported from the judge's history page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub title: String,
    pub slug: String,
    /// "Accepted", "Wrong Answer", "Time Limit Exceeded", ...
    pub status: String,
    /// Unix seconds.
    pub timestamp: i64,
}

/// Attempts sharing a timestamp are ordered accepted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Accepted,
    Rejected,
}

impl Outcome {
    pub fn grade(self) -> Grade {
        match self {
            Outcome::Accepted => Grade::Good,
            Outcome::Rejected => Grade::Again,
        }
    }
}

/// A past attempt on one item, ready for replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptEvent {
    pub slug: String,
    pub title: String,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
}

impl AttemptEvent {
    pub fn grade(&self) -> Grade {
        self.outcome.grade()
    }
}

impl TryFrom<HistoryRecord> for AttemptEvent {
    type Error = LetrackerError;

    fn try_from(record: HistoryRecord) -> Result<Self> {
        let timestamp = DateTime::from_timestamp(record.timestamp, 0).ok_or(
            LetrackerError::InvalidTimestamp {
                value: record.timestamp,
            },
        )?;
        let outcome = if record.status == ACCEPTED {
            Outcome::Accepted
        } else {
            Outcome::Rejected
        };
        Ok(Self {
            slug: record.slug,
            title: record.title,
            outcome,
            timestamp,
        })
    }
}

/// Events of one item, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemHistory {
    pub slug: String,
    /// Title of the earliest submission.
    pub title: String,
    pub events: Vec<AttemptEvent>,
}

/// Sorts every event chronologically, then splits them by slug. Each group
/// keeps the chronological order; groups come out ordered by slug.
pub fn group_by_item(mut events: Vec<AttemptEvent>) -> Vec<ItemHistory> {
    events.sort_by_key(|e| (e.timestamp, e.outcome));
    events
        .into_iter()
        .into_group_map_by(|e| e.slug.clone())
        .into_iter()
        .sorted_by(|a, b| a.0.cmp(&b.0))
        .filter_map(|(slug, events)| {
            let title = events.first()?.title.clone();
            Some(ItemHistory {
                slug,
                title,
                events,
            })
        })
        .collect()
}

pub fn parse_records(records: Vec<HistoryRecord>) -> Result<Vec<AttemptEvent>> {
    records.into_iter().map(AttemptEvent::try_from).collect()
}
