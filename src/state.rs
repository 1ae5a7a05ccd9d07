use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString, FromRepr};

use crate::error::{LetrackerError, Result};

pub type ItemId = i64;

pub(crate) const DEFAULT_EASE_FACTOR: f64 = 2.5;
pub(crate) const MIN_EASE_FACTOR: f64 = 1.3;
/// Longest interval the scheduler hands out, about a hundred years.
pub const MAX_INTERVAL_DAYS: u32 = 36_500;
const MASTERED_AFTER: u32 = 5;

/// How well an attempt went, from the learner's point of view.
///
/// The engine trusts this value; raw integers coming from callers should go
/// through `Grade::try_from`, which rejects anything outside `0..=3`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, FromRepr,
    Display,
)]
#[repr(u8)]
pub enum Grade {
    Again = 0,
    Hard = 1,
    Good = 2,
    Easy = 3,
}

impl Grade {
    pub fn value(self) -> u8 {
        self as u8
    }
}

impl TryFrom<i64> for Grade {
    type Error = LetrackerError;

    fn try_from(value: i64) -> Result<Self> {
        u8::try_from(value)
            .ok()
            .and_then(Grade::from_repr)
            .ok_or(LetrackerError::InvalidGrade { value })
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    #[default]
    New,
    Learning,
    Review,
    Mastered,
}

impl Status {
    /// Status of an item that has been reviewed at least once.
    pub fn from_repetitions(repetitions: u32) -> Self {
        match repetitions {
            0 => Status::Learning,
            r if r > MASTERED_AFTER => Status::Mastered,
            _ => Status::Review,
        }
    }
}

/// Scheduling record for one (user, item) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewState {
    pub user_id: String,
    pub item_id: ItemId,
    /// 0 only before the first review.
    pub interval_days: u32,
    pub ease_factor: f64,
    pub repetitions: u32,
    pub status: Status,
    pub next_review_at: DateTime<Utc>,
    pub last_reviewed_at: Option<DateTime<Utc>>,
}

impl ReviewState {
    /// State of an item nobody has attempted yet. A missing row in storage
    /// reads as this.
    pub fn new(user_id: impl Into<String>, item_id: ItemId, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            item_id,
            interval_days: 0,
            ease_factor: DEFAULT_EASE_FACTOR,
            repetitions: 0,
            status: Status::New,
            next_review_at: now,
            last_reviewed_at: None,
        }
    }

    pub(crate) fn apply(&mut self, output: &ReviewOutput) {
        self.interval_days = output.interval;
        self.ease_factor = output.ease_factor;
        self.repetitions = output.repetitions;
        self.status = Status::from_repetitions(output.repetitions);
        self.next_review_at = output.next_review_at;
    }
}

/// The part of a [`ReviewState`] the scheduling engine reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReviewInput {
    pub current_interval: u32,
    pub ease_factor: f64,
    pub repetitions: u32,
}

impl Default for ReviewInput {
    fn default() -> Self {
        Self {
            current_interval: 0,
            ease_factor: DEFAULT_EASE_FACTOR,
            repetitions: 0,
        }
    }
}

impl From<&ReviewState> for ReviewInput {
    fn from(state: &ReviewState) -> Self {
        Self {
            current_interval: state.interval_days,
            ease_factor: state.ease_factor,
            repetitions: state.repetitions,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReviewOutput {
    pub next_review_at: DateTime<Utc>,
    pub interval: u32,
    pub ease_factor: f64,
    pub repetitions: u32,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogStatus {
    Solved,
    Failed,
}

impl From<Grade> for LogStatus {
    fn from(grade: Grade) -> Self {
        match grade {
            Grade::Again => LogStatus::Failed,
            _ => LogStatus::Solved,
        }
    }
}

/// One practice attempt. Logs are only ever appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptLog {
    pub user_id: String,
    pub item_id: ItemId,
    pub status: LogStatus,
    pub grade: Grade,
    pub attempted_at: DateTime<Utc>,
}

impl AttemptLog {
    pub fn new(
        user_id: impl Into<String>,
        item_id: ItemId,
        grade: Grade,
        attempted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            item_id,
            status: grade.into(),
            grade,
            attempted_at,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub slug: String,
    pub title: String,
    pub difficulty: Option<Difficulty>,
}

/// A persisted state joined with its item, before ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct DueCandidate {
    pub item: Item,
    pub status: Status,
    pub interval_days: u32,
    pub next_review_at: DateTime<Utc>,
}

/// One entry of the daily review list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub item_id: ItemId,
    pub title: String,
    pub slug: String,
    pub difficulty: Option<Difficulty>,
    pub status: Status,
    pub next_review_at: DateTime<Utc>,
    /// Negative while the item is not yet due.
    pub overdue_by_days: f64,
}

pub(crate) fn days(n: u32) -> Duration {
    Duration::days(i64::from(n))
}

/// `from` moved forward by `n` days, saturating at the latest representable
/// instant.
pub(crate) fn after_days(from: DateTime<Utc>, n: u32) -> DateTime<Utc> {
    from.checked_add_signed(days(n)).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub(crate) fn fractional_days(delta: Duration) -> f64 {
    delta.num_milliseconds() as f64 / 86_400_000.0
}
