mod dataset;
mod error;
mod priority;
mod replay;
mod scheduler;
mod service;
mod sqlite;
mod state;
mod storage;
#[cfg(test)]
mod test_helpers;

pub use dataset::{
    AttemptEvent, HistoryRecord, ItemHistory, Outcome, group_by_item, parse_records,
};
pub use error::{LetrackerError, Result};
pub use priority::{UNSCHEDULED_SCORE, is_due, priority_score, rank_due_tasks};
pub use replay::{Replay, SAME_DAY_THRESHOLD_DAYS, replay};
pub use scheduler::{FuzzFn, Scheduler};
pub use service::{
    Clock, FixedClock, ImportReport, ItemReport, ReviewConfig, ReviewService, SystemClock,
};
pub use sqlite::SqliteRepository;
pub use state::{
    AttemptLog, Difficulty, DueCandidate, Grade, Item, ItemId, LogStatus, MAX_INTERVAL_DAYS,
    ReviewInput, ReviewOutput, ReviewState, Status, Task,
};
pub use storage::{MemoryRepository, Repository};
