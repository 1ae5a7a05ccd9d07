use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

use crate::dataset::{HistoryRecord, ItemHistory, group_by_item, parse_records};
use crate::error::{LetrackerError, Result};
use crate::priority::rank_due_tasks;
use crate::replay::{Replay, SAME_DAY_THRESHOLD_DAYS, replay_with_threshold};
use crate::scheduler::Scheduler;
use crate::state::{
    AttemptLog, Grade, ItemId, ReviewInput, ReviewOutput, ReviewState, Status, Task,
};
use crate::storage::Repository;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock stuck at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Length of the list returned by [`ReviewService::today_tasks`].
    pub daily_task_limit: usize,
    /// Replayed attempts closer than this to the previous scheduled one are
    /// logged without moving the schedule.
    pub same_day_threshold_days: f64,
    /// Seed for the fuzz RNG. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            daily_task_limit: 3,
            same_day_threshold_days: SAME_DAY_THRESHOLD_DAYS,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemReport {
    Imported {
        slug: String,
        item_id: ItemId,
        attempts: usize,
        state: ReviewState,
    },
    /// The item could not be looked up or created; nothing was written for it.
    Unresolved { slug: String, reason: String },
}

impl ItemReport {
    pub fn slug(&self) -> &str {
        match self {
            ItemReport::Imported { slug, .. } | ItemReport::Unresolved { slug, .. } => slug,
        }
    }
}

/// Per-item outcome of a history import. Unresolved items come first, then
/// imported ones ordered by slug.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    pub items: Vec<ItemReport>,
}

impl ImportReport {
    pub fn imported(&self) -> impl Iterator<Item = &ItemReport> {
        self.items
            .iter()
            .filter(|r| matches!(r, ItemReport::Imported { .. }))
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &ItemReport> {
        self.items
            .iter()
            .filter(|r| matches!(r, ItemReport::Unresolved { .. }))
    }
}

pub struct ReviewService<R, C = SystemClock> {
    repo: R,
    clock: C,
    scheduler: Scheduler,
    config: ReviewConfig,
    rng: Mutex<StdRng>,
}

impl<R: Repository> ReviewService<R> {
    pub fn new(repo: R) -> Self {
        Self::with_clock(repo, SystemClock, Scheduler::default(), ReviewConfig::default())
    }
}

impl<R: Repository, C: Clock> ReviewService<R, C> {
    pub fn with_clock(repo: R, clock: C, scheduler: Scheduler, config: ReviewConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            repo,
            clock,
            scheduler,
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn config(&self) -> &ReviewConfig {
        &self.config
    }

    fn rng(&self) -> Result<MutexGuard<'_, StdRng>> {
        self.rng.lock().map_err(|_| LetrackerError::Storage {
            message: "scheduler rng lock poisoned".into(),
        })
    }

    /// Records a live attempt on `item_id` and reschedules it.
    pub fn process_review(
        &self,
        user_id: &str,
        item_id: ItemId,
        grade: Grade,
    ) -> Result<ReviewOutput> {
        let now = self.clock.now();
        let mut state = self
            .repo
            .get_state(user_id, item_id)?
            .unwrap_or_else(|| ReviewState::new(user_id, item_id, now));

        let output = {
            let mut rng = self.rng()?;
            self.scheduler
                .next_review(&ReviewInput::from(&state), grade, 0.0, now, &mut rng)
        };
        state.apply(&output);
        state.last_reviewed_at = Some(now);

        self.repo.upsert_state(&state)?;
        self.repo
            .append_log(&AttemptLog::new(user_id, item_id, grade, now))?;
        info!(
            "user {user_id} graded item {item_id} {grade}: next review in {} days",
            output.interval
        );
        Ok(output)
    }

    /// Rebuilds schedules from a batch of past submissions.
    ///
    /// Items that cannot be resolved are reported and skipped. The first
    /// failure to persist a replayed item stops the import; items persisted
    /// before it stay written.
    pub fn import_history(
        &self,
        user_id: &str,
        records: Vec<HistoryRecord>,
    ) -> Result<ImportReport> {
        let total = records.len();
        let groups = group_by_item(parse_records(records)?);
        info!(
            "importing {total} submissions across {} items for user {user_id}",
            groups.len()
        );

        let mut report = ImportReport::default();
        let mut resolved = Vec::with_capacity(groups.len());
        {
            let mut rng = self.rng()?;
            for history in groups {
                match self.repo.find_or_create_item(&history.slug, &history.title) {
                    Ok(item_id) => resolved.push((item_id, rng.random::<u64>(), history)),
                    Err(e) => {
                        warn!("skipping `{}`: {e}", history.slug);
                        report.items.push(ItemReport::Unresolved {
                            slug: history.slug,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        let threshold = self.config.same_day_threshold_days;
        let replays = resolved
            .into_par_iter()
            .map(|(item_id, seed, history)| {
                let mut rng = StdRng::seed_from_u64(seed);
                let replay = replay_with_threshold(
                    &self.scheduler,
                    user_id,
                    item_id,
                    &history.events,
                    threshold,
                    &mut rng,
                );
                (history, item_id, replay)
            })
            .collect::<Vec<_>>();

        for (history, item_id, replay) in replays {
            let ItemHistory { slug, .. } = history;
            let persisted = replay.and_then(|replay| self.persist(replay));
            match persisted {
                Ok((attempts, state)) => report.items.push(ItemReport::Imported {
                    slug,
                    item_id,
                    attempts,
                    state,
                }),
                Err(e) => {
                    warn!("import halted at `{slug}`: {e}");
                    return Err(LetrackerError::ImportHalted {
                        slug,
                        report,
                        source: Box::new(e),
                    });
                }
            }
        }
        info!(
            "imported {} items, {} unresolved",
            report.imported().count(),
            report.unresolved().count()
        );
        Ok(report)
    }

    fn persist(&self, replay: Replay) -> Result<(usize, ReviewState)> {
        let Replay { state, logs, .. } = replay;
        self.repo.upsert_state(&state)?;
        if !logs.is_empty() {
            self.repo.append_logs_batch(&logs)?;
        }
        Ok((logs.len(), state))
    }

    /// Adds an item to the user's list without an attempt. It shows up as new
    /// until the first review. Existing states are left alone.
    pub fn enroll(&self, user_id: &str, slug: &str, title: &str) -> Result<ItemId> {
        let item_id = self.repo.find_or_create_item(slug, title)?;
        if self.repo.get_state(user_id, item_id)?.is_none() {
            self.repo
                .upsert_state(&ReviewState::new(user_id, item_id, self.clock.now()))?;
        }
        Ok(item_id)
    }

    pub fn due_tasks(&self, user_id: &str, limit: usize) -> Result<Vec<Task>> {
        let now = self.clock.now();
        let candidates = self.repo.due_candidates(user_id, now)?;
        Ok(rank_due_tasks(candidates, now, limit))
    }

    pub fn today_tasks(&self, user_id: &str) -> Result<Vec<Task>> {
        self.due_tasks(user_id, self.config.daily_task_limit)
    }

    pub fn state(&self, user_id: &str, item_id: ItemId) -> Result<ReviewState> {
        self.repo.item(item_id)?;
        Ok(self
            .repo
            .get_state(user_id, item_id)?
            .unwrap_or_else(|| ReviewState::new(user_id, item_id, self.clock.now())))
    }

    pub fn status(&self, user_id: &str, item_id: ItemId) -> Result<Status> {
        Ok(self.state(user_id, item_id)?.status)
    }
}
