//! Persistence contract used by [`crate::ReviewService`], and an in-memory
//! implementation of it.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use log::debug;

use crate::error::{LetrackerError, Result};
use crate::priority::is_due;
use crate::state::{AttemptLog, DueCandidate, Item, ItemId, ReviewState};

/// Storage the service reads states from and writes states and logs to.
///
/// Implementations only need to be internally consistent per call. Two live
/// attempts on the same (user, item) racing each other is the caller's
/// problem.
pub trait Repository: Send + Sync {
    fn find_item(&self, slug: &str) -> Result<Option<Item>>;

    fn create_item(&self, slug: &str, title: &str) -> Result<ItemId>;

    fn item(&self, item_id: ItemId) -> Result<Item>;

    fn find_or_create_item(&self, slug: &str, title: &str) -> Result<ItemId> {
        match self.find_item(slug)? {
            Some(item) => Ok(item.id),
            None => self.create_item(slug, title),
        }
    }

    /// `None` when the user never touched the item.
    fn get_state(&self, user_id: &str, item_id: ItemId) -> Result<Option<ReviewState>>;

    /// Replaces the whole state of (user, item), inserting it if needed.
    fn upsert_state(&self, state: &ReviewState) -> Result<()>;

    fn append_log(&self, log: &AttemptLog) -> Result<()>;

    /// Appends every log or none of them.
    fn append_logs_batch(&self, logs: &[AttemptLog]) -> Result<()>;

    /// Logs of (user, item), oldest first.
    fn logs(&self, user_id: &str, item_id: ItemId) -> Result<Vec<AttemptLog>>;

    /// States of `user_id` that are due at `now` or still new, joined with
    /// their items and ordered by item id. Ranking is left to the caller.
    fn due_candidates(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<DueCandidate>>;
}

#[derive(Debug, Default)]
struct Tables {
    items: BTreeMap<ItemId, Item>,
    slugs: HashMap<String, ItemId>,
    states: HashMap<(String, ItemId), ReviewState>,
    logs: Vec<AttemptLog>,
}

/// Keeps everything in process memory. Useful for tests and one-shot imports.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    tables: RwLock<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| LetrackerError::Storage {
            message: "memory repository lock poisoned".into(),
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|_| LetrackerError::Storage {
            message: "memory repository lock poisoned".into(),
        })
    }
}

impl Repository for MemoryRepository {
    fn find_item(&self, slug: &str) -> Result<Option<Item>> {
        let tables = self.read()?;
        Ok(tables
            .slugs
            .get(slug)
            .and_then(|id| tables.items.get(id))
            .cloned())
    }

    fn create_item(&self, slug: &str, title: &str) -> Result<ItemId> {
        let mut tables = self.write()?;
        if tables.slugs.contains_key(slug) {
            return Err(LetrackerError::Storage {
                message: format!("item `{slug}` already exists"),
            });
        }
        let id = tables.items.keys().next_back().map_or(1, |id| id + 1);
        tables.items.insert(
            id,
            Item {
                id,
                slug: slug.into(),
                title: title.into(),
                difficulty: None,
            },
        );
        tables.slugs.insert(slug.into(), id);
        debug!("created item {id} for `{slug}`");
        Ok(id)
    }

    fn item(&self, item_id: ItemId) -> Result<Item> {
        self.read()?
            .items
            .get(&item_id)
            .cloned()
            .ok_or(LetrackerError::ItemNotFound { item_id })
    }

    fn get_state(&self, user_id: &str, item_id: ItemId) -> Result<Option<ReviewState>> {
        Ok(self
            .read()?
            .states
            .get(&(user_id.to_string(), item_id))
            .cloned())
    }

    fn upsert_state(&self, state: &ReviewState) -> Result<()> {
        let mut tables = self.write()?;
        if !tables.items.contains_key(&state.item_id) {
            return Err(LetrackerError::ItemNotFound {
                item_id: state.item_id,
            });
        }
        tables
            .states
            .insert((state.user_id.clone(), state.item_id), state.clone());
        Ok(())
    }

    fn append_log(&self, log: &AttemptLog) -> Result<()> {
        self.append_logs_batch(std::slice::from_ref(log))
    }

    fn append_logs_batch(&self, logs: &[AttemptLog]) -> Result<()> {
        let mut tables = self.write()?;
        if let Some(log) = logs.iter().find(|l| !tables.items.contains_key(&l.item_id)) {
            return Err(LetrackerError::ItemNotFound {
                item_id: log.item_id,
            });
        }
        tables.logs.extend_from_slice(logs);
        Ok(())
    }

    fn logs(&self, user_id: &str, item_id: ItemId) -> Result<Vec<AttemptLog>> {
        let mut logs: Vec<_> = self
            .read()?
            .logs
            .iter()
            .filter(|l| l.user_id == user_id && l.item_id == item_id)
            .cloned()
            .collect();
        logs.sort_by_key(|l| l.attempted_at);
        Ok(logs)
    }

    fn due_candidates(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<DueCandidate>> {
        let tables = self.read()?;
        let mut candidates = Vec::new();
        for (id, item) in &tables.items {
            let Some(state) = tables.states.get(&(user_id.to_string(), *id)) else {
                continue;
            };
            let candidate = DueCandidate {
                item: item.clone(),
                status: state.status,
                interval_days: state.interval_days,
                next_review_at: state.next_review_at,
            };
            if is_due(&candidate, now) {
                candidates.push(candidate);
            }
        }
        Ok(candidates)
    }
}
