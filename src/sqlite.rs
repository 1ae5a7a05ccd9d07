use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params};
use snafu::ResultExt;

use crate::error::{LetrackerError, Result, SqliteSnafu};
use crate::state::{
    AttemptLog, Difficulty, DueCandidate, Grade, Item, ItemId, LogStatus, ReviewState, Status,
};
use crate::storage::Repository;

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    slug TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    difficulty TEXT
);

CREATE TABLE IF NOT EXISTS review_states (
    user_id TEXT NOT NULL,
    item_id INTEGER NOT NULL REFERENCES items(id),
    interval_days INTEGER NOT NULL DEFAULT 0,
    ease_factor REAL NOT NULL DEFAULT 2.5,
    repetitions INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'NEW',
    next_review_at INTEGER NOT NULL,
    last_reviewed_at INTEGER,
    PRIMARY KEY (user_id, item_id)
);

CREATE TABLE IF NOT EXISTS attempt_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    item_id INTEGER NOT NULL REFERENCES items(id),
    status TEXT NOT NULL,
    grade INTEGER NOT NULL,
    attempted_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_review_states_due ON review_states (user_id, next_review_at);
CREATE INDEX IF NOT EXISTS idx_attempt_logs_item ON attempt_logs (user_id, item_id);
";

macro_rules! text_column {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_ref()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse::<$ty>()
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

text_column!(Status);
text_column!(LogStatus);
text_column!(Difficulty);

impl ToSql for Grade {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(i64::from(self.value())))
    }
}

impl FromSql for Grade {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let ValueRef::Integer(i) = value else {
            return Err(FromSqlError::InvalidType);
        };
        u8::try_from(i)
            .ok()
            .and_then(Grade::from_repr)
            .ok_or(FromSqlError::OutOfRange(i))
    }
}

fn millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let value: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(value)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, value))
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        slug: row.get(1)?,
        title: row.get(2)?,
        difficulty: row.get(3)?,
    })
}

impl TryFrom<&Row<'_>> for ReviewState {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> rusqlite::Result<Self> {
        let last_reviewed_at: Option<i64> = row.get(7)?;
        Ok(ReviewState {
            user_id: row.get(0)?,
            item_id: row.get(1)?,
            interval_days: row.get(2)?,
            ease_factor: row.get(3)?,
            repetitions: row.get(4)?,
            status: row.get(5)?,
            next_review_at: time_column(row, 6)?,
            last_reviewed_at: match last_reviewed_at {
                Some(_) => Some(time_column(row, 7)?),
                None => None,
            },
        })
    }
}

impl TryFrom<&Row<'_>> for AttemptLog {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(AttemptLog {
            user_id: row.get(0)?,
            item_id: row.get(1)?,
            status: row.get(2)?,
            grade: row.get(3)?,
            attempted_at: time_column(row, 4)?,
        })
    }
}

/// [`Repository`] backed by a single SQLite connection.
#[derive(Debug)]
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("opening review database at {}", path.display());
        Self::with_connection(Connection::open(path).context(SqliteSnafu)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory().context(SqliteSnafu)?)
    }

    /// Creates missing tables on `conn` and takes ownership of it.
    pub fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).context(SqliteSnafu)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| LetrackerError::Storage {
            message: "sqlite connection lock poisoned".into(),
        })
    }
}

impl Repository for SqliteRepository {
    fn find_item(&self, slug: &str) -> Result<Option<Item>> {
        self.conn()?
            .query_row(
                "SELECT id, slug, title, difficulty FROM items WHERE slug = ?1",
                params![slug],
                item_from_row,
            )
            .optional()
            .context(SqliteSnafu)
    }

    fn create_item(&self, slug: &str, title: &str) -> Result<ItemId> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO items (slug, title) VALUES (?1, ?2)",
            params![slug, title],
        )
        .context(SqliteSnafu)?;
        let id = conn.last_insert_rowid();
        debug!("created item {id} for `{slug}`");
        Ok(id)
    }

    fn item(&self, item_id: ItemId) -> Result<Item> {
        self.conn()?
            .query_row(
                "SELECT id, slug, title, difficulty FROM items WHERE id = ?1",
                params![item_id],
                item_from_row,
            )
            .optional()
            .context(SqliteSnafu)?
            .ok_or(LetrackerError::ItemNotFound { item_id })
    }

    fn get_state(&self, user_id: &str, item_id: ItemId) -> Result<Option<ReviewState>> {
        self.conn()?
            .query_row(
                "SELECT user_id, item_id, interval_days, ease_factor, repetitions, status,
                        next_review_at, last_reviewed_at
                 FROM review_states WHERE user_id = ?1 AND item_id = ?2",
                params![user_id, item_id],
                |row| ReviewState::try_from(row),
            )
            .optional()
            .context(SqliteSnafu)
    }

    fn upsert_state(&self, state: &ReviewState) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO review_states (
                    user_id, item_id, interval_days, ease_factor, repetitions, status,
                    next_review_at, last_reviewed_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (user_id, item_id) DO UPDATE SET
                    interval_days = excluded.interval_days,
                    ease_factor = excluded.ease_factor,
                    repetitions = excluded.repetitions,
                    status = excluded.status,
                    next_review_at = excluded.next_review_at,
                    last_reviewed_at = excluded.last_reviewed_at",
                params![
                    state.user_id,
                    state.item_id,
                    state.interval_days,
                    state.ease_factor,
                    state.repetitions,
                    state.status,
                    millis(state.next_review_at),
                    state.last_reviewed_at.map(millis),
                ],
            )
            .context(SqliteSnafu)?;
        Ok(())
    }

    fn append_log(&self, log: &AttemptLog) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO attempt_logs (user_id, item_id, status, grade, attempted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    log.user_id,
                    log.item_id,
                    log.status,
                    log.grade,
                    millis(log.attempted_at)
                ],
            )
            .context(SqliteSnafu)?;
        Ok(())
    }

    fn append_logs_batch(&self, logs: &[AttemptLog]) -> Result<()> {
        let mut conn = self.conn()?;
        // Dropping the transaction without commit rolls every insert back.
        let tx = conn.transaction().context(SqliteSnafu)?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO attempt_logs (user_id, item_id, status, grade, attempted_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .context(SqliteSnafu)?;
            for log in logs {
                stmt.execute(params![
                    log.user_id,
                    log.item_id,
                    log.status,
                    log.grade,
                    millis(log.attempted_at)
                ])
                .context(SqliteSnafu)?;
            }
        }
        tx.commit().context(SqliteSnafu)
    }

    fn logs(&self, user_id: &str, item_id: ItemId) -> Result<Vec<AttemptLog>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT user_id, item_id, status, grade, attempted_at
                 FROM attempt_logs WHERE user_id = ?1 AND item_id = ?2
                 ORDER BY attempted_at, id",
            )
            .context(SqliteSnafu)?;
        let logs = stmt
            .query_and_then(params![user_id, item_id], |row| AttemptLog::try_from(row))
            .context(SqliteSnafu)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context(SqliteSnafu)?;
        Ok(logs)
    }

    fn due_candidates(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<DueCandidate>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT i.id, i.slug, i.title, i.difficulty, s.status, s.interval_days,
                        s.next_review_at
                 FROM review_states s
                 JOIN items i ON s.item_id = i.id
                 WHERE s.user_id = ?1 AND (s.next_review_at <= ?2 OR s.status = 'NEW')
                 ORDER BY i.id",
            )
            .context(SqliteSnafu)?;
        let candidates = stmt
            .query_and_then(
                params![user_id, millis(now)],
                |row| -> rusqlite::Result<DueCandidate> {
                    Ok(DueCandidate {
                        item: item_from_row(row)?,
                        status: row.get(4)?,
                        interval_days: row.get(5)?,
                        next_review_at: time_column(row, 6)?,
                    })
                },
            )
            .context(SqliteSnafu)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context(SqliteSnafu)?;
        Ok(candidates)
    }
}
