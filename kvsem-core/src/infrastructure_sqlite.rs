//! SQLite-backed KvStore implementation.
//! Several processes can open the same database file and contend on it the
//! way they would on a shared server.
//!
//! Enable with the `sqlite` feature flag:
//! ```toml
//! kvsem-core = { path = "../kvsem-core", features = ["sqlite"] }
//! ```

use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::{millis, Clock, SystemClock};
use crate::error::StoreError;
use crate::infrastructure::{KvStore, KvStoreExt};
use crate::types::*;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A persistent store backed by SQLite.
///
/// Uses WAL mode, and every operation runs in an immediate transaction so
/// writers on the same file are serialized.
pub struct SqliteKvStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteKvStore {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    pub fn open_with_clock(path: &str, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key          TEXT PRIMARY KEY,
                value        BLOB NOT NULL,
                create_index INTEGER NOT NULL,
                modify_index INTEGER NOT NULL,
                lock_index   INTEGER NOT NULL DEFAULT 0,
                session      TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_kv_session ON kv(session);

            CREATE TABLE IF NOT EXISTS sessions (
                id            TEXT PRIMARY KEY,
                name          TEXT NOT NULL,
                behavior      TEXT NOT NULL,
                lock_delay_ms INTEGER NOT NULL,
                ttl_ms        INTEGER NOT NULL,
                expires_at    INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS lock_delays (
                key   TEXT PRIMARY KEY,
                until INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS counters (
                name  TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );
            INSERT OR IGNORE INTO counters (name, value) VALUES ('index', 0);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    /// Runs `f` in an immediate transaction after evicting expired sessions.
    fn with_tx<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>, u64) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let now = self.clock.now_ms();
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        evict_expired(&tx, now)?;
        let result = f(&tx, now)?;
        tx.commit()?;
        Ok(result)
    }

    fn parse_behavior(s: &str) -> SessionBehavior {
        match s {
            "release" => SessionBehavior::Release,
            _ => SessionBehavior::Delete,
        }
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<KvEntry> {
        Ok(KvEntry {
            key: row.get(0)?,
            value: row.get(1)?,
            create_index: row.get(2)?,
            modify_index: row.get(3)?,
            lock_index: row.get(4)?,
            session: row.get(5)?,
        })
    }
}

fn next_index(tx: &Transaction<'_>) -> rusqlite::Result<u64> {
    tx.query_row(
        "UPDATE counters SET value = value + 1 WHERE name = 'index' RETURNING value",
        [],
        |row| row.get(0),
    )
}

/// SQLite integers are signed; keep durations small enough that
/// `now + duration` stays an INTEGER in SQL too.
const MAX_STORED_MS: u64 = i64::MAX as u64 / 2;

fn stored_ms(duration: Duration) -> u64 {
    millis(duration).min(MAX_STORED_MS)
}

fn invalidate_session(tx: &Transaction<'_>, session_id: &str, now: u64) -> Result<bool, StoreError> {
    let session: Option<(String, u64)> = tx
        .query_row(
            "SELECT behavior, lock_delay_ms FROM sessions WHERE id = ?1",
            params![session_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((behavior, lock_delay_ms)) = session else {
        return Ok(false);
    };

    if lock_delay_ms > 0 {
        tx.execute(
            "INSERT OR REPLACE INTO lock_delays (key, until)
             SELECT key, ?2 FROM kv WHERE session = ?1",
            params![session_id, now.saturating_add(lock_delay_ms)],
        )?;
    }

    match SqliteKvStore::parse_behavior(&behavior) {
        SessionBehavior::Delete => {
            tx.execute("DELETE FROM kv WHERE session = ?1", params![session_id])?;
        }
        SessionBehavior::Release => {
            let index = next_index(tx)?;
            tx.execute(
                "UPDATE kv SET session = NULL, modify_index = ?2 WHERE session = ?1",
                params![session_id, index],
            )?;
        }
    }

    tx.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
    Ok(true)
}

fn evict_expired(tx: &Transaction<'_>, now: u64) -> Result<usize, StoreError> {
    let expired: Vec<String> = {
        let mut stmt =
            tx.prepare("SELECT id FROM sessions WHERE expires_at != 0 AND expires_at < ?1")?;
        let rows = stmt.query_map(params![now], |row| row.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    for id in &expired {
        invalidate_session(tx, id, now)?;
    }
    tx.execute("DELETE FROM lock_delays WHERE until <= ?1", params![now])?;
    Ok(expired.len())
}

impl KvStore for SqliteKvStore {
    fn create_session(&self, request: &SessionRequest) -> Result<String, StoreError> {
        self.with_tx(|tx, now| {
            let id = nanoid::nanoid!();
            let ttl_ms = stored_ms(request.ttl);
            let expires_at = if ttl_ms == 0 { 0 } else { now.saturating_add(ttl_ms) };
            tx.execute(
                "INSERT INTO sessions (id, name, behavior, lock_delay_ms, ttl_ms, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    request.name,
                    request.behavior.as_str(),
                    stored_ms(request.lock_delay),
                    ttl_ms,
                    expires_at,
                ],
            )?;
            Ok(id)
        })
    }

    fn renew_session(&self, session_id: &str) -> Result<bool, StoreError> {
        self.with_tx(|tx, now| {
            let rows = tx.execute(
                "UPDATE sessions
                 SET expires_at = CASE WHEN ttl_ms = 0 THEN 0 ELSE ?2 + ttl_ms END
                 WHERE id = ?1",
                params![session_id, now],
            )?;
            Ok(rows > 0)
        })
    }

    fn destroy_session(&self, session_id: &str) -> Result<(), StoreError> {
        self.with_tx(|tx, now| {
            invalidate_session(tx, session_id, now)?;
            Ok(())
        })
    }

    fn put(&self, key: &str, value: &[u8], options: &PutOptions) -> Result<bool, StoreError> {
        self.with_tx(|tx, now| {
            let current: Option<(u64, Option<String>)> = tx
                .query_row(
                    "SELECT modify_index, session FROM kv WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            if let Some(expected) = options.cas {
                let matches = match &current {
                    None => expected == 0,
                    Some((index, _)) => expected == *index,
                };
                if !matches {
                    return Ok(false);
                }
            }

            let mut acquired_now = false;
            if let Some(session_id) = &options.acquire {
                let exists: Option<String> = tx
                    .query_row(
                        "SELECT id FROM sessions WHERE id = ?1",
                        params![session_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if exists.is_none() {
                    return Err(StoreError::InvalidSession(session_id.clone()));
                }

                match current.as_ref().and_then(|(_, holder)| holder.as_deref()) {
                    Some(holder) if holder == session_id => {}
                    Some(_) => return Ok(false),
                    None => {
                        let delayed: Option<u64> = tx
                            .query_row(
                                "SELECT until FROM lock_delays WHERE key = ?1 AND until > ?2",
                                params![key, now],
                                |row| row.get(0),
                            )
                            .optional()?;
                        if delayed.is_some() {
                            return Ok(false);
                        }
                        acquired_now = true;
                    }
                }
            }

            let index = next_index(tx)?;
            if current.is_some() {
                if acquired_now {
                    tx.execute(
                        "UPDATE kv SET value = ?2, modify_index = ?3,
                                lock_index = lock_index + 1, session = ?4
                         WHERE key = ?1",
                        params![key, value, index, options.acquire],
                    )?;
                } else {
                    tx.execute(
                        "UPDATE kv SET value = ?2, modify_index = ?3 WHERE key = ?1",
                        params![key, value, index],
                    )?;
                }
            } else {
                tx.execute(
                    "INSERT INTO kv (key, value, create_index, modify_index, lock_index, session)
                     VALUES (?1, ?2, ?3, ?3, ?4, ?5)",
                    params![key, value, index, u64::from(acquired_now), options.acquire],
                )?;
            }
            Ok(true)
        })
    }

    fn list_recursive(&self, prefix: &str) -> Result<Vec<KvEntry>, StoreError> {
        self.with_tx(|tx, _| {
            let mut stmt = tx.prepare(
                "SELECT key, value, create_index, modify_index, lock_index, session
                 FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
            )?;
            let rows = stmt.query_map(params![prefix], |row| Self::row_to_entry(row))?;
            Ok(rows.collect::<rusqlite::Result<_>>()?)
        })
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.with_tx(|tx, _| {
            if tx.execute("DELETE FROM kv WHERE key = ?1", params![key])? > 0 {
                next_index(tx)?;
            }
            Ok(())
        })
    }
}

impl KvStoreExt for SqliteKvStore {
    fn sessions(&self) -> Result<Vec<SessionInfo>, StoreError> {
        self.with_tx(|tx, _| {
            let mut stmt = tx.prepare(
                "SELECT id, name, behavior, lock_delay_ms, ttl_ms, expires_at
                 FROM sessions ORDER BY id",
            )?;
            let rows = stmt.query_map([], |row| {
                let behavior: String = row.get(2)?;
                Ok(SessionInfo {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    behavior: Self::parse_behavior(&behavior),
                    lock_delay_ms: row.get(3)?,
                    ttl_ms: row.get(4)?,
                    expires_at: row.get(5)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<_>>()?)
        })
    }

    fn evict_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now_ms();
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let evicted = evict_expired(&tx, now)?;
        tx.commit()?;
        Ok(evicted)
    }
}
