//! Durable tier: SQLite-backed bar store
//!
//! One row per (symbol, timeframe, timestamp, provider) observation; the
//! winner for an identity is resolved at read time from provider trust
//! order. The merge upsert runs its read-merge-read cycle inside a single
//! transaction under the connection lock, so concurrent writers of the same
//! identity observe one linear history of winner transitions.

use crate::config::ProviderPriority;
use crate::error::CacheResult;
use crate::models::{Bar, BarKey, Timeframe};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, Row};
use std::path::Path;
use tracing::{debug, info};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -64000;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS bars_cache (
    symbol     TEXT    NOT NULL,
    timeframe  TEXT    NOT NULL,
    timestamp  INTEGER NOT NULL,
    provider   TEXT    NOT NULL,
    open       REAL    NOT NULL,
    high       REAL    NOT NULL,
    low        REAL    NOT NULL,
    close      REAL    NOT NULL,
    volume     REAL    NOT NULL,
    revision   INTEGER NOT NULL,
    fetched_at INTEGER NOT NULL,
    PRIMARY KEY (symbol, timeframe, timestamp, provider)
) WITHOUT ROWID;

-- Winner resolution and range scans group by the bar identity.
CREATE INDEX IF NOT EXISTS idx_bars_cache_identity
    ON bars_cache(symbol, timeframe, timestamp);
"#;

const BAR_COLUMNS: &str = "timestamp, open, high, low, close, volume, provider, revision, fetched_at";

/// Winner transition observed by one merge upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    pub old_winner: Option<Bar>,
    pub new_winner: Option<Bar>,
}

/// SQLite-backed store of provider bar observations.
pub struct BarStore {
    conn: Mutex<Connection>,
    priority: ProviderPriority,
}

impl BarStore {
    /// Open or create a file-backed store.
    pub fn open(db_path: &str, priority: ProviderPriority) -> CacheResult<Self> {
        let path = Path::new(db_path);
        if let Some(parent) = path.parent() {
            if !parent.exists() && !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(db_path, flags)?;

        let store = Self {
            conn: Mutex::new(conn),
            priority,
        };
        store.init()?;
        info!(path = %db_path, "bar store opened");
        Ok(store)
    }

    /// Open an in-memory store (tests and ephemeral caches).
    pub fn open_memory(priority: ProviderPriority) -> CacheResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            priority,
        };
        store.init()?;
        Ok(store)
    }

    /// Idempotent schema creation.
    pub fn init(&self) -> CacheResult<()> {
        self.conn.lock().execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    /// Merge one observation into the store and report the winner before
    /// and after.
    ///
    /// Acceptance per (identity, provider) row: a new provider row is
    /// inserted; a higher revision replaces; an equal revision replaces
    /// only when the content differs; a lower revision is discarded.
    pub fn upsert(&self, key: &BarKey, bar: &Bar) -> CacheResult<UpsertOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let mut rows = identity_rows(&tx, key)?;
        let old_winner = self.pick_winner(&rows);

        let existing = rows.iter().position(|r| r.provider == bar.provider);
        let accept = match existing {
            None => true,
            Some(i) => {
                let current = &rows[i];
                if bar.revision > current.revision {
                    true
                } else if bar.revision == current.revision {
                    current != bar
                } else {
                    false
                }
            }
        };

        if accept {
            tx.execute(
                "INSERT OR REPLACE INTO bars_cache
                 (symbol, timeframe, timestamp, provider,
                  open, high, low, close, volume, revision, fetched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    key.symbol,
                    key.timeframe.as_str(),
                    key.timestamp,
                    bar.provider,
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                    bar.revision,
                    bar.fetched_at,
                ],
            )?;
            match existing {
                Some(i) => rows[i] = bar.clone(),
                None => rows.push(bar.clone()),
            }
        } else {
            debug!(
                symbol = %key.symbol,
                timestamp = key.timestamp,
                provider = %bar.provider,
                revision = bar.revision,
                "discarded superseded observation"
            );
        }
        tx.commit()?;

        let new_winner = self.pick_winner(&rows);
        Ok(UpsertOutcome {
            old_winner,
            new_winner,
        })
    }

    /// Winning bar for an identity, if any observation exists.
    pub fn winner(&self, key: &BarKey) -> CacheResult<Option<Bar>> {
        let conn = self.conn.lock();
        let rows = identity_rows(&conn, key)?;
        Ok(self.pick_winner(&rows))
    }

    /// The winner for each distinct timestamp in `[start, end)`, ascending.
    pub fn winners_in_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: i64,
        end: i64,
    ) -> CacheResult<Vec<Bar>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {BAR_COLUMNS} FROM bars_cache
             WHERE symbol = ?1 AND timeframe = ?2
               AND timestamp >= ?3 AND timestamp < ?4
             ORDER BY timestamp ASC, provider ASC"
        ))?;
        let observations = stmt
            .query_map(
                params![symbol, timeframe.as_str(), start, end],
                bar_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let mut winners = Vec::new();
        let mut group: Vec<Bar> = Vec::new();
        for bar in observations {
            if let Some(last) = group.last() {
                if last.timestamp != bar.timestamp {
                    if let Some(w) = self.pick_winner(&group) {
                        winners.push(w);
                    }
                    group.clear();
                }
            }
            group.push(bar);
        }
        if let Some(w) = self.pick_winner(&group) {
            winners.push(w);
        }
        Ok(winners)
    }

    /// Highest trust wins regardless of revision; the primary key keeps one
    /// row per provider, already at that provider's highest accepted
    /// revision. Equal-trust ties break by provider name, then revision.
    fn pick_winner(&self, rows: &[Bar]) -> Option<Bar> {
        rows.iter()
            .min_by(|a, b| {
                self.priority
                    .cmp_providers(&a.provider, &b.provider)
                    .then_with(|| b.revision.cmp(&a.revision))
            })
            .cloned()
    }
}

fn identity_rows(conn: &Connection, key: &BarKey) -> rusqlite::Result<Vec<Bar>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {BAR_COLUMNS} FROM bars_cache
         WHERE symbol = ?1 AND timeframe = ?2 AND timestamp = ?3
         ORDER BY provider ASC"
    ))?;
    let rows = stmt
        .query_map(
            params![key.symbol, key.timeframe.as_str(), key.timestamp],
            bar_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn bar_from_row(row: &Row) -> rusqlite::Result<Bar> {
    Ok(Bar {
        timestamp: row.get(0)?,
        open: row.get(1)?,
        high: row.get(2)?,
        low: row.get(3)?,
        close: row.get(4)?,
        volume: row.get(5)?,
        provider: row.get(6)?,
        revision: row.get(7)?,
        fetched_at: row.get(8)?,
    })
}
