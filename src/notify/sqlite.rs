//! SQLite-backed journal of committed transitions.
//!
//! Acts as the persistence-sync collaborator: every [`SyncEvent`] is stored as
//! a versioned JSON envelope keyed by `(event_id, version)`, so a retried
//! delivery of the same event is a no-op.

use std::{
    path::Path,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    rsvp::Snapshot,
    runtime::events::SyncEvent,
    types::Version,
};

use super::{DeliveryFuture, SyncError, SyncResult, SyncSubscriber};

/// Version number for serialized [`SyncEnvelope`] payloads.
pub const SYNC_FORMAT_VERSION: u16 = 1;

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped event.
    pub event: SyncEvent,
}

impl SyncEnvelope {
    /// Constructs an envelope using [`SYNC_FORMAT_VERSION`].
    pub fn new(event: SyncEvent) -> Self {
        Self {
            format_version: SYNC_FORMAT_VERSION,
            event,
        }
    }
}

/// SQLite implementation of [`SyncSubscriber`].
#[derive(Clone)]
pub struct SqliteSyncJournal {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSyncJournal {
    /// Opens or creates a journal at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory journal.
    pub fn open_in_memory() -> SyncResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> SyncResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Stores `event` unless its `(event_id, version)` is already present.
    pub async fn record(&self, event: &SyncEvent) -> SyncResult<()> {
        let payload = serde_json::to_vec(&SyncEnvelope::new(event.clone()))?;
        let event_id = event.event_id.clone();
        let version = event.version;
        let kind = event.report.kind.as_str();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO sync_events(event_id, version, ts_ms, kind, payload) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![event_id, version as i64, now_ms() as i64, kind, payload],
            )?;
            Ok(())
        })
        .await
    }

    /// Snapshot carried by the newest journaled version of `event_id`.
    pub async fn latest_snapshot(&self, event_id: &str) -> SyncResult<Option<Snapshot>> {
        let event_id = event_id.to_string();
        self.with_conn(move |conn| {
            let payload: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT payload FROM sync_events WHERE event_id = ?1 ORDER BY version DESC LIMIT 1",
                    params![event_id],
                    |row| row.get(0),
                )
                .optional()?;

            payload
                .map(|bytes| decode_envelope(&bytes).map(|env| env.event.snapshot))
                .transpose()
        })
        .await
    }

    /// Journaled versions of `event_id`, ascending.
    pub async fn versions(&self, event_id: &str) -> SyncResult<Vec<Version>> {
        let event_id = event_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT version FROM sync_events WHERE event_id = ?1 ORDER BY version ASC")?;
            let rows = stmt.query_map(params![event_id], |row| row.get::<_, i64>(0))?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row? as Version);
            }
            Ok(out)
        })
        .await
    }

    /// Every journaled event for `event_id`, ascending by version.
    pub async fn load_events(&self, event_id: &str) -> SyncResult<Vec<SyncEvent>> {
        let event_id = event_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT payload FROM sync_events WHERE event_id = ?1 ORDER BY version ASC")?;
            let rows = stmt.query_map(params![event_id], |row| row.get::<_, Vec<u8>>(0))?;

            let mut out = Vec::new();
            for row in rows {
                out.push(decode_envelope(&row?)?.event);
            }
            Ok(out)
        })
        .await
    }

    /// Total rows across all events.
    pub async fn len(&self) -> SyncResult<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM sync_events", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> SyncResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> SyncResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&conn)
        })
        .await
        .map_err(|e| SyncError::Join(e.to_string()))?
    }
}

impl SyncSubscriber for SqliteSyncJournal {
    fn name(&self) -> &str {
        "sqlite-journal"
    }

    fn deliver<'a>(&'a self, event: &'a SyncEvent) -> DeliveryFuture<'a> {
        Box::pin(self.record(event))
    }
}

fn decode_envelope(payload: &[u8]) -> SyncResult<SyncEnvelope> {
    let envelope: SyncEnvelope = serde_json::from_slice(payload)?;
    if envelope.format_version != SYNC_FORMAT_VERSION {
        return Err(SyncError::Subscriber(format!(
            "unsupported sync format version: {}",
            envelope.format_version
        )));
    }
    Ok(envelope)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
