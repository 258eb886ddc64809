//! Run Events Log
//! Append-only structured events for every run, queryable after the fact.
//!
//! WAL mode so the controller can keep appending while an operator
//! inspects a live run from another connection.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::debug;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS run_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    round INTEGER,
    payload_json TEXT NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_run_events_product
    ON run_events(product_id, created_at DESC);

CREATE INDEX IF NOT EXISTS idx_run_events_run
    ON run_events(run_id, id);
"#;

/// One structured event row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub product_id: String,
    pub run_id: String,
    pub event_type: String,
    pub round: Option<u32>,
    pub payload: serde_json::Value,
}

/// Append-only events log
pub struct EventLog {
    conn: Arc<Mutex<Connection>>,
}

impl EventLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open events db {}", path.display()))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to apply events schema")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory log for tests and dry runs
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory events db")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to apply events schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn append(&self, event: &RunEvent) -> Result<()> {
        let payload = serde_json::to_string(&event.payload)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO run_events (product_id, run_id, event_type, round, payload_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.product_id,
                event.run_id,
                event.event_type,
                event.round,
                payload,
                Utc::now().timestamp(),
            ],
        )
        .context("Failed to append run event")?;

        debug!(
            product = %event.product_id,
            event = %event.event_type,
            "📜 event appended"
        );
        Ok(())
    }

    pub fn events_for_run(&self, run_id: &str) -> Result<Vec<RunEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT product_id, run_id, event_type, round, payload_json
             FROM run_events WHERE run_id = ?1 ORDER BY id",
        )?;

        let rows = stmt.query_map(params![run_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<u32>>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (product_id, run_id, event_type, round, payload_json) = row?;
            events.push(RunEvent {
                product_id,
                run_id,
                event_type,
                round,
                payload: serde_json::from_str(&payload_json).unwrap_or(serde_json::Value::Null),
            });
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn append_and_read_back_in_order() {
        let log = EventLog::in_memory().unwrap();

        for (i, event_type) in ["round_started", "fetch_outcome", "stop_decision"]
            .iter()
            .enumerate()
        {
            log.append(&RunEvent {
                product_id: "p1".to_string(),
                run_id: "r1".to_string(),
                event_type: event_type.to_string(),
                round: Some(i as u32),
                payload: json!({"seq": i}),
            })
            .unwrap();
        }

        let events = log.events_for_run("r1").unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_type, "round_started");
        assert_eq!(events[2].event_type, "stop_decision");
        assert_eq!(events[1].payload["seq"], 1);
    }
}
