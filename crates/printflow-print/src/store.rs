// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Optional job history persisted in SQLite.
//
// The in-memory queue stays authoritative; every state change is written
// through here so the history (payload included) survives a restart.  Rows
// are keyed by job id and carry the submission sequence number, which is
// what restores per-printer FIFO order on reload.
//
// At runtime the queue never touches SQLite itself.  It hands each change
// to a `HistoryWriter`, which applies them on a dedicated thread in the
// order they were made.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

use printflow_core::error::{PrintflowError, Result};
use printflow_core::types::{
    ErrorCode, JobFlags, JobId, JobStatus, Payload, PayloadFormat, PrintJob,
};

/// File name of the history database inside the data directory.
pub const HISTORY_FILE: &str = "jobs.db";

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        seq INTEGER NOT NULL UNIQUE,
        printer TEXT NOT NULL,
        format TEXT NOT NULL,
        digest TEXT NOT NULL,
        payload BLOB NOT NULL,
        auto_cut INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        submitted_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        retry_count INTEGER NOT NULL DEFAULT 0,
        error_message TEXT,
        error_code TEXT
    )
"#;

const SELECT_COLUMNS: &str = "id, seq, printer, format, digest, payload, auto_cut, status, \
     submitted_at, updated_at, attempts, retry_count, error_message, error_code";

/// SQLite-backed job history.  Calls are synchronous.
pub struct HistoryStore {
    conn: Mutex<Connection>,
}

impl HistoryStore {
    /// Open (or create) the history database.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Arc<Self>> {
        let conn = Connection::open(path.as_ref()).map_err(db_err("open"))?;

        // WAL survives unclean shutdowns more gracefully.
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err("WAL pragma"))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(db_err("create table"))?;

        info!("job history database opened");
        Ok(Arc::new(Self {
            conn: Mutex::new(conn),
        }))
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Arc<Self>> {
        let conn = Connection::open_in_memory().map_err(db_err("open in-memory"))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(db_err("create table"))?;
        debug!("in-memory job history opened");
        Ok(Arc::new(Self {
            conn: Mutex::new(conn),
        }))
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or overwrite a job row.
    pub fn upsert(&self, job: &PrintJob) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO jobs (id, seq, printer, format, digest, payload, auto_cut, status,
                     submitted_at, updated_at, attempts, retry_count, error_message, error_code)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(id) DO UPDATE SET
                     status = excluded.status,
                     updated_at = excluded.updated_at,
                     attempts = excluded.attempts,
                     retry_count = excluded.retry_count,
                     error_message = excluded.error_message,
                     error_code = excluded.error_code",
                params![
                    job.id.to_string(),
                    job.seq as i64,
                    job.printer,
                    job.payload.format.as_str(),
                    job.payload.digest,
                    job.payload.bytes.as_slice(),
                    job.flags.auto_cut,
                    job.status.as_str(),
                    job.submitted_at.to_rfc3339(),
                    job.updated_at.to_rfc3339(),
                    job.attempts,
                    job.retry_count,
                    job.error,
                    job.error_code.map(ErrorCode::as_str),
                ],
            )
            .map_err(db_err("upsert job"))?;
        Ok(())
    }

    /// Remove an evicted job.  Idempotent.
    pub fn delete(&self, id: &JobId) -> Result<()> {
        self.conn()
            .execute("DELETE FROM jobs WHERE id = ?1", params![id.to_string()])
            .map_err(db_err("delete job"))?;
        Ok(())
    }

    /// All jobs in submission order.
    #[instrument(skip(self))]
    pub fn load_all(&self) -> Result<Vec<PrintJob>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!("SELECT {SELECT_COLUMNS} FROM jobs ORDER BY seq ASC"))
            .map_err(db_err("prepare load_all"))?;

        let jobs = stmt
            .query_map([], row_to_job)
            .map_err(db_err("query load_all"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err("collect rows"))?;

        debug!(count = jobs.len(), "job history loaded");
        Ok(jobs)
    }
}

enum HistoryOp {
    Upsert(Box<PrintJob>),
    Delete(JobId),
    Flush(oneshot::Sender<()>),
}

/// Ordered, non-blocking front end to a [`HistoryStore`].
///
/// Sends never block, so they can be issued under the queue lock; that
/// lock order is the order the rows are written in.  The writer thread
/// drains what is left and exits once every handle is dropped.
pub struct HistoryWriter {
    ops: mpsc::UnboundedSender<HistoryOp>,
}

impl HistoryWriter {
    pub fn spawn(store: Arc<HistoryStore>) -> Result<Self> {
        let (ops, mut rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("printflow-history".into())
            .spawn(move || {
                while let Some(op) = rx.blocking_recv() {
                    match op {
                        HistoryOp::Upsert(job) => {
                            if let Err(e) = store.upsert(&job) {
                                warn!(job_id = %job.id, error = %e, "failed to persist job update");
                            }
                        }
                        HistoryOp::Delete(id) => {
                            if let Err(e) = store.delete(&id) {
                                warn!(job_id = %id, error = %e, "failed to delete evicted job");
                            }
                        }
                        HistoryOp::Flush(done) => {
                            let _ = done.send(());
                        }
                    }
                }
                debug!("history writer stopped");
            })?;
        Ok(Self { ops })
    }

    pub fn upsert(&self, job: &PrintJob) {
        let _ = self.ops.send(HistoryOp::Upsert(Box::new(job.clone())));
    }

    pub fn delete(&self, id: &JobId) {
        let _ = self.ops.send(HistoryOp::Delete(*id));
    }

    /// Resolves once every change sent before this call is on disk.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.ops.send(HistoryOp::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

#[cfg(test)]
impl HistoryStore {
    /// Hold the connection, stalling the writer thread.
    pub(crate) fn hold(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn()
    }
}

fn db_err(context: &'static str) -> impl Fn(rusqlite::Error) -> PrintflowError {
    move |e| PrintflowError::Database(format!("{context}: {e}"))
}

fn conversion_err(
    column: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognised value {0:?}")]
struct UnknownValue(String);

fn parse_time(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(column, e))
}

/// Column order must match `SELECT_COLUMNS`.
fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<PrintJob> {
    let id: String = row.get(0)?;
    let seq: i64 = row.get(1)?;
    let printer: String = row.get(2)?;
    let format: String = row.get(3)?;
    let digest: String = row.get(4)?;
    let bytes: Vec<u8> = row.get(5)?;
    let auto_cut: bool = row.get(6)?;
    let status: String = row.get(7)?;
    let submitted_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;
    let attempts: u32 = row.get(10)?;
    let retry_count: u32 = row.get(11)?;
    let error: Option<String> = row.get(12)?;
    let error_code: Option<String> = row.get(13)?;

    let id: JobId = id.parse().map_err(|e| conversion_err(0, e))?;
    let format = PayloadFormat::parse_tag(&format)
        .map(|tag| tag.format)
        .ok_or_else(|| conversion_err(3, UnknownValue(format)))?;
    let status: JobStatus = status
        .parse()
        .map_err(|_| conversion_err(7, UnknownValue(status.clone())))?;
    let error_code = error_code
        .map(|code| {
            code.parse::<ErrorCode>()
                .map_err(|_| conversion_err(13, UnknownValue(code.clone())))
        })
        .transpose()?;

    Ok(PrintJob {
        id,
        seq: seq as u64,
        printer,
        payload: Payload::new(format, bytes, digest),
        flags: JobFlags { auto_cut },
        submitted_at: parse_time(8, &submitted_at)?,
        updated_at: parse_time(9, &updated_at)?,
        status,
        attempts,
        retry_count,
        error,
        error_code,
    })
}
