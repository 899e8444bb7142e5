//! SQLite storage layer -- schema, queries, migrations.

pub mod schema;

use anyhow::{Context, Result};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::Serialize;

use crate::scan::ScanResult;

/// Connection pool type.
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Summary row for scan history listings.
#[derive(Debug, Serialize)]
pub struct ScanSummary {
    pub scan_id: String,
    pub subject_id: String,
    pub scan_type: String,
    pub composite_score: f64,
    pub grade: String,
    pub partial_failure_count: i64,
    pub created_at: String,
}

/// Persist one completed scan. The full result is stored as JSON; the
/// headline columns exist for cheap history queries.
pub fn save_scan_result(pool: &Pool, result: &ScanResult) -> Result<()> {
    let conn = pool.get()?;
    let result_json = serde_json::to_string(result).context("failed to serialize scan result")?;

    conn.execute(
        "INSERT INTO scan_results (
            scan_id, subject_id, scan_type, composite_score, grade,
            partial_failure_count, result_json, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            result.scan_id.to_string(),
            result.subject_id,
            result.scan_type.to_string(),
            result.composite_score,
            result.grade.as_str(),
            result.partial_failures.len() as i64,
            result_json,
            result.finished_at.to_rfc3339(),
        ],
    )?;

    Ok(())
}

/// Load the most recent scan result for a subject, fully deserialized.
pub fn latest_scan(pool: &Pool, subject_id: &str) -> Result<Option<ScanResult>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT result_json FROM scan_results
         WHERE subject_id = ?1
         ORDER BY created_at DESC LIMIT 1",
    )?;

    let mut rows = stmt.query(rusqlite::params![subject_id])?;
    match rows.next()? {
        Some(row) => {
            let json: String = row.get(0)?;
            let result =
                serde_json::from_str(&json).context("stored scan result failed to deserialize")?;
            Ok(Some(result))
        }
        None => Ok(None),
    }
}

/// Recent scan summaries for a subject, newest first.
pub fn scan_history(pool: &Pool, subject_id: &str, limit: usize) -> Result<Vec<ScanSummary>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT scan_id, subject_id, scan_type, composite_score, grade,
                partial_failure_count, created_at
         FROM scan_results
         WHERE subject_id = ?1
         ORDER BY created_at DESC LIMIT ?2",
    )?;

    let rows = stmt.query_map(rusqlite::params![subject_id, limit as i64], |row| {
        Ok(ScanSummary {
            scan_id: row.get(0)?,
            subject_id: row.get(1)?,
            scan_type: row.get(2)?,
            composite_score: row.get(3)?,
            grade: row.get(4)?,
            partial_failure_count: row.get(5)?,
            created_at: row.get(6)?,
        })
    })?;

    let mut history = Vec::new();
    for r in rows {
        history.push(r?);
    }
    Ok(history)
}
