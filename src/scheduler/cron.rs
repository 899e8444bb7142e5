use crate::storage::Pool;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use cron::Schedule as CronSchedule;
use std::str::FromStr;

/// One recurring scan definition.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Schedule {
    pub name: String,
    pub cron_expr: String,
    pub subject_id: String,
    pub scan_type: String,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// A scheduler that persists recurring scans in SQLite and checks for due
/// work.
#[derive(Clone)]
pub struct Scheduler {
    pool: Pool,
}

/// Accept classic 5-field cron by padding a seconds field; the cron crate
/// parses 6/7-field expressions.
fn normalize_cron(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {}", expr)
    } else {
        expr.to_string()
    }
}

fn parse_cron(expr: &str) -> Result<CronSchedule> {
    CronSchedule::from_str(&normalize_cron(expr))
        .map_err(|e| anyhow::anyhow!("Invalid cron expression '{}': {}", expr, e))
}

impl Scheduler {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn get_pool(&self) -> &Pool {
        &self.pool
    }

    /// Add a new recurring scan.
    pub async fn add_schedule(
        &self,
        name: &str,
        cron_expr: &str,
        subject_id: &str,
        scan_type: crate::scan::ScanType,
    ) -> Result<()> {
        // Validate before persisting
        let _ = parse_cron(cron_expr)?;

        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO scan_schedules (name, cron_expr, subject_id, scan_type, enabled)
             VALUES (?1, ?2, ?3, ?4, 1)",
            rusqlite::params![name, cron_expr, subject_id, scan_type.to_string()],
        )
        .context("Failed to insert schedule")?;

        Ok(())
    }

    /// List all schedules.
    pub async fn list(&self) -> Result<Vec<Schedule>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT name, cron_expr, subject_id, scan_type, enabled, last_run_at
             FROM scan_schedules",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)? != 0,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;

        let mut list = Vec::new();
        for r in rows {
            let (name, cron_expr, subject_id, scan_type, enabled, last_run) = r?;
            list.push(Schedule {
                name,
                cron_expr,
                subject_id,
                scan_type,
                enabled,
                last_run_at: last_run.and_then(|s| {
                    DateTime::parse_from_rfc3339(&s)
                        .ok()
                        .map(|dt| dt.with_timezone(&Utc))
                }),
            });
        }
        Ok(list)
    }

    pub async fn remove(&self, name: &str) -> Result<()> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "DELETE FROM scan_schedules WHERE name = ?1",
            rusqlite::params![name],
        )?;
        if changed == 0 {
            anyhow::bail!("Schedule '{}' not found", name);
        }
        Ok(())
    }

    /// Schedules whose next fire time has passed. A schedule that never ran
    /// is measured from one poll-window ago so a restart does not replay
    /// missed history.
    pub async fn check_due(&self) -> Result<Vec<Schedule>> {
        let now = Utc::now();
        let mut due = Vec::new();
        for schedule in self.list().await? {
            if !schedule.enabled {
                continue;
            }
            let cron = match parse_cron(&schedule.cron_expr) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(schedule = %schedule.name, "Skipping schedule: {}", e);
                    continue;
                }
            };
            let since = schedule
                .last_run_at
                .unwrap_or_else(|| now - Duration::hours(1));
            if let Some(next) = cron.after(&since).next() {
                if next <= now {
                    due.push(schedule);
                }
            }
        }
        Ok(due)
    }

    /// Record a run. Called before execution so a slow scan cannot be
    /// double-scheduled by the next poll.
    pub async fn update_last_run(&self, name: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE scan_schedules
             SET last_run_at = ?1, updated_at = datetime('now')
             WHERE name = ?2",
            rusqlite::params![Utc::now().to_rfc3339(), name],
        )?;
        Ok(())
    }

    /// Calculate upcoming run times for all enabled schedules.
    /// Strictly a dry-run preview, not the execution loop.
    pub async fn preview_next_runs(&self, hours: u64) -> Result<Vec<(String, String, String)>> {
        let now = Utc::now();
        let end = now + Duration::hours(hours as i64);
        let mut preview = Vec::new();

        for schedule in self.list().await? {
            if !schedule.enabled {
                continue;
            }
            if let Ok(cron) = parse_cron(&schedule.cron_expr) {
                for next_time in cron.after(&now) {
                    if next_time > end {
                        break;
                    }
                    preview.push((
                        next_time.to_rfc3339(),
                        schedule.name.clone(),
                        schedule.subject_id.clone(),
                    ));
                }
            }
        }

        // Sort by time
        preview.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(preview)
    }
}
