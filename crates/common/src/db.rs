//! SQLite database for Storyline state persistence
//!
//! Single shared state database: story catalog, run records, per-story
//! results, scheduled jobs, and the run request queue all live here. Writes
//! go through one connection guarded by a mutex; WAL keeps readers cheap.

use crate::types::*;
use crate::{Error, Result};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Database wrapper for state persistence
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Environments (deployment targets)
            CREATE TABLE IF NOT EXISTS environments (
                id TEXT PRIMARY KEY,
                app_id TEXT NOT NULL,
                name TEXT NOT NULL,
                base_url TEXT NOT NULL,
                is_default INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_environments_app ON environments(app_id);

            -- Journeys (story groups within an app)
            CREATE TABLE IF NOT EXISTS journeys (
                id TEXT PRIMARY KEY,
                app_id TEXT NOT NULL,
                name TEXT NOT NULL,
                title TEXT NOT NULL,
                position INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_journeys_app ON journeys(app_id);

            -- Stories (steps and outcome stored as JSON documents)
            CREATE TABLE IF NOT EXISTS stories (
                id TEXT PRIMARY KEY,
                journey_id TEXT NOT NULL REFERENCES journeys(id),
                name TEXT NOT NULL,
                title TEXT NOT NULL,
                preconditions TEXT NOT NULL DEFAULT '[]',
                steps TEXT NOT NULL,
                outcome TEXT NOT NULL,
                position INTEGER NOT NULL DEFAULT 0,
                enabled INTEGER NOT NULL DEFAULT 1,
                last_run_at INTEGER,
                last_result TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_stories_journey ON stories(journey_id);

            -- Runs
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL,
                app_id TEXT NOT NULL,
                environment_id TEXT NOT NULL,
                trigger_source TEXT NOT NULL,
                status TEXT NOT NULL,
                stories_total INTEGER NOT NULL DEFAULT 0,
                stories_passed INTEGER NOT NULL DEFAULT 0,
                stories_failed INTEGER NOT NULL DEFAULT 0,
                stories_skipped INTEGER NOT NULL DEFAULT 0,
                duration_ms INTEGER,
                created_at INTEGER NOT NULL,
                started_at INTEGER,
                completed_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_runs_app ON runs(app_id);
            CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);

            -- Story results (append-only, one per story per run)
            CREATE TABLE IF NOT EXISTS story_results (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL REFERENCES runs(id),
                story_id TEXT NOT NULL,
                journey_name TEXT NOT NULL,
                story_name TEXT NOT NULL,
                passed INTEGER NOT NULL,
                duration_ms INTEGER NOT NULL,
                steps TEXT NOT NULL DEFAULT '[]',
                error TEXT,
                screenshot TEXT,
                console_errors TEXT NOT NULL DEFAULT '[]',
                heal_proposal TEXT,
                retries INTEGER NOT NULL DEFAULT 0,
                position INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_story_results_run ON story_results(run_id);

            -- Scheduled jobs
            CREATE TABLE IF NOT EXISTS scheduled_jobs (
                id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL,
                app_id TEXT NOT NULL,
                environment_id TEXT NOT NULL,
                name TEXT NOT NULL UNIQUE,
                cron_expression TEXT NOT NULL,
                timezone TEXT NOT NULL,
                journey_ids TEXT NOT NULL DEFAULT '[]',
                enabled INTEGER NOT NULL DEFAULT 1,
                next_run_at INTEGER,
                last_run_at INTEGER,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_scheduled_jobs_due ON scheduled_jobs(enabled, next_run_at);

            -- Run request queue (claimed rows are never redelivered)
            CREATE TABLE IF NOT EXISTS run_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                claimed INTEGER NOT NULL DEFAULT 0,
                enqueued_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_run_queue_claimed ON run_queue(claimed, id);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    // ========================================================================
    // Environments
    // ========================================================================

    pub fn insert_environment(&self, env: &Environment) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO environments (id, app_id, name, base_url, is_default, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                env.id,
                env.app_id,
                env.name,
                env.base_url,
                env.is_default as i64,
                env.created_at
            ],
        )?;
        debug!("Inserted environment {} ({})", env.name, env.id);
        Ok(())
    }

    pub fn get_environment(&self, id: &str) -> Result<Option<Environment>> {
        let conn = self.conn.lock();
        let env = conn
            .query_row(
                "SELECT id, app_id, name, base_url, is_default, created_at
                 FROM environments WHERE id = ?1",
                params![id],
                row_to_environment,
            )
            .optional()?;
        Ok(env)
    }

    pub fn list_environments(&self, app_id: &str) -> Result<Vec<Environment>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, app_id, name, base_url, is_default, created_at
             FROM environments WHERE app_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![app_id], row_to_environment)?;
        collect_rows(rows)
    }

    // ========================================================================
    // Journeys
    // ========================================================================

    pub fn insert_journey(&self, journey: &Journey) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO journeys (id, app_id, name, title, position, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                journey.id,
                journey.app_id,
                journey.name,
                journey.title,
                journey.position,
                journey.created_at
            ],
        )?;
        debug!("Inserted journey {} ({})", journey.name, journey.id);
        Ok(())
    }

    pub fn get_journey(&self, id: &str) -> Result<Option<Journey>> {
        let conn = self.conn.lock();
        let journey = conn
            .query_row(
                "SELECT id, app_id, name, title, position, created_at
                 FROM journeys WHERE id = ?1",
                params![id],
                row_to_journey,
            )
            .optional()?;
        Ok(journey)
    }

    pub fn get_journey_by_name(&self, app_id: &str, name: &str) -> Result<Option<Journey>> {
        let conn = self.conn.lock();
        let journey = conn
            .query_row(
                "SELECT id, app_id, name, title, position, created_at
                 FROM journeys WHERE app_id = ?1 AND name = ?2",
                params![app_id, name],
                row_to_journey,
            )
            .optional()?;
        Ok(journey)
    }

    pub fn list_journeys(&self, app_id: &str) -> Result<Vec<Journey>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, app_id, name, title, position, created_at
             FROM journeys WHERE app_id = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![app_id], row_to_journey)?;
        collect_rows(rows)
    }

    // ========================================================================
    // Stories
    // ========================================================================

    pub fn insert_story(&self, story: &Story) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO stories (id, journey_id, name, title, preconditions, steps, outcome,
                                  position, enabled, last_run_at, last_result, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                story.id,
                story.journey_id,
                story.name,
                story.title,
                serde_json::to_string(&story.preconditions)?,
                serde_json::to_string(&story.steps)?,
                serde_json::to_string(&story.outcome)?,
                story.position,
                story.enabled as i64,
                story.last_run_at,
                story.last_result.map(|v| v.to_string()),
                story.created_at
            ],
        )?;
        debug!("Inserted story {} ({})", story.name, story.id);
        Ok(())
    }

    pub fn get_story(&self, id: &str) -> Result<Option<Story>> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                &format!("{} WHERE id = ?1", STORY_SELECT),
                params![id],
                row_to_raw_story,
            )
            .optional()?;
        raw.map(RawStory::parse).transpose()
    }

    /// Enabled stories among an explicit id set, in position order.
    pub fn stories_by_ids(&self, ids: &[String]) -> Result<Vec<Story>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let placeholders = vec!["?"; ids.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "{} WHERE enabled = 1 AND id IN ({}) ORDER BY position",
            STORY_SELECT, placeholders
        ))?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), row_to_raw_story)?;
        parse_stories(rows)
    }

    /// Enabled stories belonging to any of the given journeys, in position order.
    pub fn stories_by_journeys(&self, journey_ids: &[String]) -> Result<Vec<Story>> {
        if journey_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let placeholders = vec!["?"; journey_ids.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "{} WHERE enabled = 1 AND journey_id IN ({}) ORDER BY position",
            STORY_SELECT, placeholders
        ))?;
        let rows = stmt.query_map(params_from_iter(journey_ids.iter()), row_to_raw_story)?;
        parse_stories(rows)
    }

    /// All enabled stories under an app, in position order.
    pub fn stories_by_app(&self, app_id: &str) -> Result<Vec<Story>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE enabled = 1
                 AND journey_id IN (SELECT id FROM journeys WHERE app_id = ?1)
             ORDER BY position",
            STORY_SELECT
        ))?;
        let rows = stmt.query_map(params![app_id], row_to_raw_story)?;
        parse_stories(rows)
    }

    pub fn list_stories(&self, journey_id: &str) -> Result<Vec<Story>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE journey_id = ?1 ORDER BY position",
            STORY_SELECT
        ))?;
        let rows = stmt.query_map(params![journey_id], row_to_raw_story)?;
        parse_stories(rows)
    }

    /// Record the outcome of the latest execution on the story itself.
    pub fn update_story_last_run(&self, id: &str, at: i64, verdict: Verdict) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE stories SET last_run_at = ?1, last_result = ?2 WHERE id = ?3",
            params![at, verdict.to_string(), id],
        )?;
        Ok(())
    }

    pub fn set_story_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE stories SET enabled = ?1 WHERE id = ?2",
            params![enabled as i64, id],
        )?;
        Ok(())
    }

    // ========================================================================
    // Runs
    // ========================================================================

    pub fn insert_run(&self, run: &Run) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO runs (id, organization_id, app_id, environment_id, trigger_source,
                               status, stories_total, stories_passed, stories_failed,
                               stories_skipped, duration_ms, created_at, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                run.id,
                run.organization_id,
                run.app_id,
                run.environment_id,
                run.trigger.to_string(),
                run.status.to_string(),
                run.stories_total,
                run.stories_passed,
                run.stories_failed,
                run.stories_skipped,
                run.duration_ms,
                run.created_at,
                run.started_at,
                run.completed_at
            ],
        )?;
        debug!("Inserted run {}", run.id);
        Ok(())
    }

    pub fn get_run(&self, id: &str) -> Result<Option<Run>> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                &format!("{} WHERE id = ?1", RUN_SELECT),
                params![id],
                row_to_raw_run,
            )
            .optional()?;
        raw.map(RawRun::parse).transpose()
    }

    pub fn list_runs(&self, limit: u32) -> Result<Vec<Run>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY created_at DESC LIMIT ?1",
            RUN_SELECT
        ))?;
        let rows = stmt.query_map(params![limit], row_to_raw_run)?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?.parse()?);
        }
        Ok(runs)
    }

    /// Transition a pending run to running and fix the resolved story total.
    pub fn mark_run_running(&self, id: &str, total: u32, started_at: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE runs SET status = 'running', started_at = ?1, stories_total = ?2 WHERE id = ?3",
            params![started_at, total, id],
        )?;
        Ok(())
    }

    /// Persist incremental pass/fail counters mid-run.
    pub fn update_run_counters(&self, id: &str, passed: u32, failed: u32) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE runs SET stories_passed = ?1, stories_failed = ?2 WHERE id = ?3",
            params![passed, failed, id],
        )?;
        Ok(())
    }

    pub fn update_run_skipped(&self, id: &str, skipped: u32) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE runs SET stories_skipped = ?1 WHERE id = ?2",
            params![skipped, id],
        )?;
        Ok(())
    }

    /// Finalize an exhausted run as completed.
    pub fn complete_run(&self, id: &str, completed_at: i64, duration_ms: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE runs SET status = 'completed', completed_at = ?1, duration_ms = ?2 WHERE id = ?3",
            params![completed_at, duration_ms, id],
        )?;
        Ok(())
    }

    /// Finalize an empty run: a valid terminal state, not an error.
    pub fn complete_empty_run(&self, id: &str, at: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE runs SET status = 'completed', started_at = ?1, completed_at = ?1,
                             duration_ms = 0, stories_total = 0, stories_passed = 0,
                             stories_failed = 0, stories_skipped = 0
             WHERE id = ?2",
            params![at, id],
        )?;
        Ok(())
    }

    /// Mark a run failed (resolution faults, before any story executed).
    pub fn fail_run(&self, id: &str, at: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE runs SET status = 'failed', completed_at = ?1 WHERE id = ?2",
            params![at, id],
        )?;
        Ok(())
    }

    /// Cancel a run that has not yet reached a terminal status.
    pub fn cancel_run(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE runs SET status = 'cancelled', completed_at = ?1
             WHERE id = ?2 AND status IN ('pending', 'running')",
            params![now_ms(), id],
        )?;
        if changed == 0 {
            let current: Option<String> = conn
                .query_row("SELECT status FROM runs WHERE id = ?1", params![id], |r| {
                    r.get(0)
                })
                .optional()?;
            return match current {
                Some(status) => Err(Error::InvalidStateTransition {
                    from: status,
                    to: "cancelled".to_string(),
                }),
                None => Err(Error::NotFound {
                    kind: "run".to_string(),
                    id: id.to_string(),
                }),
            };
        }
        Ok(())
    }

    // ========================================================================
    // Story results
    // ========================================================================

    pub fn insert_story_result(&self, result: &StoryResult, position: u32) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO story_results (id, run_id, story_id, journey_name, story_name, passed,
                                        duration_ms, steps, error, screenshot, console_errors,
                                        heal_proposal, retries, position, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                result.id,
                result.run_id,
                result.story_id,
                result.journey_name,
                result.story_name,
                result.passed as i64,
                result.duration_ms,
                serde_json::to_string(&result.steps)?,
                result.error,
                result.screenshot,
                serde_json::to_string(&result.console_errors)?,
                result
                    .heal_proposal
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                result.retries,
                position,
                result.created_at
            ],
        )?;
        debug!("Inserted story result for {} in run {}", result.story_id, result.run_id);
        Ok(())
    }

    /// Results for a run, in story-position order.
    pub fn list_story_results(&self, run_id: &str) -> Result<Vec<StoryResult>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, run_id, story_id, journey_name, story_name, passed, duration_ms,
                    steps, error, screenshot, console_errors, heal_proposal, retries, created_at
             FROM story_results WHERE run_id = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![run_id], row_to_raw_story_result)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?.parse()?);
        }
        Ok(results)
    }

    // ========================================================================
    // Scheduled jobs
    // ========================================================================

    pub fn insert_scheduled_job(&self, job: &ScheduledJob) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO scheduled_jobs (id, organization_id, app_id, environment_id, name,
                                         cron_expression, timezone, journey_ids, enabled,
                                         next_run_at, last_run_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                job.id,
                job.organization_id,
                job.app_id,
                job.environment_id,
                job.name,
                job.cron_expression,
                job.timezone,
                serde_json::to_string(&job.journey_ids)?,
                job.enabled as i64,
                job.next_run_at,
                job.last_run_at,
                job.created_at
            ],
        )?;
        debug!("Inserted scheduled job {} ({})", job.name, job.id);
        Ok(())
    }

    pub fn list_scheduled_jobs(&self) -> Result<Vec<ScheduledJob>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("{} ORDER BY name", JOB_SELECT))?;
        let rows = stmt.query_map([], row_to_raw_job)?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?.parse()?);
        }
        Ok(jobs)
    }

    /// Enabled jobs whose next fire time has arrived.
    pub fn due_scheduled_jobs(&self, now: i64) -> Result<Vec<ScheduledJob>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE enabled = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?1",
            JOB_SELECT
        ))?;
        let rows = stmt.query_map(params![now], row_to_raw_job)?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?.parse()?);
        }
        Ok(jobs)
    }

    pub fn update_job_after_fire(&self, id: &str, last_run_at: i64, next_run_at: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE scheduled_jobs SET last_run_at = ?1, next_run_at = ?2 WHERE id = ?3",
            params![last_run_at, next_run_at, id],
        )?;
        Ok(())
    }

    pub fn remove_scheduled_job(&self, name: &str) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "DELETE FROM scheduled_jobs WHERE name = ?1",
            params![name],
        )?;
        if changed == 0 {
            return Err(Error::NotFound {
                kind: "scheduled job".to_string(),
                id: name.to_string(),
            });
        }
        Ok(())
    }

    // ========================================================================
    // Run queue
    // ========================================================================

    pub fn queue_push(&self, request: &RunRequest) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO run_queue (run_id, payload, claimed, enqueued_at)
             VALUES (?1, ?2, 0, ?3)",
            params![request.run_id, serde_json::to_string(request)?, now_ms()],
        )?;
        debug!("Enqueued run {}", request.run_id);
        Ok(())
    }

    /// Claim the oldest unclaimed request. A claimed request is delivered to
    /// exactly one caller and never redelivered.
    pub fn queue_claim(&self) -> Result<Option<RunRequest>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let next: Option<(i64, String)> = tx
            .query_row(
                "SELECT id, payload FROM run_queue WHERE claimed = 0 ORDER BY id LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((id, payload)) = next else {
            return Ok(None);
        };

        tx.execute("UPDATE run_queue SET claimed = 1 WHERE id = ?1", params![id])?;
        tx.commit()?;

        Ok(Some(serde_json::from_str(&payload)?))
    }

    /// Number of unclaimed requests waiting for a worker.
    pub fn queue_depth(&self) -> Result<u32> {
        let conn = self.conn.lock();
        let depth: u32 = conn.query_row(
            "SELECT COUNT(*) FROM run_queue WHERE claimed = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(depth)
    }
}

// ============================================================================
// Row mapping
// ============================================================================

const STORY_SELECT: &str = "SELECT id, journey_id, name, title, preconditions, steps, outcome, \
                            position, enabled, last_run_at, last_result, created_at FROM stories";

const RUN_SELECT: &str = "SELECT id, organization_id, app_id, environment_id, trigger_source, \
                          status, stories_total, stories_passed, stories_failed, stories_skipped, \
                          duration_ms, created_at, started_at, completed_at FROM runs";

const JOB_SELECT: &str = "SELECT id, organization_id, app_id, environment_id, name, \
                          cron_expression, timezone, journey_ids, enabled, next_run_at, \
                          last_run_at, created_at FROM scheduled_jobs";

fn row_to_environment(row: &Row<'_>) -> rusqlite::Result<Environment> {
    Ok(Environment {
        id: row.get(0)?,
        app_id: row.get(1)?,
        name: row.get(2)?,
        base_url: row.get(3)?,
        is_default: row.get::<_, i64>(4)? != 0,
        created_at: row.get(5)?,
    })
}

fn row_to_journey(row: &Row<'_>) -> rusqlite::Result<Journey> {
    Ok(Journey {
        id: row.get(0)?,
        app_id: row.get(1)?,
        name: row.get(2)?,
        title: row.get(3)?,
        position: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Story row before the JSON columns are parsed
struct RawStory {
    id: String,
    journey_id: String,
    name: String,
    title: String,
    preconditions: String,
    steps: String,
    outcome: String,
    position: i64,
    enabled: bool,
    last_run_at: Option<i64>,
    last_result: Option<String>,
    created_at: i64,
}

fn row_to_raw_story(row: &Row<'_>) -> rusqlite::Result<RawStory> {
    Ok(RawStory {
        id: row.get(0)?,
        journey_id: row.get(1)?,
        name: row.get(2)?,
        title: row.get(3)?,
        preconditions: row.get(4)?,
        steps: row.get(5)?,
        outcome: row.get(6)?,
        position: row.get(7)?,
        enabled: row.get::<_, i64>(8)? != 0,
        last_run_at: row.get(9)?,
        last_result: row.get(10)?,
        created_at: row.get(11)?,
    })
}

impl RawStory {
    fn parse(self) -> Result<Story> {
        Ok(Story {
            id: self.id,
            journey_id: self.journey_id,
            name: self.name,
            title: self.title,
            preconditions: serde_json::from_str(&self.preconditions)?,
            steps: serde_json::from_str(&self.steps)?,
            outcome: serde_json::from_str(&self.outcome)?,
            position: self.position,
            enabled: self.enabled,
            last_run_at: self.last_run_at,
            last_result: self
                .last_result
                .as_deref()
                .and_then(|v| v.parse().ok()),
            created_at: self.created_at,
        })
    }
}

fn parse_stories(
    rows: impl Iterator<Item = rusqlite::Result<RawStory>>,
) -> Result<Vec<Story>> {
    let mut stories = Vec::new();
    for row in rows {
        stories.push(row?.parse()?);
    }
    Ok(stories)
}

struct RawRun {
    id: String,
    organization_id: String,
    app_id: String,
    environment_id: String,
    trigger_source: String,
    status: String,
    stories_total: u32,
    stories_passed: u32,
    stories_failed: u32,
    stories_skipped: u32,
    duration_ms: Option<i64>,
    created_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
}

fn row_to_raw_run(row: &Row<'_>) -> rusqlite::Result<RawRun> {
    Ok(RawRun {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        app_id: row.get(2)?,
        environment_id: row.get(3)?,
        trigger_source: row.get(4)?,
        status: row.get(5)?,
        stories_total: row.get(6)?,
        stories_passed: row.get(7)?,
        stories_failed: row.get(8)?,
        stories_skipped: row.get(9)?,
        duration_ms: row.get(10)?,
        created_at: row.get(11)?,
        started_at: row.get(12)?,
        completed_at: row.get(13)?,
    })
}

impl RawRun {
    fn parse(self) -> Result<Run> {
        let trigger = self
            .trigger_source
            .parse()
            .map_err(Error::Internal)?;
        let status = self.status.parse().map_err(Error::Internal)?;
        Ok(Run {
            id: self.id,
            organization_id: self.organization_id,
            app_id: self.app_id,
            environment_id: self.environment_id,
            trigger,
            status,
            stories_total: self.stories_total,
            stories_passed: self.stories_passed,
            stories_failed: self.stories_failed,
            stories_skipped: self.stories_skipped,
            duration_ms: self.duration_ms,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

struct RawStoryResult {
    id: String,
    run_id: String,
    story_id: String,
    journey_name: String,
    story_name: String,
    passed: bool,
    duration_ms: i64,
    steps: String,
    error: Option<String>,
    screenshot: Option<String>,
    console_errors: String,
    heal_proposal: Option<String>,
    retries: u32,
    created_at: i64,
}

fn row_to_raw_story_result(row: &Row<'_>) -> rusqlite::Result<RawStoryResult> {
    Ok(RawStoryResult {
        id: row.get(0)?,
        run_id: row.get(1)?,
        story_id: row.get(2)?,
        journey_name: row.get(3)?,
        story_name: row.get(4)?,
        passed: row.get::<_, i64>(5)? != 0,
        duration_ms: row.get(6)?,
        steps: row.get(7)?,
        error: row.get(8)?,
        screenshot: row.get(9)?,
        console_errors: row.get(10)?,
        heal_proposal: row.get(11)?,
        retries: row.get(12)?,
        created_at: row.get(13)?,
    })
}

impl RawStoryResult {
    fn parse(self) -> Result<StoryResult> {
        Ok(StoryResult {
            id: self.id,
            run_id: self.run_id,
            story_id: self.story_id,
            journey_name: self.journey_name,
            story_name: self.story_name,
            passed: self.passed,
            duration_ms: self.duration_ms,
            steps: serde_json::from_str(&self.steps)?,
            error: self.error,
            screenshot: self.screenshot,
            console_errors: serde_json::from_str(&self.console_errors)?,
            heal_proposal: self
                .heal_proposal
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            retries: self.retries,
            created_at: self.created_at,
        })
    }
}

struct RawJob {
    id: String,
    organization_id: String,
    app_id: String,
    environment_id: String,
    name: String,
    cron_expression: String,
    timezone: String,
    journey_ids: String,
    enabled: bool,
    next_run_at: Option<i64>,
    last_run_at: Option<i64>,
    created_at: i64,
}

fn row_to_raw_job(row: &Row<'_>) -> rusqlite::Result<RawJob> {
    Ok(RawJob {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        app_id: row.get(2)?,
        environment_id: row.get(3)?,
        name: row.get(4)?,
        cron_expression: row.get(5)?,
        timezone: row.get(6)?,
        journey_ids: row.get(7)?,
        enabled: row.get::<_, i64>(8)? != 0,
        next_run_at: row.get(9)?,
        last_run_at: row.get(10)?,
        created_at: row.get(11)?,
    })
}

impl RawJob {
    fn parse(self) -> Result<ScheduledJob> {
        Ok(ScheduledJob {
            id: self.id,
            organization_id: self.organization_id,
            app_id: self.app_id,
            environment_id: self.environment_id,
            name: self.name,
            cron_expression: self.cron_expression,
            timezone: self.timezone,
            journey_ids: serde_json::from_str(&self.journey_ids)?,
            enabled: self.enabled,
            next_run_at: self.next_run_at,
            last_run_at: self.last_run_at,
            created_at: self.created_at,
        })
    }
}

fn collect_rows<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_catalog(db: &Database) -> (Journey, Vec<Story>) {
        let journey = Journey::new("app-1", "checkout", "Checkout", 0);
        db.insert_journey(&journey).unwrap();

        let mut stories = Vec::new();
        for (i, name) in ["add-to-cart", "guest-checkout", "order-confirmation"]
            .iter()
            .enumerate()
        {
            let story = Story::new(
                &journey.id,
                *name,
                *name,
                vec![Step {
                    action: "click".to_string(),
                    target: Some("#go".to_string()),
                    value: None,
                    description: None,
                }],
                Outcome::default(),
                i as i64,
            );
            db.insert_story(&story).unwrap();
            stories.push(story);
        }
        (journey, stories)
    }

    #[test]
    fn story_resolution_is_enabled_only_and_position_ordered() {
        let db = Database::open_memory().unwrap();
        let (journey, stories) = seed_catalog(&db);

        db.set_story_enabled(&stories[1].id, false).unwrap();

        let resolved = db.stories_by_app("app-1").unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].name, "add-to-cart");
        assert_eq!(resolved[1].name, "order-confirmation");

        let by_journey = db.stories_by_journeys(&[journey.id.clone()]).unwrap();
        assert_eq!(by_journey.len(), 2);

        let by_ids = db
            .stories_by_ids(&[stories[2].id.clone(), stories[0].id.clone()])
            .unwrap();
        assert_eq!(by_ids[0].name, "add-to-cart");
        assert_eq!(by_ids[1].name, "order-confirmation");
    }

    #[test]
    fn run_lifecycle_updates() {
        let db = Database::open_memory().unwrap();
        let run = Run::new("org-1", "app-1", "env-1", TriggerSource::Manual);
        db.insert_run(&run).unwrap();

        db.mark_run_running(&run.id, 3, 1_000).unwrap();
        db.update_run_counters(&run.id, 1, 0).unwrap();
        db.update_run_counters(&run.id, 2, 1).unwrap();
        db.complete_run(&run.id, 5_000, 4_000).unwrap();

        let stored = db.get_run(&run.id).unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Completed);
        assert_eq!(stored.stories_total, 3);
        assert_eq!(stored.stories_passed, 2);
        assert_eq!(stored.stories_failed, 1);
        assert_eq!(stored.duration_ms, Some(4_000));
    }

    #[test]
    fn cancel_rejects_terminal_runs() {
        let db = Database::open_memory().unwrap();
        let run = Run::new("org-1", "app-1", "env-1", TriggerSource::Api);
        db.insert_run(&run).unwrap();

        db.cancel_run(&run.id).unwrap();
        let stored = db.get_run(&run.id).unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Cancelled);

        let err = db.cancel_run(&run.id).unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
    }

    #[test]
    fn queue_claims_each_request_exactly_once() {
        let db = Database::open_memory().unwrap();
        let run = Run::new("org-1", "app-1", "env-1", TriggerSource::Manual);
        let request = RunRequest::for_run(&run, vec![], vec![]);

        db.queue_push(&request).unwrap();
        assert_eq!(db.queue_depth().unwrap(), 1);

        let claimed = db.queue_claim().unwrap().unwrap();
        assert_eq!(claimed.run_id, run.id);
        assert_eq!(db.queue_depth().unwrap(), 0);
        assert!(db.queue_claim().unwrap().is_none());
    }

    #[test]
    fn due_jobs_respects_enabled_and_deadline() {
        let db = Database::open_memory().unwrap();

        let mut due = ScheduledJob {
            id: "job-1".to_string(),
            organization_id: "org-1".to_string(),
            app_id: "app-1".to_string(),
            environment_id: "env-1".to_string(),
            name: "nightly".to_string(),
            cron_expression: "0 3 * * *".to_string(),
            timezone: "UTC".to_string(),
            journey_ids: vec![],
            enabled: true,
            next_run_at: Some(1_000),
            last_run_at: None,
            created_at: now_ms(),
        };
        db.insert_scheduled_job(&due).unwrap();

        due.id = "job-2".to_string();
        due.name = "disabled".to_string();
        due.enabled = false;
        db.insert_scheduled_job(&due).unwrap();

        due.id = "job-3".to_string();
        due.name = "future".to_string();
        due.enabled = true;
        due.next_run_at = Some(10_000);
        db.insert_scheduled_job(&due).unwrap();

        let jobs = db.due_scheduled_jobs(5_000).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name, "nightly");
    }

    #[test]
    fn story_results_come_back_in_position_order() {
        let db = Database::open_memory().unwrap();
        let run = Run::new("org-1", "app-1", "env-1", TriggerSource::Manual);
        db.insert_run(&run).unwrap();

        for (pos, name) in ["first", "second"].iter().enumerate() {
            let result = StoryResult {
                id: uuid::Uuid::new_v4().to_string(),
                run_id: run.id.clone(),
                story_id: format!("story-{}", pos),
                journey_name: "checkout".to_string(),
                story_name: name.to_string(),
                passed: pos == 0,
                duration_ms: 10,
                steps: vec![],
                error: (pos != 0).then(|| "element not found".to_string()),
                screenshot: None,
                console_errors: vec!["TypeError: x is undefined".to_string()],
                heal_proposal: None,
                retries: 0,
                created_at: now_ms(),
            };
            db.insert_story_result(&result, pos as u32).unwrap();
        }

        let results = db.list_story_results(&run.id).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].story_name, "first");
        assert!(results[0].passed);
        assert_eq!(results[1].story_name, "second");
        assert_eq!(results[1].error.as_deref(), Some("element not found"));
    }
}
