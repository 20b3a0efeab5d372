//! Schedule trigger
//!
//! Periodically promotes due recurring jobs into run requests, through the
//! same enqueue path used for manual and API triggers.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use storyline_common::{now_ms, Database, Result, Run, RunRequest, ScheduledJob, TriggerSource};

use crate::cron;
use crate::queue::RunQueue;

/// Polls for due scheduled jobs on a fixed tick.
pub struct ScheduleTrigger {
    db: Database,
    queue: Arc<dyn RunQueue>,
    interval: Duration,
}

impl ScheduleTrigger {
    pub fn new(db: Database, queue: Arc<dyn RunQueue>, interval: Duration) -> Self {
        Self {
            db,
            queue,
            interval,
        }
    }

    /// Run the trigger loop.
    pub async fn run(self) {
        info!("Schedule trigger started");

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                error!("Schedule tick failed: {}", e);
            }
        }
    }

    /// Evaluate one tick: fire every due job. One job's failure never
    /// prevents evaluation of the remaining due jobs.
    pub async fn tick(&self) -> Result<()> {
        let now = now_ms();
        let due = self.db.due_scheduled_jobs(now)?;
        if due.is_empty() {
            return Ok(());
        }

        info!("Found {} due scheduled job(s)", due.len());
        for job in due {
            if let Err(e) = self.fire(&job, now).await {
                error!(job = %job.name, "Failed to fire scheduled job: {}", e);
            }
        }
        Ok(())
    }

    async fn fire(&self, job: &ScheduledJob, now: i64) -> Result<()> {
        let run = Run::new(
            &job.organization_id,
            &job.app_id,
            &job.environment_id,
            TriggerSource::Scheduled,
        );
        self.db.insert_run(&run)?;

        let request = RunRequest::for_run(&run, Vec::new(), job.journey_ids.clone());
        self.queue.enqueue(&request).await?;

        let next = cron::next_fire(&job.cron_expression, &job.timezone, Utc::now());
        self.db
            .update_job_after_fire(&job.id, now, next.timestamp_millis())?;

        info!(job = %job.name, run = %run.id, next = %next, "Scheduled job triggered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::SqliteRunQueue;
    use storyline_common::RunStatus;

    fn job(db: &Database, name: &str, next_run_at: i64) -> ScheduledJob {
        let job = ScheduledJob {
            id: uuid::Uuid::new_v4().to_string(),
            organization_id: "org-1".to_string(),
            app_id: "app-1".to_string(),
            environment_id: "env-1".to_string(),
            name: name.to_string(),
            cron_expression: "30 9 * * *".to_string(),
            timezone: "UTC".to_string(),
            journey_ids: vec!["journey-1".to_string()],
            enabled: true,
            next_run_at: Some(next_run_at),
            last_run_at: None,
            created_at: now_ms(),
        };
        db.insert_scheduled_job(&job).unwrap();
        job
    }

    #[tokio::test]
    async fn due_job_creates_pending_run_and_enqueues_it() {
        let db = Database::open_memory().unwrap();
        let queue = Arc::new(SqliteRunQueue::new(db.clone()));
        let trigger = ScheduleTrigger::new(db.clone(), queue.clone(), Duration::from_secs(60));

        let job = job(&db, "nightly", 1_000);
        trigger.tick().await.unwrap();

        let request = queue.claim().await.unwrap().expect("run enqueued");
        assert_eq!(request.app_id, "app-1");
        assert_eq!(request.journey_ids, vec!["journey-1".to_string()]);

        let run = db.get_run(&request.run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.trigger, TriggerSource::Scheduled);

        // The job was stepped forward and is no longer due.
        let jobs = db.list_scheduled_jobs().unwrap();
        assert_eq!(jobs[0].id, job.id);
        assert!(jobs[0].last_run_at.is_some());
        assert!(jobs[0].next_run_at.unwrap() > now_ms() - 1_000);
        assert!(db.due_scheduled_jobs(now_ms()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn future_jobs_are_left_alone() {
        let db = Database::open_memory().unwrap();
        let queue = Arc::new(SqliteRunQueue::new(db.clone()));
        let trigger = ScheduleTrigger::new(db.clone(), queue.clone(), Duration::from_secs(60));

        job(&db, "later", now_ms() + 3_600_000);
        trigger.tick().await.unwrap();

        assert!(queue.claim().await.unwrap().is_none());
    }
}
