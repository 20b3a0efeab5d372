//! Worker pool
//!
//! A bounded pool of identical workers, each processing one run at a time.
//! Within a run, stories execute strictly sequentially; concurrency exists
//! only across runs.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use storyline_common::{now_ms, Database, RunProgress, RunRequest};

use crate::orchestrator::RunOrchestrator;
use crate::queue::RunQueue;

pub struct WorkerPool {
    db: Database,
    queue: Arc<dyn RunQueue>,
    orchestrator: Arc<RunOrchestrator>,
    concurrency: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(
        db: Database,
        queue: Arc<dyn RunQueue>,
        orchestrator: Arc<RunOrchestrator>,
        concurrency: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            db,
            queue,
            orchestrator,
            concurrency: concurrency.max(1),
            poll_interval,
        }
    }

    /// Run the pool until the process exits.
    pub async fn run(self: Arc<Self>) {
        info!(concurrency = self.concurrency, "Worker pool started");

        let mut handles = Vec::new();
        for worker in 0..self.concurrency {
            let pool = self.clone();
            handles.push(tokio::spawn(async move { pool.worker_loop(worker).await }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn worker_loop(&self, worker: usize) {
        debug!(worker, "Worker started");
        loop {
            match self.queue.claim().await {
                Ok(Some(request)) => self.process(worker, request).await,
                Ok(None) => tokio::time::sleep(self.poll_interval).await,
                Err(e) => {
                    error!(worker, "Queue claim failed: {}", e);
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn process(&self, worker: usize, request: RunRequest) {
        info!(worker, run = %request.run_id, "Processing run");

        let run_id = request.run_id.clone();
        let on_progress = |progress: &RunProgress| {
            debug!(
                run = %run_id,
                total = progress.total,
                completed = progress.completed,
                passed = progress.passed,
                failed = progress.failed,
                current = progress.current.as_deref().unwrap_or("-"),
                "Run progress"
            );
        };

        match self.orchestrator.execute(&request, on_progress).await {
            Ok(()) => info!(worker, run = %request.run_id, "Run finished"),
            Err(e) => {
                // Resolution faults propagate before the run went running;
                // the caller (this worker) marks the run failed.
                error!(worker, run = %request.run_id, "Run failed: {}", e);
                if let Err(e) = self.db.fail_run(&request.run_id, now_ms()) {
                    error!(run = %request.run_id, "Failed to mark run failed: {}", e);
                }
            }
        }
    }
}
