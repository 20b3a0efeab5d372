//! Run request queue
//!
//! The transport seam between triggers and workers. Delivery is
//! exactly-once with an attempt budget of one: a claimed request is never
//! redelivered, retries live at the step level inside the engine.

use async_trait::async_trait;

use storyline_common::{Database, Result, RunRequest};

/// Queue contract shared by triggers (enqueue) and workers (claim).
#[async_trait]
pub trait RunQueue: Send + Sync {
    async fn enqueue(&self, request: &RunRequest) -> Result<()>;

    /// Claim the oldest pending request, or None when the queue is empty.
    async fn claim(&self) -> Result<Option<RunRequest>>;
}

/// Queue backed by the shared state database.
pub struct SqliteRunQueue {
    db: Database,
}

impl SqliteRunQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RunQueue for SqliteRunQueue {
    async fn enqueue(&self, request: &RunRequest) -> Result<()> {
        self.db.queue_push(request)
    }

    async fn claim(&self) -> Result<Option<RunRequest>> {
        self.db.queue_claim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyline_common::{Run, TriggerSource};

    #[tokio::test]
    async fn claims_in_fifo_order_exactly_once() {
        let db = Database::open_memory().unwrap();
        let queue = SqliteRunQueue::new(db);

        let first = Run::new("org", "app", "env", TriggerSource::Manual);
        let second = Run::new("org", "app", "env", TriggerSource::Scheduled);
        queue
            .enqueue(&RunRequest::for_run(&first, vec![], vec![]))
            .await
            .unwrap();
        queue
            .enqueue(&RunRequest::for_run(&second, vec![], vec![]))
            .await
            .unwrap();

        assert_eq!(queue.claim().await.unwrap().unwrap().run_id, first.id);
        assert_eq!(queue.claim().await.unwrap().unwrap().run_id, second.id);
        assert!(queue.claim().await.unwrap().is_none());
    }
}
