// Poll scheduler
// Delayed poll tasks keyed by job id. At most one slot exists per id: either a
// timer waiting to fire, or a poll currently running. Only the running poll may
// queue the next one, so two polls for the same job never overlap.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::AbortHandle;

pub type PollFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug)]
enum Slot {
    Waiting(AbortHandle),
    Polling,
}

#[derive(Debug, Default)]
pub struct PollScheduler {
    slots: Mutex<HashMap<String, Slot>>,
}

impl PollScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_delayed(delay: Duration, poll: PollFuture) -> AbortHandle {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            poll.await;
        })
        .abort_handle()
    }

    /// Schedule the first poll for a job. Returns false (and drops `poll`) when
    /// the job already has a slot.
    pub fn schedule(&self, job_id: &str, delay: Duration, poll: PollFuture) -> bool {
        let mut slots = self.slots();
        if slots.contains_key(job_id) {
            return false;
        }
        slots.insert(job_id.to_string(), Slot::Waiting(Self::spawn_delayed(delay, poll)));
        true
    }

    /// Called by a poll as it starts. False means the job was cancelled while
    /// its timer was pending and the poll must not run.
    pub fn begin(&self, job_id: &str) -> bool {
        let mut slots = self.slots();
        match slots.get_mut(job_id) {
            Some(slot @ Slot::Waiting(_)) => {
                *slot = Slot::Polling;
                true
            }
            _ => false,
        }
    }

    /// Queue the next poll from inside the running one.
    pub fn reschedule(&self, job_id: &str, delay: Duration, poll: PollFuture) -> bool {
        let mut slots = self.slots();
        match slots.get_mut(job_id) {
            Some(slot @ Slot::Polling) => {
                *slot = Slot::Waiting(Self::spawn_delayed(delay, poll));
                true
            }
            _ => false,
        }
    }

    /// The running poll reached a terminal state.
    pub fn finish(&self, job_id: &str) {
        self.slots().remove(job_id);
    }

    /// Drop a job's slot, aborting its timer if one is pending.
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.slots().remove(job_id) {
            Some(Slot::Waiting(handle)) => {
                handle.abort();
                true
            }
            Some(Slot::Polling) => true,
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, slot) in self.slots().drain() {
            if let Slot::Waiting(handle) = slot {
                handle.abort();
            }
        }
    }

    pub fn is_scheduled(&self, job_id: &str) -> bool {
        self.slots().contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_poll(scheduler: Arc<PollScheduler>, id: &'static str, hits: Arc<AtomicUsize>) -> PollFuture {
        Box::pin(async move {
            if scheduler.begin(id) {
                hits.fetch_add(1, Ordering::SeqCst);
                scheduler.finish(id);
            }
        })
    }

    #[tokio::test]
    async fn test_schedule_runs_once_per_slot() {
        let scheduler = Arc::new(PollScheduler::new());
        let hits = Arc::new(AtomicUsize::new(0));

        assert!(scheduler.schedule("a", Duration::from_millis(10), counting_poll(scheduler.clone(), "a", hits.clone())));
        assert!(!scheduler.schedule("a", Duration::from_millis(10), counting_poll(scheduler.clone(), "a", hits.clone())));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_scheduled("a"));
    }

    #[tokio::test]
    async fn test_cancel_aborts_pending_timer() {
        let scheduler = Arc::new(PollScheduler::new());
        let hits = Arc::new(AtomicUsize::new(0));

        scheduler.schedule("a", Duration::from_millis(30), counting_poll(scheduler.clone(), "a", hits.clone()));
        assert!(scheduler.cancel("a"));
        assert!(!scheduler.cancel("a"));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_reschedule_only_from_running_poll() {
        let scheduler = Arc::new(PollScheduler::new());
        let hits = Arc::new(AtomicUsize::new(0));

        // Not polling yet
        assert!(!scheduler.reschedule("a", Duration::ZERO, counting_poll(scheduler.clone(), "a", hits.clone())));

        scheduler.schedule("a", Duration::from_secs(60), counting_poll(scheduler.clone(), "a", hits.clone()));
        assert!(!scheduler.reschedule("a", Duration::ZERO, counting_poll(scheduler.clone(), "a", hits.clone())));

        // Simulate the timer firing
        assert!(scheduler.begin("a"));
        assert!(!scheduler.begin("a"));
        assert!(scheduler.reschedule("a", Duration::from_millis(5), counting_poll(scheduler.clone(), "a", hits.clone())));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.len(), 0);
    }

    #[tokio::test]
    async fn test_cancel_all_clears_every_slot() {
        let scheduler = Arc::new(PollScheduler::new());
        let hits = Arc::new(AtomicUsize::new(0));
        for id in ["a", "b", "c"] {
            scheduler.schedule(id, Duration::from_millis(20), counting_poll(scheduler.clone(), id, hits.clone()));
        }
        assert_eq!(scheduler.len(), 3);
        scheduler.cancel_all();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
