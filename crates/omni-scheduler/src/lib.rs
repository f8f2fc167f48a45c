//! Background scheduler for deferred and recurring sends. Entries live in
//! memory — persistence to the store is the caller's responsibility — and
//! a single poll task wakes on a fixed interval, hands every due entry to
//! an executor callback, and advances or completes it.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use omni_common::{ScheduleEntry, ScheduleStatus};
use parking_lot::RwLock as SyncRwLock;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

pub type ExecuteFn = Arc<dyn Fn(ScheduleEntry) -> futures::future::BoxFuture<'static, Result<(), String>> + Send + Sync>;

pub struct MessageScheduler {
    entries: Arc<SyncRwLock<HashMap<String, ScheduleEntry>>>,
    poll_interval: Duration,
    running: Arc<RwLock<bool>>,
    worker: SyncRwLock<Option<JoinHandle<()>>>,
    on_execute: Arc<SyncRwLock<Vec<ExecuteFn>>>,
}

impl MessageScheduler {
    pub fn new(poll_interval: Duration) -> Self {
        MessageScheduler {
            entries: Arc::new(SyncRwLock::new(HashMap::new())),
            poll_interval,
            running: Arc::new(RwLock::new(false)),
            worker: SyncRwLock::new(None),
            on_execute: Arc::new(SyncRwLock::new(Vec::new())),
        }
    }

    pub fn with_default_interval() -> Self {
        Self::new(Duration::from_secs(1))
    }

    /// Registers a callback invoked for every due entry. Callbacks are
    /// caught with `catch_unwind` — a panicking handler fails that one
    /// entry's run rather than crashing the poll loop.
    pub fn on_execute(&self, f: ExecuteFn) {
        self.on_execute.write().push(f);
    }

    pub fn schedule_at(
        &self,
        id: impl Into<String>,
        message_data: serde_json::Map<String, Value>,
        scheduled_at: DateTime<Utc>,
    ) -> String {
        let id = id.into();
        let entry = ScheduleEntry::new(id.clone(), message_data, scheduled_at, false, 0, 0);
        self.entries.write().insert(id.clone(), entry);
        id
    }

    pub fn schedule_delay(
        &self,
        id: impl Into<String>,
        message_data: serde_json::Map<String, Value>,
        delay_seconds: i64,
    ) -> String {
        self.schedule_at(id, message_data, Utc::now() + chrono::Duration::seconds(delay_seconds))
    }

    pub fn schedule_recurring(
        &self,
        id: impl Into<String>,
        message_data: serde_json::Map<String, Value>,
        first_run: DateTime<Utc>,
        interval_seconds: i64,
        max_runs: u32,
    ) -> String {
        let id = id.into();
        let entry = ScheduleEntry::new(id.clone(), message_data, first_run, true, interval_seconds, max_runs);
        self.entries.write().insert(id.clone(), entry);
        id
    }

    pub fn cancel(&self, id: &str) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(id) {
            Some(entry) if entry.status == ScheduleStatus::Pending => {
                entry.status = ScheduleStatus::Cancelled;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<ScheduleEntry> {
        self.entries.read().get(id).cloned()
    }

    pub fn list(&self, status: Option<ScheduleStatus>) -> Vec<ScheduleEntry> {
        let entries = self.entries.read();
        let mut out: Vec<ScheduleEntry> = entries
            .values()
            .filter(|e| status.map_or(true, |s| e.status == s))
            .cloned()
            .collect();
        out.sort_by_key(|e| e.scheduled_at);
        out
    }

    /// Runs every due entry concurrently and advances each afterward. This
    /// is the unit the background worker calls on every tick, and is also
    /// exposed directly so callers can drive the scheduler manually in
    /// tests or a synchronous CLI command.
    pub async fn process_due(&self) -> usize {
        let now = Utc::now();
        let due: Vec<ScheduleEntry> = {
            let entries = self.entries.read();
            entries.values().filter(|e| e.is_due(now)).cloned().collect()
        };
        if due.is_empty() {
            return 0;
        }

        let callbacks: Vec<ExecuteFn> = self.on_execute.read().clone();
        let results = futures::future::join_all(due.iter().map(|entry| {
            let callbacks = callbacks.clone();
            let entry = entry.clone();
            async move {
                let mut last_err = None;
                for cb in &callbacks {
                    let fut = AssertUnwindSafe(cb(entry.clone())).catch_unwind();
                    match fut.await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => last_err = Some(e),
                        Err(_) => last_err = Some("scheduler callback panicked".to_string()),
                    }
                }
                (entry.id.clone(), last_err)
            }
        }))
        .await;

        let mut entries = self.entries.write();
        for (id, last_err) in &results {
            if let Some(entry) = entries.get_mut(id) {
                entry.last_result = last_err.clone().or_else(|| Some("ok".to_string()));
                entry.advance(now);
            }
        }
        results.len()
    }

    /// Idempotent: a second `start()` while already running is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut running = self.running.write().await;
        if *running {
            tracing::warn!("scheduler already running");
            return;
        }
        *running = true;
        drop(running);

        tracing::info!(poll_interval_ms = self.poll_interval.as_millis(), "starting scheduler");

        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.poll_interval);
            loop {
                ticker.tick().await;
                if !*scheduler.running.read().await {
                    break;
                }
                let n = scheduler.process_due().await;
                if n > 0 {
                    tracing::debug!(count = n, "processed due schedule entries");
                }
            }
        });
        *self.worker.write() = Some(handle);
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        if let Some(handle) = self.worker.write().take() {
            handle.abort();
        }
        tracing::info!("scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub fn stats(&self) -> Value {
        let entries = self.entries.read();
        let mut pending = 0;
        let mut completed = 0;
        let mut cancelled = 0;
        for entry in entries.values() {
            match entry.status {
                ScheduleStatus::Pending => pending += 1,
                ScheduleStatus::Completed => completed += 1,
                ScheduleStatus::Cancelled => cancelled += 1,
            }
        }
        json!({
            "total": entries.len(),
            "pending": pending,
            "completed": completed,
            "cancelled": cancelled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn process_due_runs_only_entries_whose_time_has_come() {
        let scheduler = MessageScheduler::with_default_interval();
        scheduler.schedule_at("past", Map::new(), Utc::now() - chrono::Duration::seconds(5));
        scheduler.schedule_at("future", Map::new(), Utc::now() + chrono::Duration::hours(1));

        let run_count = Arc::new(AtomicUsize::new(0));
        let counter = run_count.clone();
        scheduler.on_execute(Arc::new(move |_entry| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        }));

        let processed = scheduler.process_due().await;
        assert_eq!(processed, 1);
        assert_eq!(run_count.load(Ordering::SeqCst), 1);

        let past = scheduler.get("past").unwrap();
        assert_eq!(past.status, ScheduleStatus::Completed);
        let future = scheduler.get("future").unwrap();
        assert_eq!(future.status, ScheduleStatus::Pending);
    }

    #[tokio::test]
    async fn recurring_entry_stays_pending_and_reschedules() {
        let scheduler = MessageScheduler::with_default_interval();
        scheduler.schedule_recurring("r1", Map::new(), Utc::now() - chrono::Duration::seconds(1), 3600, 0);
        scheduler.process_due().await;
        let entry = scheduler.get("r1").unwrap();
        assert_eq!(entry.status, ScheduleStatus::Pending);
        assert_eq!(entry.run_count, 1);
        assert!(entry.scheduled_at > Utc::now());
    }

    #[tokio::test]
    async fn cancel_prevents_future_execution() {
        let scheduler = MessageScheduler::with_default_interval();
        scheduler.schedule_at("c1", Map::new(), Utc::now() - chrono::Duration::seconds(1));
        assert!(scheduler.cancel("c1"));
        assert_eq!(scheduler.process_due().await, 0);
        assert!(!scheduler.cancel("c1"));
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_aborts_worker() {
        let scheduler = Arc::new(MessageScheduler::new(Duration::from_millis(10)));
        scheduler.start().await;
        assert!(scheduler.is_running().await);
        scheduler.start().await;
        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
    }

    #[tokio::test]
    async fn panicking_callback_fails_only_that_entry() {
        let scheduler = MessageScheduler::with_default_interval();
        scheduler.schedule_at("p1", Map::new(), Utc::now() - chrono::Duration::seconds(1));
        scheduler.on_execute(Arc::new(|_entry| async move { panic!("boom") }.boxed()));
        let processed = scheduler.process_due().await;
        assert_eq!(processed, 1);
        let entry = scheduler.get("p1").unwrap();
        assert!(entry.last_result.unwrap().contains("panicked"));
    }
}
