use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

static GLOBAL_TIMER: Lazy<QueryTimer> = Lazy::new(QueryTimer::new);
static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    static CURRENT_TIMER: QueryTimer;
}

/// Pairs a `start_query` with its `stop_query`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueryId(String);

impl QueryId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for QueryId {
    fn from(value: &str) -> Self {
        QueryId(value.to_string())
    }
}

impl From<String> for QueryId {
    fn from(value: String) -> Self {
        QueryId(value)
    }
}

impl Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hands out execution ids for one wrapper instance: a process-unique
/// instance number followed by a per-instance sequence.
#[derive(Debug)]
pub struct IdSequence {
    prefix: &'static str,
    instance: u64,
    next: AtomicU64,
}

impl IdSequence {
    pub fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> QueryId {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        QueryId(format!("{}{}#{}", self.prefix, self.instance, seq))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct QueryStats {
    pub count: u64,
    pub total: Duration,
}

#[derive(Debug, Default)]
struct TimerState {
    count: u64,
    total: Duration,
    pending: HashMap<QueryId, Instant>,
}

/// Statement count and cumulative execution time for one unit of work.
///
/// Cloning yields another handle on the same counters. Work running inside
/// [`QueryTimer::scope`] reports to that timer, anything else to
/// [`QueryTimer::global`].
#[derive(Clone, Debug, Default)]
pub struct QueryTimer {
    state: Arc<Mutex<TimerState>>,
}

impl QueryTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static QueryTimer {
        &GLOBAL_TIMER
    }

    pub fn current() -> QueryTimer {
        CURRENT_TIMER
            .try_with(QueryTimer::clone)
            .unwrap_or_else(|_| GLOBAL_TIMER.clone())
    }

    pub async fn scope<F: Future>(&self, fut: F) -> F::Output {
        CURRENT_TIMER.scope(self.clone(), fut).await
    }

    pub fn ptr_eq(&self, other: &QueryTimer) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Last start wins when an id is started twice before being stopped.
    pub fn start_query(&self, id: impl Into<QueryId>) {
        self.lock().pending.insert(id.into(), Instant::now());
    }

    /// Returns the elapsed time when `id` was pending, `None` otherwise.
    pub fn stop_query(&self, id: impl Into<QueryId>) -> Option<Duration> {
        let mut state = self.lock();
        let started = state.pending.remove(&id.into())?;
        let elapsed = started.elapsed();
        state.count += 1;
        state.total += elapsed;

        Some(elapsed)
    }

    /// Forgets a pending start without counting it.
    pub fn discard_query(&self, id: impl Into<QueryId>) -> bool {
        self.lock().pending.remove(&id.into()).is_some()
    }

    pub fn span(&self, id: impl Into<QueryId>) -> QuerySpan {
        let id = id.into();
        self.start_query(id.clone());
        QuerySpan {
            timer: self.clone(),
            id: Some(id),
        }
    }

    pub fn query_count(&self) -> u64 {
        self.lock().count
    }

    pub fn total_query_time(&self) -> Duration {
        self.lock().total
    }

    pub fn total_query_seconds(&self) -> f64 {
        self.total_query_time().as_secs_f64()
    }

    pub fn pending_queries(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn snapshot(&self) -> QueryStats {
        let state = self.lock();
        QueryStats {
            count: state.count,
            total: state.total,
        }
    }

    pub fn reset(&self) {
        let mut state = self.lock();
        state.count = 0;
        state.total = Duration::ZERO;
        state.pending.clear();
    }
}

/// Running statement execution. Stops its timer when finished or dropped,
/// so failed and cancelled executions are closed too.
#[must_use = "dropping the span immediately stops the timer"]
#[derive(Debug)]
pub struct QuerySpan {
    timer: QueryTimer,
    id: Option<QueryId>,
}

impl QuerySpan {
    pub fn id(&self) -> Option<&QueryId> {
        self.id.as_ref()
    }

    pub fn timer(&self) -> &QueryTimer {
        &self.timer
    }

    pub fn finish(mut self) -> Option<Duration> {
        self.stop()
    }

    /// Closes the span without counting the execution.
    pub fn abandon(mut self) {
        if let Some(id) = self.id.take() {
            self.timer.discard_query(id);
        }
    }

    fn stop(&mut self) -> Option<Duration> {
        let id = self.id.take()?;
        self.timer.stop_query(id)
    }
}

impl Drop for QuerySpan {
    fn drop(&mut self) {
        self.stop();
    }
}
