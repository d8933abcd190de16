use std::convert::Infallible;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use memory_stats::memory_stats;
use rocket::request::{FromRequest, Outcome};
use rocket::{Request, Route};

use crate::dbal::QueryTimer;

mod guard;
mod injection;
mod request;

pub use guard::Db;
pub use injection::QueryTrackingFairing;
pub use request::PerformanceFairing;

/// Per request query timer, stored in the request local cache.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    timer: QueryTimer,
    started: OnceLock<Instant>,
    start_memory: OnceLock<usize>,
    tracked: AtomicBool,
}

impl UnitOfWork {
    pub fn of<'r>(request: &'r Request<'_>) -> &'r UnitOfWork {
        request.local_cache(UnitOfWork::default)
    }

    pub fn timer(&self) -> &QueryTimer {
        &self.timer
    }

    pub fn is_tracked(&self) -> bool {
        self.tracked.load(Ordering::Acquire)
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.started.get().map(Instant::elapsed)
    }

    /// Process memory grown since the request started, in bytes.
    pub fn memory_usage(&self) -> Option<u64> {
        let start = *self.start_memory.get()?;
        let now = memory_stats()?.physical_mem;
        Some(memory_delta(start, now))
    }

    /// Runs `fut` with this request's timer as the current one.
    pub async fn scope<F: Future>(&self, fut: F) -> F::Output {
        self.timer.scope(fut).await
    }

    fn begin(&self) {
        self.timer.reset();
        let _ = self.started.set(Instant::now());
        if let Some(stats) = memory_stats() {
            let _ = self.start_memory.set(stats.physical_mem);
        }
        self.tracked.store(true, Ordering::Release);
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for &'r UnitOfWork {
    type Error = Infallible;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(UnitOfWork::of(request))
    }
}

/// Name a route is reported under: its handler name, or its URI for routes
/// mounted without one.
pub fn route_name(route: &Route) -> String {
    match &route.name {
        Some(name) => name.to_string(),
        None => route.uri.to_string(),
    }
}

/// Growth from `start` to `now`. Memory handed back to the OS while the
/// request ran would make that negative, the current usage is reported then.
pub fn memory_delta(start: usize, now: usize) -> u64 {
    match now.checked_sub(start) {
        Some(grown) => grown as u64,
        None => now as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_delta() {
        assert_eq!(memory_delta(1024, 4096), 3072);
        assert_eq!(memory_delta(4096, 4096), 0);
        assert_eq!(memory_delta(8192, 2048), 2048);
    }

    #[test]
    fn test_memory_usage_needs_a_started_request() {
        let unit = UnitOfWork::default();
        assert_eq!(unit.memory_usage(), None);

        unit.begin();
        assert!(unit.is_tracked());
        if memory_stats().is_some() {
            assert!(unit.memory_usage().is_some());
        }
    }
}
