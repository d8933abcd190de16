use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rocket::fairing::{Fairing, Info, Kind};
use rocket::{Data, Request};

use crate::config::PerformanceConfig;
use crate::dbal::{ConnectionInjector, ManagerRegistry, QueryTrackingMiddleware};

const MAX_ATTEMPTS: usize = 3;
const RETRY_DELAY: Duration = Duration::from_millis(10);

/// Puts query tracking on the configured connection before any handler runs.
/// A connection that isn't ready yet is retried on the next request.
pub struct QueryTrackingFairing {
    config: PerformanceConfig,
    registry: Arc<dyn ManagerRegistry>,
    injector: ConnectionInjector,
    middleware: QueryTrackingMiddleware,
    tracked: Mutex<HashSet<String>>,
}

impl QueryTrackingFairing {
    pub fn new(config: PerformanceConfig, registry: Arc<dyn ManagerRegistry>) -> Self {
        let injector =
            ConnectionInjector::new().with_version_override(config.layout_version.as_deref());
        Self {
            config,
            registry,
            injector,
            middleware: QueryTrackingMiddleware::new(),
            tracked: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_middleware(mut self, middleware: QueryTrackingMiddleware) -> Self {
        self.middleware = middleware;
        self
    }

    pub fn is_tracked(&self, connection_name: &str) -> bool {
        self.tracked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(connection_name)
    }

    fn try_attach(&self) -> bool {
        let name = &self.config.connection;
        if self.is_tracked(name) {
            return true;
        }

        let applied = self
            .injector
            .apply_middleware(self.registry.as_ref(), name, &self.middleware);
        if applied {
            self.tracked
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(name.clone());
        }

        applied
    }

    pub async fn attach(&self) -> bool {
        for attempt in 1..=MAX_ATTEMPTS {
            if self.try_attach() {
                return true;
            }
            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }

        tracing::debug!(
            connection = self.config.connection.as_str(),
            "Query tracking not attached, retrying on next request"
        );
        false
    }
}

#[rocket::async_trait]
impl Fairing for QueryTrackingFairing {
    fn info(&self) -> Info {
        Info {
            name: "Query tracking injection",
            kind: Kind::Request,
        }
    }

    async fn on_request(&self, _req: &mut Request<'_>, _data: &mut Data<'_>) {
        if !self.config.enabled || !self.config.track_queries {
            return;
        }

        self.attach().await;
    }
}
