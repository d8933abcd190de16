use rand::Rng;
use rocket::fairing::{Fairing, Info, Kind};
use rocket::{Data, Request, Response};

use crate::config::{current_environment, PerformanceConfig};
use crate::metrics::{RouteMetrics, RouteSample};
use crate::tracking::{route_name, UnitOfWork};

/// Starts a unit of work for every tracked request and turns it into route
/// metrics once the response is ready.
pub struct PerformanceFairing {
    config: PerformanceConfig,
    environment: String,
    metrics: RouteMetrics,
}

impl PerformanceFairing {
    pub fn new(config: PerformanceConfig, metrics: RouteMetrics) -> Self {
        Self {
            config,
            environment: current_environment(),
            metrics,
        }
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    fn sampled(&self) -> bool {
        let rate = self.config.sampling_rate;
        if rate >= 1.0 {
            return true;
        }

        rand::thread_rng().gen::<f64>() < rate
    }

    fn sample(&self, req: &Request<'_>, res: &Response<'_>, route: String) -> RouteSample {
        let unit = UnitOfWork::of(req);
        let stats = unit.timer().snapshot();

        RouteSample {
            route,
            method: req.method().as_str().to_string(),
            status: res.status().code,
            request_time: if self.config.track_request_time {
                unit.elapsed().map(|elapsed| elapsed.as_secs_f64())
            } else {
                None
            },
            query_count: self.config.track_queries.then_some(stats.count),
            query_time: self
                .config
                .track_queries
                .then(|| stats.total.as_secs_f64()),
            memory_usage: if self.config.track_memory_usage {
                unit.memory_usage()
            } else {
                None
            },
        }
    }
}

#[rocket::async_trait]
impl Fairing for PerformanceFairing {
    fn info(&self) -> Info {
        Info {
            name: "Route performance",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, req: &mut Request<'_>, _data: &mut Data<'_>) {
        if !self.config.enabled {
            return;
        }

        if !self.config.is_environment_tracked(&self.environment) {
            if self.config.enable_logging {
                tracing::debug!(
                    environment = self.environment.as_str(),
                    "Tracking disabled for this environment"
                );
            }
            return;
        }

        UnitOfWork::of(req).begin();
    }

    async fn on_response<'r>(&self, req: &'r Request<'_>, res: &mut Response<'r>) {
        if !UnitOfWork::of(req).is_tracked() {
            return;
        }

        let Some(route) = req.route() else { return };
        let name = route_name(route);

        if self.config.is_route_ignored(&name) {
            return;
        }

        if !self.sampled() {
            return;
        }

        let sample = self.sample(req, res, name);
        self.metrics.record(&sample, &self.config);

        if self.config.enable_logging {
            tracing::info!(
                route = sample.route.as_str(),
                method = sample.method.as_str(),
                status = sample.status,
                request_time = ?sample.request_time,
                query_count = ?sample.query_count,
                query_time = ?sample.query_time,
                memory_usage = ?sample.memory_usage,
                "Route metrics recorded"
            );
        }
    }
}
