use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

use crate::config::PerformanceConfig;

/// What one tracked request measured.
#[derive(Clone, Debug, PartialEq)]
pub struct RouteSample {
    pub route: String,
    pub method: String,
    pub status: u16,
    pub request_time: Option<f64>,
    pub query_count: Option<u64>,
    pub query_time: Option<f64>,
    pub memory_usage: Option<u64>,
}

#[derive(Clone)]
pub struct RouteMetrics {
    pub request_duration: HistogramVec,
    pub query_count: HistogramVec,
    pub query_duration: HistogramVec,
    pub memory_usage: HistogramVec,
    pub status_codes: IntCounterVec,
}

impl RouteMetrics {
    pub fn new(registry: &Registry) -> crate::error::Result<Self> {
        let ret = Self {
            request_duration: HistogramVec::new(
                HistogramOpts::new(
                    "route_request_duration_seconds",
                    "Time spent handling a request, per route",
                ),
                &["route", "method"],
            )?,
            query_count: HistogramVec::new(
                HistogramOpts::new(
                    "route_query_count",
                    "Number of database queries per request",
                )
                .buckets(vec![0.0, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0]),
                &["route"],
            )?,
            query_duration: HistogramVec::new(
                HistogramOpts::new(
                    "route_query_duration_seconds",
                    "Cumulative database time per request",
                )
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
                &["route"],
            )?,
            memory_usage: HistogramVec::new(
                HistogramOpts::new(
                    "route_memory_usage_bytes",
                    "Process memory grown while handling a request",
                )
                .buckets(prometheus::exponential_buckets(64.0 * 1024.0, 4.0, 8)?),
                &["route"],
            )?,
            status_codes: IntCounterVec::new(
                Opts::new("route_status_codes_total", "Responses per route and status"),
                &["route", "status"],
            )?,
        };

        registry.register(Box::new(ret.request_duration.clone()))?;
        registry.register(Box::new(ret.query_count.clone()))?;
        registry.register(Box::new(ret.query_duration.clone()))?;
        registry.register(Box::new(ret.memory_usage.clone()))?;
        registry.register(Box::new(ret.status_codes.clone()))?;

        Ok(ret)
    }

    pub fn record(&self, sample: &RouteSample, config: &PerformanceConfig) {
        if let Some(request_time) = sample.request_time {
            self.request_duration
                .with_label_values(&[&sample.route, &sample.method])
                .observe(request_time);
        }

        if let Some(query_count) = sample.query_count {
            self.query_count
                .with_label_values(&[&sample.route])
                .observe(query_count as f64);
        }

        if let Some(query_time) = sample.query_time {
            self.query_duration
                .with_label_values(&[&sample.route])
                .observe(query_time);
        }

        if let Some(memory_usage) = sample.memory_usage {
            self.memory_usage
                .with_label_values(&[&sample.route])
                .observe(memory_usage as f64);
        }

        if config.should_record_status(sample.status) {
            self.status_codes
                .with_label_values(&[&sample.route, &sample.status.to_string()])
                .inc();
        }
    }
}
