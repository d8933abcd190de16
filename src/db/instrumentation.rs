use std::collections::VecDeque;
use std::time::Duration;

use diesel::connection::{Instrumentation, InstrumentationEvent};
use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec};

use crate::dbal::{IdSequence, QuerySpan, QueryTimer};

pub static QUERY_HISTOGRAM: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("diesel_query_seconds", "SQL query duration").buckets(vec![
            0.000005, 0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.1, 1.0,
        ]),
        &["query"],
    )
    .expect("Failed to create query histogram")
});

struct InFlight {
    query: String,
    span: QuerySpan,
}

/// Reports diesel queries to the unit of work they run in. One instance
/// lives per diesel connection.
pub struct TrackingInstrumentation {
    ids: IdSequence,
    in_flight: VecDeque<InFlight>,
}

impl Default for TrackingInstrumentation {
    fn default() -> Self {
        Self {
            ids: IdSequence::new("diesel"),
            in_flight: VecDeque::new(),
        }
    }
}

impl TrackingInstrumentation {
    fn query_started(&mut self, query: String) {
        let timer = QueryTimer::current();

        // A query whose future got dropped never sees its finish event. Once
        // the connection serves another unit of work it can't finish anymore.
        let (stale, live): (VecDeque<_>, VecDeque<_>) = self
            .in_flight
            .drain(..)
            .partition(|in_flight| !in_flight.span.timer().ptr_eq(&timer));
        for in_flight in stale {
            tracing::debug!(query = %in_flight.query, "Dropping abandoned query");
            in_flight.span.abandon();
        }
        self.in_flight = live;

        let span = timer.span(self.ids.next_id());
        self.in_flight.push_back(InFlight { query, span });
    }

    // Diesel emits a finish for failed queries as well. Pipelined queries
    // finish in order, so the oldest one with the same text is the match.
    fn query_finished(&mut self, query: &str) -> Option<Duration> {
        let position = self
            .in_flight
            .iter()
            .position(|in_flight| in_flight.query == query)
            .unwrap_or(0);
        self.in_flight.remove(position)?.span.finish()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

fn histogram_label(query: &str) -> String {
    let query = query.replace('\n', " ");
    query.split("--").next().unwrap_or_default().trim().to_string()
}

impl Instrumentation for TrackingInstrumentation {
    fn on_connection_event(&mut self, event: InstrumentationEvent<'_>) {
        match event {
            InstrumentationEvent::StartQuery { query, .. } => {
                self.query_started(histogram_label(&query.to_string()));
            }
            InstrumentationEvent::FinishQuery { query, error, .. } => {
                let query = histogram_label(&query.to_string());
                let Some(elapsed) = self.query_finished(&query) else {
                    return;
                };
                QUERY_HISTOGRAM
                    .with_label_values(&[&query])
                    .observe(elapsed.as_secs_f64());
                tracing::debug!(%query, failed = error.is_some(), ?elapsed, "Query finished");
            }
            InstrumentationEvent::StartEstablishConnection { .. } => {
                tracing::debug!("StartEstablishConnection");
            }
            InstrumentationEvent::FinishEstablishConnection { error, .. } => {
                tracing::debug!(failed = error.is_some(), "FinishEstablishConnection");
            }
            InstrumentationEvent::BeginTransaction { depth, .. } => {
                tracing::debug!(depth = depth.get(), "BeginTransaction");
            }
            InstrumentationEvent::CommitTransaction { depth, .. } => {
                tracing::debug!(depth = depth.get(), "CommitTransaction");
            }
            InstrumentationEvent::RollbackTransaction { depth, .. } => {
                tracing::debug!(depth = depth.get(), "RollbackTransaction");
            }
            _ => {}
        };
    }
}
