use opentelemetry::{global, trace::TracerProvider, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    trace::{RandomIdGenerator, SdkTracerProvider},
    Resource,
};
use opentelemetry_semantic_conventions::attribute::{DEPLOYMENT_ENVIRONMENT_NAME, SERVICE_VERSION};
use rocket::{
    fairing::{Fairing, Info, Kind},
    Request, Response,
};
use tracing::{Level, Span};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::current_environment;
use crate::tracking::{route_name, UnitOfWork};

fn resource() -> Resource {
    Resource::builder()
        .with_service_name(env!("CARGO_PKG_NAME"))
        .with_attribute(KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")))
        .with_attribute(KeyValue::new(
            DEPLOYMENT_ENVIRONMENT_NAME,
            current_environment(),
        ))
        .build()
}

fn init_tracer(endpoint: &str) -> anyhow::Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let provider = SdkTracerProvider::builder()
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource())
        .with_batch_exporter(exporter)
        .build();

    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TraceContextPropagator::new());
    Ok(provider)
}

pub fn init_tracing_subscriber(endpoint: Option<String>) -> anyhow::Result<OtelGuard> {
    let subscriber = tracing_subscriber::registry()
        .with(tracing_subscriber::filter::LevelFilter::from_level(
            Level::DEBUG,
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer());

    let provider = if let Some(endpoint) = endpoint {
        let provider = init_tracer(&endpoint)?;
        let tracer = provider.tracer("route-perf");
        subscriber.with(OpenTelemetryLayer::new(tracer)).init();

        Some(provider)
    } else {
        subscriber.init();
        tracing::warn!("No OTLP_ENDPOINT specified, not enabling opentelemetry");
        None
    };

    Ok(OtelGuard { provider })
}

pub struct OtelGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for OtelGuard {
    fn drop(&mut self) {
        if let Some(tracer) = self.provider.take() {
            let _ = tracer.shutdown();
        }
    }
}

/// Names the request span the way route metrics are labelled and attaches
/// the unit of work's query figures to it.
pub struct TracingFairing;

#[rocket::async_trait]
impl Fairing for TracingFairing {
    fn info(&self) -> Info {
        Info {
            name: "Route span",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, req: &'r Request<'_>, res: &mut Response<'r>) {
        let Some(route) = req.route() else { return };
        let name = route_name(route);

        let span = Span::current();
        span.record("otel.name", format!("{} {}", req.method(), name));
        span.record("http.route", name.as_str());
        span.record("http.response.status_code", res.status().code);

        let unit = UnitOfWork::of(req);
        if unit.is_tracked() {
            let stats = unit.timer().snapshot();
            span.record("db.query_count", stats.count);
            span.record("db.query_time_seconds", stats.total.as_secs_f64());
        }
    }
}
