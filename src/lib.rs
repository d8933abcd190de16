use std::sync::Arc;

use dotenvy::dotenv;
use rocket_prometheus::PrometheusMetrics;

use crate::config::{current_environment, PerformanceConfig};
use crate::db::DbPool;
use crate::dbal::{Connection, ConnectionParams, ConnectionRegistry, ManagerRegistry, PgDriver};
use crate::metrics::RouteMetrics;
use crate::telemetry::TracingFairing;
use crate::tracking::{PerformanceFairing, QueryTrackingFairing};
use crate::views::MetricsRoute;

pub mod config;
pub mod db;
pub mod dbal;
pub mod error;
pub mod metrics;
pub mod telemetry;
pub mod tls;
pub mod tracking;
pub mod views;

pub struct Context {
    pub db_pool: DbPool,
}

#[rocket::main]
pub async fn main() -> crate::error::Result<()> {
    dotenv().ok();

    let _sentry_guard = if let Ok(sentry_dsn) = std::env::var("SENTRY_DSN") {
        Some(sentry::init((
            sentry_dsn,
            sentry::ClientOptions {
                release: Some(
                    format!("{}@{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")).into(),
                ),
                environment: Some(current_environment().into()),
                traces_sample_rate: 1.0,
                ..Default::default()
            },
        )))
    } else {
        None
    };

    let otlp_endpoint = std::env::var("OTLP_ENDPOINT").ok();
    let _guard = telemetry::init_tracing_subscriber(otlp_endpoint)?;

    let db_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("Provide a DATABASE_URL env variable"))?;

    let figment = rocket::Config::figment();
    let config = PerformanceConfig::from_figment(&figment)?;

    let db_pool = db::get_database_pool(&db_url).await?;

    let params = ConnectionParams {
        url: db_url,
        application_name: Some(env!("CARGO_PKG_NAME").to_string()),
    };
    let registry = ConnectionRegistry::new(config.connection.clone()).with_connection(
        Connection::new(config.connection.clone(), Arc::new(PgDriver), params),
    );

    let prometheus =
        PrometheusMetrics::new().with_request_filter(|request| request.uri().path() != "/metrics");
    prometheus
        .registry()
        .register(Box::new(db::QUERY_HISTOGRAM.clone()))?;
    let route_metrics = RouteMetrics::new(prometheus.registry())?;

    tracing::info!(
        environment = %current_environment(),
        connection = config.connection.as_str(),
        enabled = config.enabled,
        "Starting route performance tracking"
    );

    let shared_registry: Arc<dyn ManagerRegistry> = Arc::new(registry.clone());
    let ctx = Context { db_pool };

    let launched = rocket::custom(figment)
        .attach(TracingFairing)
        .attach(QueryTrackingFairing::new(config.clone(), shared_registry))
        .attach(PerformanceFairing::new(config.clone(), route_metrics))
        .attach(prometheus.clone())
        .mount("/", views::routes())
        .mount("/metrics", MetricsRoute(prometheus))
        .manage(ctx)
        .manage(registry)
        .manage(config)
        .launch()
        .await;

    if let Err(e) = launched {
        let kind = e.pretty_print();
        return Err(anyhow::anyhow!("Rocket failed to launch: {}", kind).into());
    }

    Ok(())
}
