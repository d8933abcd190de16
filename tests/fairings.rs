use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use common::{fake_registry, FailingRegistry, FakeDriver, CONNECTION_NAME};
use prometheus::Registry;
use rocket::http::Status;
use rocket::local::asynchronous::Client;
use rocket::{get, routes, Build, Rocket};
use route_perf::config::PerformanceConfig;
use route_perf::dbal::{ConnectionRegistry, ManagerRegistry, Value};
use route_perf::metrics::RouteMetrics;
use route_perf::telemetry::TracingFairing;
use route_perf::tracking::{route_name, Db, PerformanceFairing, QueryTrackingFairing, UnitOfWork};
use serde_json::Value as JsonValue;

mod common;

#[get("/users")]
async fn users(db: Db<'_>) -> String {
    db.query("SELECT 1").await.expect("query");
    db.execute("SELECT $1", &[Value::Int(7)])
        .await
        .expect("execute");
    db.unit().timer().query_count().to_string()
}

#[get("/broken")]
async fn broken(db: Db<'_>) -> (Status, String) {
    match db.query(common::FAILING_SQL).await {
        Ok(_) => (Status::Ok, "ok".to_string()),
        Err(e) => (Status::InternalServerError, e.to_string()),
    }
}

#[get("/untouched")]
fn untouched(unit: &UnitOfWork) -> String {
    unit.is_tracked().to_string()
}

struct App {
    rocket: Rocket<Build>,
    registry: ConnectionRegistry,
    metrics: RouteMetrics,
}

fn build_app(config: PerformanceConfig, environment: &str) -> Result<App> {
    let registry = fake_registry(Arc::new(FakeDriver::new()));
    let metrics = RouteMetrics::new(&Registry::new()).map_err(|e| e.0)?;
    let shared: Arc<dyn ManagerRegistry> = Arc::new(registry.clone());

    let rocket = rocket::build()
        .attach(TracingFairing)
        .attach(QueryTrackingFairing::new(config.clone(), shared))
        .attach(
            PerformanceFairing::new(config.clone(), metrics.clone()).with_environment(environment),
        )
        .mount("/", routes![users, broken, untouched])
        .mount("/", routes![route_perf::views::diagnose])
        .manage(registry.clone())
        .manage(config);

    Ok(App {
        rocket,
        registry,
        metrics,
    })
}

fn status_count(metrics: &RouteMetrics, route: &str, status: &str) -> u64 {
    metrics
        .status_codes
        .with_label_values(&[route, status])
        .get()
}

#[rocket::async_test]
async fn test_request_queries_are_recorded() -> Result<()> {
    let app = build_app(PerformanceConfig::default(), "test")?;
    let client = Client::tracked(app.rocket)
        .await
        .expect("valid rocket instance");

    let response = client.get("/users").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.into_string().await.as_deref(), Some("2"));

    let connection = app.registry.get(CONNECTION_NAME).expect("registered");
    assert!(connection.is_tracking());

    assert_eq!(status_count(&app.metrics, "users", "200"), 1);
    let queries = app.metrics.query_count.with_label_values(&["users"]);
    assert_eq!(queries.get_sample_count(), 1);
    assert_eq!(queries.get_sample_sum(), 2.0);
    let requests = app.metrics.request_duration.with_label_values(&["users", "GET"]);
    assert_eq!(requests.get_sample_count(), 1);
    if memory_stats::memory_stats().is_some() {
        let memory = app.metrics.memory_usage.with_label_values(&["users"]);
        assert_eq!(memory.get_sample_count(), 1);
    }

    Ok(())
}

#[rocket::async_test]
async fn test_counts_reset_between_requests() -> Result<()> {
    let app = build_app(PerformanceConfig::default(), "test")?;
    let client = Client::tracked(app.rocket)
        .await
        .expect("valid rocket instance");

    for _ in 0..3 {
        let response = client.get("/users").dispatch().await;
        assert_eq!(response.into_string().await.as_deref(), Some("2"));
    }

    assert_eq!(status_count(&app.metrics, "users", "200"), 3);
    let queries = app.metrics.query_count.with_label_values(&["users"]);
    assert_eq!(queries.get_sample_sum(), 6.0);

    Ok(())
}

#[rocket::async_test]
async fn test_untracked_environment() -> Result<()> {
    let app = build_app(PerformanceConfig::default(), "prod")?;
    let client = Client::tracked(app.rocket)
        .await
        .expect("valid rocket instance");

    let response = client.get("/untouched").dispatch().await;
    assert_eq!(response.into_string().await.as_deref(), Some("false"));
    let response = client.get("/users").dispatch().await;
    assert_eq!(response.status(), Status::Ok);

    assert_eq!(status_count(&app.metrics, "users", "200"), 0);

    Ok(())
}

#[rocket::async_test]
async fn test_disabled() -> Result<()> {
    let config = PerformanceConfig {
        enabled: false,
        ..Default::default()
    };
    let app = build_app(config, "test")?;
    let client = Client::tracked(app.rocket)
        .await
        .expect("valid rocket instance");

    let response = client.get("/users").dispatch().await;
    assert_eq!(response.status(), Status::Ok);

    let connection = app.registry.get(CONNECTION_NAME).expect("registered");
    assert!(!connection.is_tracking());
    assert_eq!(status_count(&app.metrics, "users", "200"), 0);

    Ok(())
}

#[rocket::async_test]
async fn test_memory_tracking_disabled() -> Result<()> {
    let config = PerformanceConfig {
        track_memory_usage: false,
        ..Default::default()
    };
    let app = build_app(config, "test")?;
    let client = Client::tracked(app.rocket)
        .await
        .expect("valid rocket instance");

    client.get("/users").dispatch().await;

    assert_eq!(status_count(&app.metrics, "users", "200"), 1);
    let memory = app.metrics.memory_usage.with_label_values(&["users"]);
    assert_eq!(memory.get_sample_count(), 0);

    Ok(())
}

#[rocket::async_test]
async fn test_ignored_route() -> Result<()> {
    let config = PerformanceConfig {
        ignore_routes: vec!["users".to_string()],
        ..Default::default()
    };
    let app = build_app(config, "test")?;
    let client = Client::tracked(app.rocket)
        .await
        .expect("valid rocket instance");

    client.get("/users").dispatch().await;
    client.get("/untouched").dispatch().await;

    assert_eq!(status_count(&app.metrics, "users", "200"), 0);
    assert_eq!(status_count(&app.metrics, "untouched", "200"), 1);

    Ok(())
}

#[rocket::async_test]
async fn test_zero_sampling_rate() -> Result<()> {
    let config = PerformanceConfig {
        sampling_rate: 0.0,
        ..Default::default()
    };
    let app = build_app(config, "test")?;
    let client = Client::tracked(app.rocket)
        .await
        .expect("valid rocket instance");

    for _ in 0..5 {
        client.get("/users").dispatch().await;
    }
    assert_eq!(status_count(&app.metrics, "users", "200"), 0);

    Ok(())
}

#[rocket::async_test]
async fn test_status_code_filter() -> Result<()> {
    let app = build_app(PerformanceConfig::default(), "test")?;
    let client = Client::tracked(app.rocket)
        .await
        .expect("valid rocket instance");

    let response = client.get("/broken").dispatch().await;
    assert_eq!(response.status(), Status::InternalServerError);
    assert_eq!(status_count(&app.metrics, "broken", "500"), 1);

    let config = PerformanceConfig {
        track_status_codes: vec![200],
        ..Default::default()
    };
    let app = build_app(config, "test")?;
    let client = Client::tracked(app.rocket)
        .await
        .expect("valid rocket instance");
    client.get("/broken").dispatch().await;
    assert_eq!(status_count(&app.metrics, "broken", "500"), 0);
    let queries = app.metrics.query_count.with_label_values(&["broken"]);
    assert_eq!(queries.get_sample_sum(), 1.0);

    Ok(())
}

#[rocket::async_test]
async fn test_query_tracking_disabled() -> Result<()> {
    let config = PerformanceConfig {
        track_queries: false,
        ..Default::default()
    };
    let app = build_app(config, "test")?;
    let client = Client::tracked(app.rocket)
        .await
        .expect("valid rocket instance");

    client.get("/users").dispatch().await;

    let connection = app.registry.get(CONNECTION_NAME).expect("registered");
    assert!(!connection.is_tracking());
    let queries = app.metrics.query_count.with_label_values(&["users"]);
    assert_eq!(queries.get_sample_count(), 0);
    assert_eq!(status_count(&app.metrics, "users", "200"), 1);

    Ok(())
}

#[rocket::async_test]
async fn test_diagnose() -> Result<()> {
    let app = build_app(PerformanceConfig::default(), "test")?;
    let client = Client::tracked(app.rocket)
        .await
        .expect("valid rocket instance");

    let response = client.get("/_perf/diagnose").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    let report: JsonValue = serde_json::from_str(&response.into_string().await.unwrap_or_default())?;

    assert_eq!(report["connection"], "default");
    assert_eq!(report["connection_found"], true);
    assert_eq!(report["driver"], "fake");
    assert_eq!(report["driver_tracking"], true);
    assert_eq!(report["supports_config_middleware"], false);
    assert_eq!(
        report["layout_version"],
        JsonValue::from(env!("CARGO_PKG_VERSION"))
    );

    Ok(())
}

#[rocket::async_test]
async fn test_injection_retries_then_gives_up() -> Result<()> {
    let registry = Arc::new(FailingRegistry::default());
    let fairing = QueryTrackingFairing::new(PerformanceConfig::default(), registry.clone());

    assert!(!fairing.attach().await);
    assert_eq!(registry.lookups.load(Ordering::SeqCst), 3);
    assert!(!fairing.is_tracked(CONNECTION_NAME));

    assert!(!fairing.attach().await);
    assert_eq!(registry.lookups.load(Ordering::SeqCst), 6);

    Ok(())
}

#[rocket::async_test]
async fn test_injection_remembers_tracked_connection() -> Result<()> {
    let registry = fake_registry(Arc::new(FakeDriver::new()));
    let fairing = QueryTrackingFairing::new(PerformanceConfig::default(), Arc::new(registry));

    assert!(fairing.attach().await);
    assert!(fairing.is_tracked(CONNECTION_NAME));
    assert!(fairing.attach().await);

    Ok(())
}

#[test]
fn test_route_name() {
    let mut route = routes![users].remove(0);
    assert_eq!(route_name(&route), "users");

    route.name = None;
    assert_eq!(route_name(&route), "/users");
}
