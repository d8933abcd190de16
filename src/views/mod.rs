use diesel_async::RunQueryDsl;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{get, routes, Route, State};
use serde::Serialize;

use crate::config::{current_environment, PerformanceConfig};
use crate::dbal::{ConnectionInjector, ConnectionRegistry};
use crate::error::{ApiResult, Error, WithContext, WithStatus};
use crate::tracking::Db;
use crate::Context;

mod metrics;

pub use metrics::MetricsRoute;

#[derive(Serialize, Debug)]
pub struct Diagnosis {
    pub enabled: bool,
    pub environment: String,
    pub environment_tracked: bool,
    pub connection: String,
    pub connection_found: bool,
    pub driver: Option<String>,
    pub driver_tracking: bool,
    pub idle_connections: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout_version: Option<String>,
    pub supports_config_middleware: bool,
}

#[get("/_perf/diagnose")]
#[tracing::instrument(skip_all)]
pub fn diagnose(
    config: &State<PerformanceConfig>,
    registry: &State<ConnectionRegistry>,
) -> Json<Diagnosis> {
    let environment = current_environment();
    let injector =
        ConnectionInjector::new().with_version_override(config.layout_version.as_deref());
    let connection = registry.get(&config.connection);

    Json(Diagnosis {
        enabled: config.enabled,
        environment_tracked: config.is_environment_tracked(&environment),
        environment,
        connection: config.connection.clone(),
        connection_found: connection.is_some(),
        driver: connection.as_ref().map(|c| c.driver().name().to_string()),
        driver_tracking: connection.as_ref().is_some_and(|c| c.is_tracking()),
        idle_connections: connection.as_ref().map_or(0, |c| c.idle_connections()),
        layout_version: connection.as_ref().and_then(|c| {
            injector
                .detect_version(registry.inner(), &**c)
                .map(|v| v.to_string())
        }),
        supports_config_middleware: injector.supports_config_middleware(),
    })
}

#[derive(Serialize, Debug)]
pub struct Health {
    pub status: &'static str,
    pub query_count: u64,
    pub query_time: f64,
}

#[get("/_perf/health")]
#[tracing::instrument(skip_all)]
pub async fn health(db: Db<'_>, ctx: &State<Context>) -> ApiResult<Json<Health>> {
    db.query("SELECT 1")
        .await
        .map_err(Error::from)
        .status(Status::ServiceUnavailable)
        .context("Tracked connection")?;

    db.scope(async {
        let mut conn = ctx.db_pool.get().await?;
        diesel::sql_query("SELECT 1").execute(&mut *conn).await?;
        Ok::<_, Error>(())
    })
    .await
    .status(Status::ServiceUnavailable)
    .context("Database pool")?;

    let stats = db.unit().timer().snapshot();
    Ok(Json(Health {
        status: "ok",
        query_count: stats.count,
        query_time: stats.total.as_secs_f64(),
    }))
}

pub fn routes() -> Vec<Route> {
    routes![diagnose, health]
}
