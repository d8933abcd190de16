use std::future::Future;

use anyhow::anyhow;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::Request;

use crate::config::PerformanceConfig;
use crate::dbal::{
    ConnectionRegistry, DriverConnection, DriverResult, PooledConnection, ResultSet, Value,
};
use crate::tracking::UnitOfWork;

/// Driver connection checked out for the current request. Every call runs in
/// the request's unit of work.
pub struct Db<'r> {
    connection: PooledConnection,
    unit: &'r UnitOfWork,
}

impl Db<'_> {
    pub fn connection(&self) -> &dyn DriverConnection {
        &*self.connection
    }

    pub fn unit(&self) -> &UnitOfWork {
        self.unit
    }

    pub async fn query(&self, sql: &str) -> DriverResult<ResultSet> {
        self.unit.scope(self.connection.query(sql)).await
    }

    pub async fn exec(&self, sql: &str) -> DriverResult<u64> {
        self.unit.scope(self.connection.exec(sql)).await
    }

    /// Prepares `sql` and runs it once with `params`.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> DriverResult<ResultSet> {
        self.unit
            .scope(async {
                let mut statement = self.connection.prepare(sql).await?;
                statement.execute(Some(params)).await
            })
            .await
    }

    pub async fn scope<F: Future>(&self, fut: F) -> F::Output {
        self.unit.scope(fut).await
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Db<'r> {
    type Error = crate::error::Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(registry) = req.rocket().state::<ConnectionRegistry>() else {
            return Outcome::Error((
                Status::InternalServerError,
                anyhow!("No connection registry managed").into(),
            ));
        };

        let name = req
            .rocket()
            .state::<PerformanceConfig>()
            .map(|config| config.connection.as_str())
            .unwrap_or_else(|| registry.default_name());

        let Some(connection) = registry.get(name) else {
            return Outcome::Error((
                Status::InternalServerError,
                anyhow!("Unknown connection: {}", name).into(),
            ));
        };

        let unit = UnitOfWork::of(req);
        match unit.scope(connection.acquire()).await {
            Ok(connection) => Outcome::Success(Db { connection, unit }),
            Err(e) => {
                tracing::error!(error = %e, connection = name, "Failed to acquire connection");
                Outcome::Error((Status::ServiceUnavailable, e.into()))
            }
        }
    }
}
