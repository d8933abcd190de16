use std::any::Any;

use crate::dbal::driver::{DriverConnection, DriverResult, DriverStatement, ResultSet, Value};
use crate::dbal::middleware::TimerSource;
use crate::dbal::statement::InterceptingStatement;
use crate::dbal::timer::IdSequence;

/// Wraps a driver connection so that direct `query`/`exec` calls are timed
/// and prepared statements come back as [`InterceptingStatement`]s.
pub struct InterceptingConnection {
    inner: Box<dyn DriverConnection>,
    timer: TimerSource,
    ids: IdSequence,
}

impl InterceptingConnection {
    pub fn new(inner: Box<dyn DriverConnection>, timer: TimerSource) -> Self {
        Self {
            inner,
            timer,
            ids: IdSequence::new("conn"),
        }
    }

    pub fn into_inner(self) -> Box<dyn DriverConnection> {
        self.inner
    }
}

#[rocket::async_trait]
impl DriverConnection for InterceptingConnection {
    async fn prepare(&self, sql: &str) -> DriverResult<Box<dyn DriverStatement>> {
        let statement = self.inner.prepare(sql).await?;
        Ok(Box::new(InterceptingStatement::new(
            statement,
            self.timer.clone(),
        )))
    }

    async fn query(&self, sql: &str) -> DriverResult<ResultSet> {
        let span = self.timer.resolve().span(self.ids.next_id());
        let result = self.inner.query(sql).await;
        span.finish();

        result
    }

    async fn exec(&self, sql: &str) -> DriverResult<u64> {
        let span = self.timer.resolve().span(self.ids.next_id());
        let result = self.inner.exec(sql).await;
        span.finish();

        result
    }

    async fn begin_transaction(&self) -> DriverResult<()> {
        self.inner.begin_transaction().await
    }

    async fn commit(&self) -> DriverResult<()> {
        self.inner.commit().await
    }

    async fn roll_back(&self) -> DriverResult<()> {
        self.inner.roll_back().await
    }

    fn quote(&self, value: &str) -> String {
        self.inner.quote(value)
    }

    async fn last_insert_id(&self) -> DriverResult<Value> {
        self.inner.last_insert_id().await
    }

    // Callers expect a version string, never an absent one.
    async fn server_version(&self) -> DriverResult<Option<String>> {
        Ok(Some(self.inner.server_version().await?.unwrap_or_default()))
    }

    fn native_connection(&self) -> &(dyn Any + Send + Sync) {
        self.inner.native_connection()
    }

    fn tracks_queries(&self) -> bool {
        true
    }
}
