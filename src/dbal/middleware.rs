use std::sync::Arc;

use crate::dbal::connection::InterceptingConnection;
use crate::dbal::driver::{ConnectionParams, Driver, DriverConnection, DriverResult};
use crate::dbal::timer::QueryTimer;

/// Where intercepted executions report to.
#[derive(Clone, Debug, Default)]
pub enum TimerSource {
    /// The unit of work the caller is running in, see [`QueryTimer::current`].
    #[default]
    Scoped,
    Fixed(QueryTimer),
}

impl TimerSource {
    pub fn resolve(&self) -> QueryTimer {
        match self {
            TimerSource::Scoped => QueryTimer::current(),
            TimerSource::Fixed(timer) => timer.clone(),
        }
    }
}

/// Hands out the query tracking wrappers.
#[derive(Clone, Debug, Default)]
pub struct QueryTrackingMiddleware {
    timer: TimerSource,
}

impl QueryTrackingMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timer(timer: QueryTimer) -> Self {
        Self {
            timer: TimerSource::Fixed(timer),
        }
    }

    pub fn timer_source(&self) -> &TimerSource {
        &self.timer
    }

    /// Every call yields a distinct wrapper bound to `driver`.
    pub fn wrap(&self, driver: Arc<dyn Driver>) -> Arc<dyn Driver> {
        Arc::new(DriverWrapper::new(driver, self.timer.clone()))
    }

    pub fn wrap_connection(&self, connection: Box<dyn DriverConnection>) -> Box<dyn DriverConnection> {
        Box::new(InterceptingConnection::new(connection, self.timer.clone()))
    }
}

pub struct DriverWrapper {
    inner: Arc<dyn Driver>,
    timer: TimerSource,
}

impl DriverWrapper {
    pub fn new(inner: Arc<dyn Driver>, timer: TimerSource) -> Self {
        Self { inner, timer }
    }

    pub fn inner(&self) -> &Arc<dyn Driver> {
        &self.inner
    }
}

#[rocket::async_trait]
impl Driver for DriverWrapper {
    async fn connect(&self, params: &ConnectionParams) -> DriverResult<Box<dyn DriverConnection>> {
        let connection = self.inner.connect(params).await?;
        Ok(Box::new(InterceptingConnection::new(
            connection,
            self.timer.clone(),
        )))
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn tracks_queries(&self) -> bool {
        true
    }
}
