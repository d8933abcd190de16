use diesel::{ConnectionError, ConnectionResult};
use diesel_async::pooled_connection::deadpool::Pool as DieselPool;
use diesel_async::pooled_connection::{AsyncDieselConnectionManager, ManagerConfig};
use diesel_async::AsyncPgConnection;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::tls::{connect_postgres, install_crypto_provider};

mod instrumentation;

pub use instrumentation::{TrackingInstrumentation, QUERY_HISTOGRAM};

pub type DbPool = DieselPool<AsyncPgConnection>;

#[tracing::instrument(skip(config))]
fn establish_connection(config: &str) -> BoxFuture<'_, ConnectionResult<AsyncPgConnection>> {
    let fut = async {
        let client = connect_postgres(config)
            .await
            .map_err(|e| ConnectionError::BadConnection(e.to_string()))?;
        AsyncPgConnection::try_from(client).await
    };
    fut.boxed()
}

/// Every connection of the returned pool reports its queries to the unit of
/// work it is used from.
pub async fn get_database_pool(db_url: &str) -> anyhow::Result<DbPool> {
    install_crypto_provider();

    diesel::connection::set_default_instrumentation(|| {
        Some(Box::new(TrackingInstrumentation::default()))
    })?;

    let mut config = ManagerConfig::default();
    config.custom_setup = Box::new(establish_connection);

    let mgr = AsyncDieselConnectionManager::<AsyncPgConnection>::new_with_config(db_url, config);
    let db_pool = DieselPool::builder(mgr).build()?;

    Ok(db_pool)
}
