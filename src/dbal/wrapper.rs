use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use crate::dbal::driver::{ConnectionParams, Driver, DriverConnection, DriverResult};
use crate::dbal::introspect::{ConnectionSlot, DriverSlot, Introspect, Property};
use crate::dbal::registry::{ConnectionHandle, ManagerRegistry, RegistryError};

const DEFAULT_MAX_IDLE: usize = 8;

/// Named connection applications hold on to. Driver connections are opened
/// lazily through whatever driver currently sits in the `driver` field.
pub struct Connection {
    name: String,
    params: ConnectionParams,
    driver: DriverSlot,
    connections: ConnectionSlot,
}

impl Connection {
    pub fn new(name: impl Into<String>, driver: Arc<dyn Driver>, params: ConnectionParams) -> Self {
        Self::with_max_idle(name, driver, params, DEFAULT_MAX_IDLE)
    }

    pub fn with_max_idle(
        name: impl Into<String>,
        driver: Arc<dyn Driver>,
        params: ConnectionParams,
        max_idle: usize,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            driver: DriverSlot::new(driver),
            connections: ConnectionSlot::new(max_idle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver(&self) -> Arc<dyn Driver> {
        self.driver.get()
    }

    pub fn is_tracking(&self) -> bool {
        self.driver.get().tracks_queries()
    }

    pub fn idle_connections(&self) -> usize {
        self.connections.len()
    }

    #[tracing::instrument(skip(self), fields(connection = %self.name))]
    pub async fn acquire(self: &Arc<Self>) -> DriverResult<PooledConnection> {
        let connection = match self.connections.pop() {
            Some(connection) => connection,
            None => {
                let driver = self.driver.get();
                tracing::debug!(driver = driver.name(), "Opening driver connection");
                driver.connect(&self.params).await?
            }
        };

        Ok(PooledConnection {
            owner: self.clone(),
            connection: Some(connection),
        })
    }
}

impl Introspect for Connection {
    fn property(&self, name: &str) -> Option<Property<'_>> {
        match name {
            "driver" => Some(Property::Driver(&self.driver)),
            "connections" => Some(Property::Connections(&self.connections)),
            "params" => Some(Property::Opaque(&self.params)),
            "name" => Some(Property::Opaque(&self.name)),
            _ => None,
        }
    }
}

impl ConnectionHandle for Connection {
    fn introspect(&self) -> Option<&dyn Introspect> {
        Some(self)
    }
}

/// Checked out driver connection, handed back to its owner on drop.
pub struct PooledConnection {
    owner: Arc<Connection>,
    connection: Option<Box<dyn DriverConnection>>,
}

impl PooledConnection {
    pub fn owner(&self) -> &Connection {
        &self.owner
    }

    /// Closes the connection instead of returning it to the idle list.
    pub fn discard(mut self) {
        self.connection.take();
    }
}

impl Deref for PooledConnection {
    type Target = dyn DriverConnection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_deref()
            .expect("connection is only taken on drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        // Opened before tracking was injected, the next checkout reconnects
        // through the tracking driver instead.
        if self.owner.is_tracking() && !connection.tracks_queries() {
            tracing::debug!(connection = %self.owner.name, "Closing untracked connection");
            return;
        }

        self.owner.connections.push(connection);
    }
}

#[derive(Clone)]
pub struct ConnectionRegistry {
    default_name: String,
    connections: HashMap<String, Arc<Connection>>,
}

impl ConnectionRegistry {
    pub fn new(default_name: impl Into<String>) -> Self {
        Self {
            default_name: default_name.into(),
            connections: HashMap::new(),
        }
    }

    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.connections
            .insert(connection.name().to_string(), Arc::new(connection));
        self
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    pub fn get(&self, name: &str) -> Option<Arc<Connection>> {
        self.connections.get(name).cloned()
    }

    pub fn default_connection(&self) -> Option<Arc<Connection>> {
        self.get(&self.default_name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.connections.keys().map(String::as_str)
    }
}

impl ManagerRegistry for ConnectionRegistry {
    fn connection(&self, name: &str) -> Result<Arc<dyn ConnectionHandle>, RegistryError> {
        let connection = self
            .get(name)
            .ok_or_else(|| RegistryError::UnknownConnection(name.to_string()))?;
        Ok(connection as Arc<dyn ConnectionHandle>)
    }

    fn layout_version(&self) -> Option<String> {
        Some(env!("CARGO_PKG_VERSION").to_string())
    }
}
