use std::sync::Arc;

use semver::Version;
use thiserror::Error;

use crate::dbal::introspect::{Introspect, Property};
use crate::dbal::layout::{parse_version, FieldLayout, LayoutTable, ProbeOrder};
use crate::dbal::middleware::QueryTrackingMiddleware;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Unknown connection: {0}")]
    UnknownConnection(String),
    #[error("Connection {0} is not available: {1}")]
    Unavailable(String, String),
}

/// Whatever a registry hands out under a connection name.
pub trait ConnectionHandle: Send + Sync {
    /// `None` when the object is not a connection the injector understands.
    fn introspect(&self) -> Option<&dyn Introspect>;
}

/// Hands out live connections by logical name.
pub trait ManagerRegistry: Send + Sync {
    fn connection(&self, name: &str) -> Result<Arc<dyn ConnectionHandle>, RegistryError>;

    /// Version of the library owning the connections, when it knows it.
    fn layout_version(&self) -> Option<String> {
        None
    }
}

enum Probe {
    Wrapped,
    AlreadyWrapped,
    Skipped,
}

/// Puts query tracking in front of the driver of a registry connection,
/// at runtime and on a best-effort basis.
#[derive(Clone, Debug)]
pub struct ConnectionInjector {
    layouts: LayoutTable,
    version_override: Option<Version>,
}

impl Default for ConnectionInjector {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionInjector {
    pub fn new() -> Self {
        Self {
            layouts: LayoutTable::builtin(),
            version_override: None,
        }
    }

    pub fn with_layouts(layouts: LayoutTable) -> Self {
        Self {
            layouts,
            version_override: None,
        }
    }

    pub fn with_layout(mut self, layout: FieldLayout) -> Self {
        self.layouts = self.layouts.with_layout(layout);
        self
    }

    /// Ignored when it doesn't parse as a version.
    pub fn with_version_override(mut self, version: Option<&str>) -> Self {
        self.version_override = version.and_then(parse_version);
        self
    }

    /// Configuration driven middleware registration is never supported,
    /// injection is the only way in.
    pub fn supports_config_middleware(&self) -> bool {
        false
    }

    pub fn detect_version(
        &self,
        registry: &dyn ManagerRegistry,
        target: &dyn Introspect,
    ) -> Option<Version> {
        if let Some(version) = &self.version_override {
            return Some(version.clone());
        }

        if let Some(version) = registry.layout_version().as_deref().and_then(parse_version) {
            return Some(version);
        }

        if target.property("_driver").is_some() {
            return Some(Version::new(0, 0, 0));
        }

        None
    }

    /// Returns `true` once the connection's driver is tracked, whether this
    /// call wrapped it or an earlier one did. Never panics on a foreign
    /// layout and leaves the connection untouched when returning `false`.
    #[tracing::instrument(skip(self, registry, middleware))]
    pub fn apply_middleware(
        &self,
        registry: &dyn ManagerRegistry,
        connection_name: &str,
        middleware: &QueryTrackingMiddleware,
    ) -> bool {
        let handle = match registry.connection(connection_name) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::debug!(error = %e, "Could not resolve connection");
                return false;
            }
        };

        let Some(target) = handle.introspect() else {
            tracing::debug!("Registry returned something that isn't a connection");
            return false;
        };

        let version = self.detect_version(registry, target);
        let order = self.layouts.probe_order(version.as_ref());

        let mut level = Some(target);
        while let Some(object) = level {
            for field in &order.driver_fields {
                match self.probe_driver(object, field, &order, middleware) {
                    Probe::Wrapped => {
                        tracing::info!(
                            connection = connection_name,
                            field = field.as_str(),
                            host = object.type_name(),
                            "Query tracking attached"
                        );
                        return true;
                    }
                    Probe::AlreadyWrapped => return true,
                    Probe::Skipped => continue,
                }
            }
            level = object.parent();
        }

        tracing::debug!(
            connection = connection_name,
            host = target.type_name(),
            ?version,
            "No driver field found"
        );
        false
    }

    fn probe_driver(
        &self,
        object: &dyn Introspect,
        field: &str,
        order: &ProbeOrder,
        middleware: &QueryTrackingMiddleware,
    ) -> Probe {
        let Some(Property::Driver(slot)) = object.property(field) else {
            return Probe::Skipped;
        };

        let driver = match slot.try_get() {
            Ok(driver) => driver,
            Err(e) => {
                tracing::debug!(field, error = %e, "Driver field unreadable");
                return Probe::Skipped;
            }
        };

        if driver.tracks_queries() {
            self.wrap_idle_connections(object, order, middleware);
            return Probe::AlreadyWrapped;
        }

        if let Err(e) = slot.replace(&driver, middleware.wrap(driver.clone())) {
            tracing::debug!(field, error = %e, "Driver field rejected the wrapper");
            return Probe::Skipped;
        }

        self.wrap_idle_connections(object, order, middleware);

        Probe::Wrapped
    }

    // Connections opened before the driver was swapped keep running
    // untracked unless they get wrapped as well. Runs again on every
    // application since checked out connections only come back later.
    fn wrap_idle_connections(
        &self,
        object: &dyn Introspect,
        order: &ProbeOrder,
        middleware: &QueryTrackingMiddleware,
    ) {
        for field in &order.connection_fields {
            let Some(Property::Connections(slot)) = object.property(field) else {
                continue;
            };

            match slot.wrap_untracked(|connection| middleware.wrap_connection(connection)) {
                Ok(0) => return,
                Ok(wrapped) => {
                    tracing::debug!(field = field.as_str(), wrapped, "Wrapped idle connections");
                    return;
                }
                Err(e) => {
                    tracing::debug!(field = field.as_str(), error = %e, "Idle connections left as is");
                }
            }
        }
    }
}
