#![allow(dead_code)]

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use route_perf::dbal::{
    Connection, ConnectionHandle, ConnectionParams, ConnectionRegistry, ConnectionSlot, Driver,
    DriverConnection, DriverError, DriverResult, DriverSlot, DriverStatement, Introspect,
    ManagerRegistry, Property, RegistryError, ResultSet, Value,
};

pub const CONNECTION_NAME: &str = "default";

/// Statements containing this marker fail.
pub const FAILING_SQL: &str = "SELECT broken";

pub type CallLog = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
pub struct FakeDriver {
    pub connects: AtomicUsize,
    pub delay: Option<Duration>,
    pub log: CallLog,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[rocket::async_trait]
impl Driver for FakeDriver {
    async fn connect(&self, _params: &ConnectionParams) -> DriverResult<Box<dyn DriverConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            delay: self.delay,
            log: self.log.clone(),
        }))
    }

    fn name(&self) -> &str {
        "fake"
    }
}

pub struct FakeConnection {
    pub delay: Option<Duration>,
    pub log: CallLog,
}

impl FakeConnection {
    pub fn new() -> Self {
        Self {
            delay: None,
            log: CallLog::default(),
        }
    }

    fn record(&self, call: impl Into<String>) {
        self.log.lock().unwrap().push(call.into());
    }
}

async fn run(delay: Option<Duration>, sql: &str) -> DriverResult<()> {
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    if sql.contains(FAILING_SQL) {
        return Err(DriverError::Query {
            message: format!("syntax error in {sql}"),
            sql_state: Some("42601".to_string()),
        });
    }

    Ok(())
}

#[rocket::async_trait]
impl DriverConnection for FakeConnection {
    async fn prepare(&self, sql: &str) -> DriverResult<Box<dyn DriverStatement>> {
        self.record(format!("prepare {sql}"));
        Ok(Box::new(FakeStatement {
            sql: sql.to_string(),
            bound: Vec::new(),
            delay: self.delay,
        }))
    }

    async fn query(&self, sql: &str) -> DriverResult<ResultSet> {
        self.record(format!("query {sql}"));
        run(self.delay, sql).await?;
        Ok(ResultSet {
            columns: vec!["?column?".to_string()],
            rows: vec![vec![Value::Int(1)]],
            rows_affected: 1,
        })
    }

    async fn exec(&self, sql: &str) -> DriverResult<u64> {
        self.record(format!("exec {sql}"));
        run(self.delay, sql).await?;
        Ok(if sql.is_empty() { 0 } else { 3 })
    }

    async fn begin_transaction(&self) -> DriverResult<()> {
        self.record("begin");
        Ok(())
    }

    async fn commit(&self) -> DriverResult<()> {
        self.record("commit");
        Ok(())
    }

    async fn roll_back(&self) -> DriverResult<()> {
        self.record("rollback");
        Ok(())
    }

    fn quote(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    async fn last_insert_id(&self) -> DriverResult<Value> {
        Ok(Value::Int(42))
    }

    async fn server_version(&self) -> DriverResult<Option<String>> {
        Ok(None)
    }

    fn native_connection(&self) -> &(dyn Any + Send + Sync) {
        &self.log
    }
}

pub struct FakeStatement {
    sql: String,
    bound: Vec<Value>,
    delay: Option<Duration>,
}

#[rocket::async_trait]
impl DriverStatement for FakeStatement {
    fn bind_value(&mut self, position: usize, value: Value) {
        let idx = position.saturating_sub(1);
        if idx >= self.bound.len() {
            self.bound.resize(idx + 1, Value::Null);
        }
        self.bound[idx] = value;
    }

    async fn execute(&mut self, params: Option<&[Value]>) -> DriverResult<ResultSet> {
        run(self.delay, &self.sql).await?;
        let row = match params {
            Some(params) => params.to_vec(),
            None => self.bound.clone(),
        };
        Ok(ResultSet {
            columns: (1..=row.len()).map(|i| format!("${i}")).collect(),
            rows: vec![row],
            rows_affected: 1,
        })
    }

    fn sql(&self) -> &str {
        &self.sql
    }
}

pub fn fake_connection(driver: Arc<FakeDriver>) -> Connection {
    Connection::new(
        CONNECTION_NAME,
        driver,
        ConnectionParams::new("fake://localhost/test"),
    )
}

pub fn fake_registry(driver: Arc<FakeDriver>) -> ConnectionRegistry {
    ConnectionRegistry::new(CONNECTION_NAME).with_connection(fake_connection(driver))
}

/// Registry that can't hand out anything and counts how often it was asked.
#[derive(Default)]
pub struct FailingRegistry {
    pub lookups: AtomicUsize,
}

impl ManagerRegistry for FailingRegistry {
    fn connection(&self, name: &str) -> Result<Arc<dyn ConnectionHandle>, RegistryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Err(RegistryError::Unavailable(
            name.to_string(),
            "server went away".to_string(),
        ))
    }
}

/// Serves a single host object under any name.
pub struct HostRegistry {
    pub host: Arc<dyn ConnectionHandle>,
    pub version: Option<String>,
}

impl HostRegistry {
    pub fn new(host: Arc<dyn ConnectionHandle>) -> Self {
        Self {
            host,
            version: None,
        }
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }
}

impl ManagerRegistry for HostRegistry {
    fn connection(&self, _name: &str) -> Result<Arc<dyn ConnectionHandle>, RegistryError> {
        Ok(self.host.clone())
    }

    fn layout_version(&self) -> Option<String> {
        self.version.clone()
    }
}

/// Something a registry returns that isn't a connection at all.
pub struct NotAConnection;

impl ConnectionHandle for NotAConnection {
    fn introspect(&self) -> Option<&dyn Introspect> {
        None
    }
}

/// Old style host: the driver lives in `_driver`, idle connections in `_conn`.
pub struct LegacyHost {
    pub _driver: DriverSlot,
    pub _conn: ConnectionSlot,
}

impl LegacyHost {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            _driver: DriverSlot::new(driver),
            _conn: ConnectionSlot::new(4),
        }
    }
}

impl Introspect for LegacyHost {
    fn property(&self, name: &str) -> Option<Property<'_>> {
        match name {
            "_driver" => Some(Property::Driver(&self._driver)),
            "_conn" => Some(Property::Connections(&self._conn)),
            _ => None,
        }
    }
}

/// Proxy around a legacy host exposing no driver of its own.
pub struct ProxyHost {
    pub inner: LegacyHost,
}

impl Introspect for ProxyHost {
    fn property(&self, name: &str) -> Option<Property<'_>> {
        match name {
            "name" => Some(Property::Opaque(&CONNECTION_NAME)),
            _ => None,
        }
    }

    fn parent(&self) -> Option<&dyn Introspect> {
        Some(&self.inner)
    }
}

impl ConnectionHandle for ProxyHost {
    fn introspect(&self) -> Option<&dyn Introspect> {
        Some(self)
    }
}

/// Host whose driver field refuses writes.
pub struct SealedHost {
    pub driver: DriverSlot,
}

impl Introspect for SealedHost {
    fn property(&self, name: &str) -> Option<Property<'_>> {
        match name {
            "driver" => Some(Property::Driver(&self.driver)),
            _ => None,
        }
    }
}

impl ConnectionHandle for SealedHost {
    fn introspect(&self) -> Option<&dyn Introspect> {
        Some(self)
    }
}

/// Host exposing its driver under a name nobody probes for.
pub struct OddHost {
    pub engine: DriverSlot,
}

impl Introspect for OddHost {
    fn property(&self, name: &str) -> Option<Property<'_>> {
        match name {
            "engine" => Some(Property::Driver(&self.engine)),
            _ => None,
        }
    }
}

impl ConnectionHandle for OddHost {
    fn introspect(&self) -> Option<&dyn Introspect> {
        Some(self)
    }
}

impl ConnectionHandle for LegacyHost {
    fn introspect(&self) -> Option<&dyn Introspect> {
        Some(self)
    }
}
