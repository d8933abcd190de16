use std::any::Any;

use thiserror::Error;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

/// Fully buffered outcome of a query or statement execution.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub rows_affected: u64,
}

impl ResultSet {
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            ..Default::default()
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn first_value(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConnectionParams {
    pub url: String,
    pub application_name: Option<String>,
}

impl ConnectionParams {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            application_name: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Failed to connect: {0}")]
    Connection(String),
    #[error("Query failed: {message}")]
    Query {
        message: String,
        sql_state: Option<String>,
    },
    #[error("Unsupported column type: {0}")]
    UnsupportedType(String),
    #[error("Connection is closed")]
    Closed,
}

impl DriverError {
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql_state: None,
        }
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Produces raw connections to a database server.
#[rocket::async_trait]
pub trait Driver: Send + Sync {
    async fn connect(&self, params: &ConnectionParams) -> DriverResult<Box<dyn DriverConnection>>;

    fn name(&self) -> &str;

    /// Whether connections produced by this driver already report to a
    /// `QueryTimer`. Only the query tracking wrappers answer `true`.
    fn tracks_queries(&self) -> bool {
        false
    }
}

#[rocket::async_trait]
pub trait DriverConnection: Send + Sync {
    async fn prepare(&self, sql: &str) -> DriverResult<Box<dyn DriverStatement>>;

    async fn query(&self, sql: &str) -> DriverResult<ResultSet>;

    async fn exec(&self, sql: &str) -> DriverResult<u64>;

    async fn begin_transaction(&self) -> DriverResult<()>;

    async fn commit(&self) -> DriverResult<()>;

    async fn roll_back(&self) -> DriverResult<()>;

    fn quote(&self, value: &str) -> String;

    async fn last_insert_id(&self) -> DriverResult<Value>;

    async fn server_version(&self) -> DriverResult<Option<String>>;

    fn native_connection(&self) -> &(dyn Any + Send + Sync);

    fn tracks_queries(&self) -> bool {
        false
    }
}

#[rocket::async_trait]
pub trait DriverStatement: Send + Sync {
    /// Binds a value to a 1-based positional parameter.
    fn bind_value(&mut self, position: usize, value: Value);

    /// Runs the statement. Explicit `params` take precedence over bound values.
    async fn execute(&mut self, params: Option<&[Value]>) -> DriverResult<ResultSet>;

    fn sql(&self) -> &str;
}
