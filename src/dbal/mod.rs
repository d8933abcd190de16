mod connection;
pub mod driver;
mod introspect;
pub mod layout;
mod middleware;
pub mod postgres;
mod registry;
mod statement;
pub mod timer;
mod wrapper;

pub use connection::InterceptingConnection;
pub use driver::{
    ConnectionParams, Driver, DriverConnection, DriverError, DriverResult, DriverStatement,
    ResultSet, Value,
};
pub use introspect::{ConnectionSlot, DriverSlot, Introspect, Property, SlotError};
pub use layout::{FieldLayout, LayoutTable, ProbeOrder};
pub use middleware::{DriverWrapper, QueryTrackingMiddleware, TimerSource};
pub use postgres::PgDriver;
pub use registry::{ConnectionHandle, ConnectionInjector, ManagerRegistry, RegistryError};
pub use statement::InterceptingStatement;
pub use timer::{IdSequence, QueryId, QuerySpan, QueryStats, QueryTimer};
pub use wrapper::{Connection, ConnectionRegistry, PooledConnection};
