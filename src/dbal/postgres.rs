use std::any::Any;
use std::error::Error as StdError;
use std::sync::Arc;

use bytes::BytesMut;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::{Client, Row, SimpleQueryMessage, Statement};

use crate::dbal::driver::{
    ConnectionParams, Driver, DriverConnection, DriverError, DriverResult, DriverStatement,
    ResultSet, Value,
};
use crate::tls::connect_postgres;

impl From<tokio_postgres::Error> for DriverError {
    fn from(e: tokio_postgres::Error) -> Self {
        if e.is_closed() {
            return DriverError::Closed;
        }

        DriverError::Query {
            sql_state: e.code().map(|state| state.code().to_string()),
            message: e.to_string(),
        }
    }
}

impl ToSql for Value {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(v) => v.to_sql(ty, out),
            Value::Int(v) => int_to_sql(*v, ty, out),
            Value::Float(v) => match *ty {
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Value::Text(v) => match *ty {
                Type::INT2 | Type::INT4 | Type::INT8 => int_to_sql(v.trim().parse()?, ty, out),
                Type::FLOAT4 | Type::FLOAT8 => Value::Float(v.trim().parse()?).to_sql(ty, out),
                Type::BOOL => Value::Bool(matches!(v.as_str(), "t" | "true" | "1")).to_sql(ty, out),
                _ => v.as_str().to_sql(ty, out),
            },
            Value::Bytes(v) => v.as_slice().to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn int_to_sql(
    value: i64,
    ty: &Type,
    out: &mut BytesMut,
) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
    match *ty {
        Type::INT2 => i16::try_from(value)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(value)?.to_sql(ty, out),
        Type::OID => u32::try_from(value)?.to_sql(ty, out),
        Type::FLOAT4 => (value as f32).to_sql(ty, out),
        Type::FLOAT8 => (value as f64).to_sql(ty, out),
        Type::BOOL => (value != 0).to_sql(ty, out),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            value.to_string().as_str().to_sql(ty, out)
        }
        _ => value.to_sql(ty, out),
    }
}

fn decode_column(row: &Row, idx: usize, ty: &Type) -> DriverResult<Value> {
    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)?
            .map(|v| Value::Int(v.into())),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)?
            .map(|v| Value::Int(v.into())),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(Value::Int),
        Type::OID => row
            .try_get::<_, Option<u32>>(idx)?
            .map(|v| Value::Int(v.into())),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| Value::Float(v.into())),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(Value::Float),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            row.try_get::<_, Option<String>>(idx)?.map(Value::Text)
        }
        Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(idx)?.map(Value::Bytes),
        _ => return Err(DriverError::UnsupportedType(ty.name().to_string())),
    };

    Ok(value.unwrap_or(Value::Null))
}

fn decode_rows(rows: &[Row]) -> DriverResult<ResultSet> {
    let mut result = ResultSet::default();
    if let Some(first) = rows.first() {
        result.columns = first
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
    }

    for row in rows {
        let values = row
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, column)| decode_column(row, idx, column.type_()))
            .collect::<DriverResult<Vec<_>>>()?;
        result.rows.push(values);
    }
    result.rows_affected = rows.len() as u64;

    Ok(result)
}

/// Text protocol results, every non null value comes back as `Value::Text`.
fn collect_simple(messages: Vec<SimpleQueryMessage>) -> ResultSet {
    let mut result = ResultSet::default();
    for message in messages {
        match message {
            SimpleQueryMessage::Row(row) => {
                if result.columns.is_empty() {
                    result.columns = row
                        .columns()
                        .iter()
                        .map(|c| c.name().to_string())
                        .collect();
                }
                let values = (0..row.len())
                    .map(|idx| match row.get(idx) {
                        Some(v) => Value::Text(v.to_string()),
                        None => Value::Null,
                    })
                    .collect();
                result.rows.push(values);
            }
            SimpleQueryMessage::CommandComplete(rows) => result.rows_affected = rows,
            _ => {}
        }
    }

    result
}

pub struct PgDriver;

#[rocket::async_trait]
impl Driver for PgDriver {
    async fn connect(&self, params: &ConnectionParams) -> DriverResult<Box<dyn DriverConnection>> {
        let client = connect_postgres(&params.url)
            .await
            .map_err(|e| DriverError::Connection(e.to_string()))?;
        let connection = PgConnection {
            client: Arc::new(client),
        };

        if let Some(application_name) = &params.application_name {
            let sql = format!(
                "SET application_name = {}",
                connection.quote(application_name)
            );
            connection.client.batch_execute(&sql).await?;
        }

        Ok(Box::new(connection))
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

pub struct PgConnection {
    client: Arc<Client>,
}

#[rocket::async_trait]
impl DriverConnection for PgConnection {
    async fn prepare(&self, sql: &str) -> DriverResult<Box<dyn DriverStatement>> {
        let statement = self.client.prepare(sql).await?;
        Ok(Box::new(PgStatement {
            client: self.client.clone(),
            bound: vec![None; statement.params().len()],
            statement,
            sql: sql.to_string(),
        }))
    }

    async fn query(&self, sql: &str) -> DriverResult<ResultSet> {
        let messages = self.client.simple_query(sql).await?;
        Ok(collect_simple(messages))
    }

    async fn exec(&self, sql: &str) -> DriverResult<u64> {
        Ok(self.client.execute(sql, &[]).await?)
    }

    async fn begin_transaction(&self) -> DriverResult<()> {
        Ok(self.client.batch_execute("BEGIN").await?)
    }

    async fn commit(&self) -> DriverResult<()> {
        Ok(self.client.batch_execute("COMMIT").await?)
    }

    async fn roll_back(&self) -> DriverResult<()> {
        Ok(self.client.batch_execute("ROLLBACK").await?)
    }

    fn quote(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    async fn last_insert_id(&self) -> DriverResult<Value> {
        let row = self.client.query_one("SELECT LASTVAL()", &[]).await?;
        Ok(Value::Int(row.try_get(0)?))
    }

    async fn server_version(&self) -> DriverResult<Option<String>> {
        let messages = self.client.simple_query("SHOW server_version").await?;
        Ok(collect_simple(messages)
            .first_value()
            .and_then(|v| match v {
                Value::Text(version) => Some(version.clone()),
                _ => None,
            }))
    }

    fn native_connection(&self) -> &(dyn Any + Send + Sync) {
        self.client.as_ref()
    }
}

pub struct PgStatement {
    client: Arc<Client>,
    statement: Statement,
    bound: Vec<Option<Value>>,
    sql: String,
}

#[rocket::async_trait]
impl DriverStatement for PgStatement {
    fn bind_value(&mut self, position: usize, value: Value) {
        let Some(idx) = position.checked_sub(1) else {
            return;
        };
        if idx >= self.bound.len() {
            self.bound.resize(idx + 1, None);
        }
        self.bound[idx] = Some(value);
    }

    async fn execute(&mut self, params: Option<&[Value]>) -> DriverResult<ResultSet> {
        let values: Vec<Value> = match params {
            Some(params) => params.to_vec(),
            None => self
                .bound
                .iter()
                .map(|v| v.clone().unwrap_or(Value::Null))
                .collect(),
        };
        let args = values
            .iter()
            .map(|v| v as &(dyn ToSql + Sync))
            .collect::<Vec<_>>();

        if self.statement.columns().is_empty() {
            let affected = self.client.execute(&self.statement, &args).await?;
            return Ok(ResultSet::affected(affected));
        }

        let rows = self.client.query(&self.statement, &args).await?;
        decode_rows(&rows)
    }

    fn sql(&self) -> &str {
        &self.sql
    }
}
