use crate::dbal::driver::{DriverResult, DriverStatement, ResultSet, Value};
use crate::dbal::middleware::TimerSource;
use crate::dbal::timer::IdSequence;

/// Times every `execute` of one prepared statement; everything else is
/// forwarded untouched.
pub struct InterceptingStatement {
    inner: Box<dyn DriverStatement>,
    timer: TimerSource,
    ids: IdSequence,
}

impl InterceptingStatement {
    pub fn new(inner: Box<dyn DriverStatement>, timer: TimerSource) -> Self {
        Self {
            inner,
            timer,
            ids: IdSequence::new("stmt"),
        }
    }
}

#[rocket::async_trait]
impl DriverStatement for InterceptingStatement {
    fn bind_value(&mut self, position: usize, value: Value) {
        self.inner.bind_value(position, value)
    }

    async fn execute(&mut self, params: Option<&[Value]>) -> DriverResult<ResultSet> {
        let span = self.timer.resolve().span(self.ids.next_id());
        let result = self.inner.execute(params).await;
        span.finish();

        result
    }

    fn sql(&self) -> &str {
        self.inner.sql()
    }
}
