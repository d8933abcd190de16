use rocket::http::Method;
use rocket::route::{Handler, Outcome};
use rocket::{Data, Request, Route};
use rocket_prometheus::PrometheusMetrics;

/// Serves the prometheus registry. The route is named `metrics` so it can be
/// left out of route tracking by name.
#[derive(Clone)]
pub struct MetricsRoute(pub PrometheusMetrics);

#[rocket::async_trait]
impl Handler for MetricsRoute {
    async fn handle<'r>(&self, req: &'r Request<'_>, data: Data<'r>) -> Outcome<'r> {
        self.0.handle(req, data).await
    }
}

impl From<MetricsRoute> for Vec<Route> {
    fn from(val: MetricsRoute) -> Self {
        let mut route = Route::new(Method::Get, "/", val);
        route.name = Some("metrics".into());
        vec![route]
    }
}
