use std::io::Cursor;

use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::{Request, Response};

pub type Result<T> = std::result::Result<T, Error>;
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug)]
pub struct Error(pub anyhow::Error);

#[derive(Debug)]
pub struct ApiError {
    pub error: anyhow::Error,
    pub status: Status,
}

impl<E> From<E> for Error
where
    E: Into<anyhow::Error>,
{
    fn from(error: E) -> Self {
        Error(error.into())
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self {
            error: error.0,
            status: Status::InternalServerError,
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(error: E) -> Self {
        Self {
            error: error.into(),
            status: Status::InternalServerError,
        }
    }
}

pub trait WithStatus<T> {
    fn status(self, status: Status) -> ApiResult<T>;
}

impl<T> WithStatus<T> for Result<T> {
    fn status(self, status: Status) -> ApiResult<T> {
        self.map_err(|error| ApiError {
            error: error.0,
            status,
        })
    }
}

pub trait WithContext<T> {
    fn context(self, context: &'static str) -> Self;
}

impl<T> WithContext<T> for Result<T> {
    fn context(self, context: &'static str) -> Self {
        Ok(anyhow::Context::context(self.map_err(|s| s.0), context)?)
    }
}

impl<T> WithContext<T> for ApiResult<T> {
    fn context(self, context: &'static str) -> Self {
        self.map_err(|s| ApiError {
            error: s.error.context(context),
            status: s.status,
        })
    }
}

fn plain_text(status: Status, body: String) -> response::Result<'static> {
    Response::build()
        .status(status)
        .sized_body(body.len(), Cursor::new(body))
        .ok()
}

impl Responder<'_, 'static> for Error {
    fn respond_to(self, _: &Request<'_>) -> response::Result<'static> {
        tracing::error!(error = ?self.0, "Request failed");
        plain_text(Status::InternalServerError, self.0.to_string())
    }
}

impl Responder<'_, 'static> for ApiError {
    fn respond_to(self, _: &Request<'_>) -> response::Result<'static> {
        if self.status.code >= 500 {
            tracing::error!(error = ?self.error, status = self.status.code, "Request failed");
        }
        plain_text(self.status, self.error.to_string())
    }
}
