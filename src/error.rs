//! Error handling


use std::fmt::Display;
use std::io;
use std::result;

use actix_web::{HttpResponse, ResponseError};
use actix_web::http::StatusCode;
use derive_more::{Display, From};
use diesel::r2d2::PoolError;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use log::error;
use serde::Serialize;


/// Error type used throughout porchwatch
#[derive(Debug, Display, From)]
pub enum Error {

    /// Error with an explicit HTTP status and client-facing message
    #[display(fmt = "{}", _1)]
    #[from(ignore)]
    Web(StatusCode, String),

    #[display(fmt = "invalid value for {}: {}", _0, _1)]
    #[from(ignore)]
    Config(String, String),

    #[display(fmt = "database error: {}", _0)]
    Db(DieselError),

    #[display(fmt = "migration error: {}", _0)]
    #[from(ignore)]
    Migration(String),

    #[display(fmt = "hashing error: {}", _0)]
    #[from(ignore)]
    Hash(String),

    Http(reqwest::Error),
    Io(io::Error),
    Json(serde_json::Error),
    Mqtt(rumqttc::ClientError),
    Pool(PoolError),
}

impl Error {

    /// Returns a closure that wraps any displayable error with the given status
    ///
    /// Useful with `map_err` when a lower-level failure should surface to the
    /// client as something other than a 500.
    pub fn with_status<E>(status: StatusCode) -> impl Fn(E) -> Error
    where E: Display
    {
        move |err| Error::Web(status, err.to_string())
    }

    /// Shorthand for a 400 with the given message
    pub fn bad_request<S: Into<String>>(msg: S) -> Error {
        Error::Web(StatusCode::BAD_REQUEST, msg.into())
    }
}

impl From<(StatusCode, &str)> for Error {
    fn from(err: (StatusCode, &str)) -> Self {
        Error::Web(err.0, err.1.to_owned())
    }
}

impl From<(StatusCode, String)> for Error {
    fn from(err: (StatusCode, String)) -> Self {
        Error::Web(err.0, err.1)
    }
}

impl From<argon2::password_hash::Error> for Error {
    fn from(err: argon2::password_hash::Error) -> Self {
        Error::Hash(err.to_string())
    }
}


/// Body of every error response
#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl ResponseError for Error {

    fn status_code(&self) -> StatusCode {
        match self {
            Error::Web(status, _) => *status,
            Error::Db(DieselError::NotFound) => StatusCode::NOT_FOUND,
            Error::Db(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) =>
                StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {

        let status = self.status_code();
        let msg = match self {
            Error::Web(_, msg) => msg.clone(),
            Error::Db(DieselError::NotFound) => String::from("resource not found"),
            Error::Db(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) =>
                String::from("resource already exists"),
            _ => {
                error!("internal error: {}", self);
                String::from("internal server error")
            },
        };

        HttpResponse::build(status)
            .json(ErrorBody { error: &msg })
    }
}


/// Result type used throughout porchwatch
pub type Result<T> = result::Result<T, Error>;
