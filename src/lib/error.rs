use std::io;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrackError>;

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("no tracks have been ingested yet")]
    NoTracks,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("delivery error: {0}")]
    Delivery(String),
}

impl TrackError {
    /// Stable machine-readable discriminator carried in every error body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::MalformedInput(_) => "malformed_input",
            Self::NotFound(_) => "not_found",
            Self::NoTracks => "no_tracks",
            Self::Storage(_) => "storage",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Delivery(_) => "delivery",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            // Unknown ids answer 400 like malformed input; clients tell them
            // apart through `code`.
            Self::MalformedInput(_) | Self::NotFound(_) | Self::NoTracks => {
                StatusCode::BAD_REQUEST
            }
            Self::Delivery(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) | Self::Storage(_) | Self::Io(_) | Self::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<toml::de::Error> for TrackError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for TrackError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for TrackError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rocksdb::Error> for TrackError {
    fn from(err: rocksdb::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
    code: &'a str,
}

impl IntoResponse for TrackError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        let body = ErrorBody {
            message: &message,
            code: self.code(),
        };
        (status, Json(body)).into_response()
    }
}
