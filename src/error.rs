use std::path::PathBuf;

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("invalid object key: {0}")]
    InvalidObjectKey(String),

    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("object already exists: {bucket}/{key}")]
    ObjectExists { bucket: String, key: String },

    #[error("malformed payload: {0}")]
    #[diagnostic(help("the object must decode as a JSON array of production records"))]
    MalformedPayload(String),

    #[error("upstream request failed: {0}")]
    UpstreamHttp(String),

    #[error("upstream returned status {status}: {message}")]
    UpstreamStatus { status: u16, message: String },

    #[error("duplicate check failed: {0}")]
    DuplicateCheckFailed(String),

    #[error("destination table error: {0}")]
    Table(String),

    #[error("mail delivery failed: {0}")]
    Mail(String),
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        PipelineError::Table(err.to_string())
    }
}

/// Why a single raw record was not turned into a row.
///
/// Rejections are collected into the load report; they never abort a run.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RejectionReason {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("missing field `{0}`")]
    MissingField(String),

    #[error("field `{field}` has an invalid value: {value}")]
    InvalidField { field: String, value: String },

    #[error("unrecognized month name: {0}")]
    UnknownMonth(String),

    #[error("year out of range: {0}")]
    InvalidYear(String),

    #[error("tonnes must be a non-negative number, got {0}")]
    InvalidTonnes(String),
}
