use std::path::PathBuf;

use chrono::NaiveDate;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum RasffError {
    #[error("invalid reference id: {0:?}")]
    InvalidReference(String),

    #[error("reference list {path} is corrupt at line {line}: {value:?}")]
    CorruptReferenceList {
        path: String,
        line: usize,
        value: String,
    },

    #[error("no references available; run `rasff refs` first")]
    #[diagnostic(help("the reference list is written by the listing step"))]
    NoReferences,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("portal request failed: {0}")]
    PortalHttp(String),

    #[error("portal returned status {status}: {message}")]
    PortalStatus { status: u16, message: String },

    #[error("listing aborted at row offset {offset}: {reason}")]
    Pagination { offset: usize, reason: String },

    #[error("fetching notification {reference} failed: {message}")]
    Network { reference: String, message: String },

    #[error("no shards under {0}; run `rasff fetch` first")]
    NoShards(String),

    #[error("worker count must be at least 1")]
    InvalidWorkerCount,

    #[error("fetch worker {0} panicked")]
    WorkerPanicked(usize),

    #[error("malformed notification {reference}: field {field} has value {value:?}")]
    MalformedRecord {
        reference: String,
        field: &'static str,
        value: String,
    },

    #[error("failed to parse XML corpus: {0}")]
    Xml(String),

    #[error("invalid interval: {start} is after {end}")]
    InvalidInterval { start: NaiveDate, end: NaiveDate },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
