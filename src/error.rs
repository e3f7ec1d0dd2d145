use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EntsoeError {
    #[error("http request error")]
    Http(#[from] reqwest::Error),
    #[error("api responded with status {status}: {body}")]
    Transport { status: StatusCode, body: String },
    #[error("no matching data found")]
    NoData,
    #[error("unsupported document: {0}")]
    Parse(#[from] ParseError),
    #[error("invalid time window: {start} is not before {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("time window boundary {instant} is not on a whole hour")]
    UnalignedWindow { instant: DateTime<Utc> },
    #[error("security token must not be empty")]
    InvalidToken,
}

/// Reasons a price document is rejected. Any of these aborts the whole parse.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("malformed xml")]
    Xml(#[from] roxmltree::Error),
    #[error("unknown field: {path}")]
    MissingField { path: &'static str },
    #[error("unexpected value: {path} = {value}")]
    UnexpectedValue { path: &'static str, value: String },
    #[error("invalid timestamp: {value}")]
    Timestamp { value: String },
    #[error("unrecognised resolution: {value}")]
    Resolution { value: String },
    #[error("unrecognised unit in resolution: {value}")]
    ResolutionUnit { value: String },
    #[error("point without {field}")]
    MissingPointField { field: &'static str },
    #[error("invalid point {field}: {value}")]
    InvalidPointField { field: &'static str, value: String },
    #[error("point position must be at least 1, got {position}")]
    InvalidPosition { position: i64 },
}
