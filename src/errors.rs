//! Domain error types shared across the fusion pipeline.
//!
//! Validation and precondition failures are represented as concrete
//! [`thiserror`] variants so callers can match on them; `main` and the
//! transport adapter wrap these in `anyhow::Result` at the boundary.

use thiserror::Error;

/// Failure modes for [`crate::mapmodel::validate_for_calibration`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MapValidationError {
    #[error("map is absent")]
    NilMap,
    #[error("map has no drawable content")]
    NoDrawablePixels,
    #[error("map has no robot_position entity with at least 2 points")]
    NoRobotPosition,
    #[error("map has no charger_location entity with at least 2 points")]
    NoChargerLocation,
}

/// Errors surfaced from the calibration store and `calibrateAll`.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("reference vacuum {0:?} not present in supplied maps")]
    ReferenceNotFound(String),
    #[error("map validation failed: {0}")]
    InvalidMap(#[from] MapValidationError),
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Errors surfaced from [`crate::tracker::StateTracker::update_unified_map`].
#[derive(Debug, Error)]
pub enum UnificationError {
    #[error("calibration data is absent")]
    NilCalibration,
    #[error("no robot maps are present")]
    NoMaps,
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Errors from decoding a raw map payload (external-collaborator boundary).
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is empty")]
    EmptyPayload,
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("zlib decompression failed: {0}")]
    Zlib(#[source] std::io::Error),
    #[error("malformed PNG chunk structure")]
    MalformedPng,
    #[error("PNG has no zTXt chunk")]
    MissingZtxtChunk,
    #[error("unrecognized payload encoding")]
    UnknownEncoding,
}

/// Errors from loading/saving on-disk JSON caches.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt JSON at {path}: {source}")]
    CorruptJson {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from the external map fetcher. Retryable vs. terminal is decided
/// by the fetcher implementation, not by the core.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("fetch was cancelled")]
    Cancelled,
    #[error("server error (status {0})")]
    ServerError(u16),
    #[error("client error (status {0})")]
    ClientError(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("response parsing failed: {0}")]
    Parse(#[from] DecodeError),
}

impl FetchError {
    /// Whether the calibration controller's retry loop should try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Timeout | FetchError::ServerError(_))
    }
}
