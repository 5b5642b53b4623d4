use std::fmt;
use thiserror::Error;

/// Machine-readable codes reported when an uploaded file cannot be parsed.
///
/// These travel across the worker boundary as strings, so the serialized
/// form is part of the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParseErrorCode {
    MissingCoreFiles,
    InvalidArchive,
    MultipleLayers,
    ArchiveTooLarge,
    InvalidShapefile,
    InvalidKml,
    UnsupportedGeometry,
}

impl ParseErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseErrorCode::MissingCoreFiles => "MISSING_CORE_FILES",
            ParseErrorCode::InvalidArchive => "INVALID_ARCHIVE",
            ParseErrorCode::MultipleLayers => "MULTIPLE_LAYERS",
            ParseErrorCode::ArchiveTooLarge => "ARCHIVE_TOO_LARGE",
            ParseErrorCode::InvalidShapefile => "INVALID_SHAPEFILE",
            ParseErrorCode::InvalidKml => "INVALID_KML",
            ParseErrorCode::UnsupportedGeometry => "UNSUPPORTED_GEOMETRY",
        }
    }
}

impl fmt::Display for ParseErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum SiteGeoError {
    #[error("Invalid coordinate entry: {entry}")]
    InvalidCoordinateEntry { entry: String },

    #[error("Missing coordinates: {reason}")]
    MissingCoordinates { reason: String },

    #[error("Missing circle radius for single-point site")]
    MissingRadius,

    #[error("Invalid circle radius: {value}")]
    InvalidRadius { value: String },

    #[error("Unsupported reference system: {system}")]
    UnsupportedReferenceSystem { system: String },

    #[error("Invalid coordinate value for {field}: {value} ({reason})")]
    InvalidCoordinateValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Invalid storage key '{key}': {reason}")]
    InvalidStorageKey { key: String, reason: String },

    #[error("Unsupported file format: {format}")]
    UnsupportedFileFormat { format: String },

    #[error("Uploaded file is {size} bytes, limit is {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Could not parse uploaded file ({code}): {message}")]
    ParseFailed {
        code: ParseErrorCode,
        message: String,
    },

    #[error("Parse job {job_id} timed out after {timeout_ms} ms")]
    ParseTimeout { job_id: u64, timeout_ms: u64 },

    #[error("Parse job {job_id} exceeded memory ceiling of {limit} bytes")]
    MemoryLimitExceeded { job_id: u64, limit: u64 },

    #[error("Parse worker for job {job_id} failed: {message}")]
    WorkerCrashed { job_id: u64, message: String },

    #[error("Invalid GeoJSON: {reason}")]
    InvalidGeoJson { reason: String },

    #[error("Payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("Cannot buffer geometry: {reason}")]
    BufferFailed { reason: String },

    #[error("Storage error: {message}")]
    StorageError { message: String },

    #[error("Illegal parse job transition {from} -> {to}")]
    InvalidJobTransition { from: String, to: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("GeoJSON error: {0}")]
    GeoJsonError(#[from] geojson::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid configuration value for {field}: {value} ({reason})")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },
}

/// Whether a failure is the caller's fault or ours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    BadRequest,
    Internal,
}

impl SiteGeoError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SiteGeoError::InvalidCoordinateEntry { .. }
            | SiteGeoError::MissingCoordinates { .. }
            | SiteGeoError::MissingRadius
            | SiteGeoError::InvalidRadius { .. }
            | SiteGeoError::UnsupportedReferenceSystem { .. }
            | SiteGeoError::InvalidCoordinateValue { .. }
            | SiteGeoError::InvalidStorageKey { .. }
            | SiteGeoError::UnsupportedFileFormat { .. }
            | SiteGeoError::FileTooLarge { .. }
            | SiteGeoError::ParseFailed { .. } => ErrorCategory::BadRequest,
            _ => ErrorCategory::Internal,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.category() == ErrorCategory::BadRequest
    }

    /// Stable machine-readable code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            SiteGeoError::InvalidCoordinateEntry { .. } => "INVALID_COORDINATE_ENTRY",
            SiteGeoError::MissingCoordinates { .. } => "MISSING_COORDINATES",
            SiteGeoError::MissingRadius => "MISSING_RADIUS",
            SiteGeoError::InvalidRadius { .. } => "INVALID_RADIUS",
            SiteGeoError::UnsupportedReferenceSystem { .. } => "UNSUPPORTED_REFERENCE_SYSTEM",
            SiteGeoError::InvalidCoordinateValue { .. } => "INVALID_COORDINATE_VALUE",
            SiteGeoError::InvalidStorageKey { .. } => "INVALID_STORAGE_KEY",
            SiteGeoError::UnsupportedFileFormat { .. } => "UNSUPPORTED_FILE_FORMAT",
            SiteGeoError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            SiteGeoError::ParseFailed { code, .. } => code.as_str(),
            SiteGeoError::ParseTimeout { .. } => "PARSE_TIMEOUT",
            SiteGeoError::MemoryLimitExceeded { .. } => "PARSE_MEMORY_LIMIT",
            SiteGeoError::WorkerCrashed { .. } => "WORKER_CRASHED",
            SiteGeoError::InvalidGeoJson { .. } => "INVALID_GEOJSON",
            SiteGeoError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            SiteGeoError::BufferFailed { .. } => "BUFFER_FAILED",
            SiteGeoError::StorageError { .. } | SiteGeoError::IoError(_) => "STORAGE_ERROR",
            SiteGeoError::InvalidJobTransition { .. } => "INVALID_JOB_TRANSITION",
            SiteGeoError::SerializationError(_) | SiteGeoError::GeoJsonError(_) => {
                "SERIALIZATION_ERROR"
            }
            SiteGeoError::ConfigError { .. }
            | SiteGeoError::InvalidConfigValueError { .. } => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SiteGeoError>;
