use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProcessingError>;

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Date parsing error: {0}")]
    DateParse(#[from] chrono::ParseError),

    #[error("Parquet write error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration load error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Invalid quality flag: {0}")]
    InvalidQualityFlag(f64),

    #[error("Missing required data: {0}")]
    MissingData(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported unit conversion from '{from}' to '{to}'")]
    UnsupportedUnitConversion { from: String, to: String },

    #[error("{variable}: {count} values outside valid range [{min}, {max}]")]
    OutOfRangeValue {
        variable: String,
        count: usize,
        min: f64,
        max: f64,
    },

    #[error("Essential meteorological variable {variable} dropped: {reason}")]
    EssentialVariableDropped { variable: String, reason: String },

    #[error("Evaluation variable {variable} dropped: {reason}")]
    EvaluationVariableDropped { variable: String, reason: String },

    #[error("No auxiliary reanalysis file found for site(s): {}", .sites.join(", "))]
    MissingAuxiliarySource { sites: Vec<String> },

    #[error("Inconsistent time step at site {site}: {details}")]
    InconsistentTimeStep { site: String, details: String },

    #[error("Site {site} has {found} contiguous acceptable year(s), {required} required")]
    InsufficientContiguousYears {
        site: String,
        found: usize,
        required: u32,
    },

    #[error("{variable} has {actual} steps, time axis has {expected}")]
    SequenceLengthMismatch {
        variable: String,
        expected: usize,
        actual: usize,
    },

    #[error("Async task error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}
