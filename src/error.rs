use thiserror::Error;

// ======================================================
// ERROR TYPE
// ======================================================

/// Errors raised by the report pipeline. The binary edges (CLI, HTTP
/// dispatcher) wrap these in `anyhow`.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid date range: {0}")]
    DateRange(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path:   String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Spreadsheet error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ReportError {
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        ReportError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReportError>;
