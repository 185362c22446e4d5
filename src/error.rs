use thiserror::Error;

pub type FieldResult<T> = Result<T, FieldError>;

#[derive(Error, Debug)]
pub enum FieldError {
    #[error("Cannot reshape layer {layer} nest {inest}: {reason}")]
    Shape {
        layer: usize,
        inest: usize,
        reason: String,
    },

    #[error("Dimension error: {reason}")]
    Dimension { reason: String },

    #[error("Length mismatch: {what} (expected={expected}, found={found})")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Field `{field}` not found in stream")]
    UnknownField { field: String },

    #[error("Field `{field}` has no loaded timestep, load it first")]
    NotLoaded { field: String },

    #[error("Configuration error: {reason}")]
    Config { reason: String },

    #[error("No active cell at x={x}, y={y}, layer={layer}")]
    NoCell { x: f64, y: f64, layer: usize },

    #[error("Malformed stream record at byte {byte}: {reason}")]
    Parse { byte: u64, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FieldError {
    pub(crate) fn shape(layer: usize, inest: usize, reason: impl Into<String>) -> Self {
        FieldError::Shape {
            layer,
            inest,
            reason: reason.into(),
        }
    }

    pub(crate) fn dimension(reason: impl Into<String>) -> Self {
        FieldError::Dimension {
            reason: reason.into(),
        }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        FieldError::Config {
            reason: reason.into(),
        }
    }
}
