use crate::error::FieldResult;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Sentinels marking a cell as outside the active computational domain.
pub const DEFAULT_MASKED_VALUES: [f64; 3] = [-9999.0, 0.0, 9999.0];

// Process-wide settings, loaded once and passed down explicitly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
    /// Values treated as masked when masking against the domain reference.
    pub masked_values: Vec<f64>,
    /// Values replaced by NaN when extracting time series.
    pub series_masked_values: Vec<f64>,
    /// Name of the field acting as active-cell reference, compared case-insensitively.
    pub reference_field: String,
}

impl FieldConfig {
    pub fn new() -> Self {
        FieldConfig {
            masked_values: DEFAULT_MASKED_VALUES.to_vec(),
            series_masked_values: vec![-9999.0, 9999.0],
            reference_field: "imask".to_string(),
        }
    }

    pub fn from_json_file(path: &Path) -> FieldResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn is_reference(&self, field: &str) -> bool {
        field.eq_ignore_ascii_case(&self.reference_field)
    }
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self::new()
    }
}

// Row keying of an extracted time series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Istep,
    Date,
    Combined,
}

pub(crate) fn is_masked(value: f64, masked_values: &[f64]) -> bool {
    masked_values.iter().any(|m| *m == value)
}
