use std::collections::HashMap;

use thiserror::Error;

/// Error types for the zarcfit crate.
///
/// Model and store errors are contract violations (a valid configuration
/// never produces them); fit errors are expected operational outcomes and
/// leave the parameter store untouched.
#[derive(Error, Debug)]
pub enum ZarcError {
    /// A parameter required by the selected circuit variant is missing or
    /// outside its numeric domain.
    #[error("Invalid parameter set: {0}")]
    InvalidParameterSet(String),

    /// The solver exhausted its iteration budget, produced non-finite
    /// residuals, or was cancelled. Carries the last iterate for
    /// diagnostic display; the store is never updated on this path.
    #[error("Fit did not converge: {message}")]
    FitDidNotConverge {
        message: String,
        last_iterate: HashMap<String, f64>,
    },

    /// A fit was requested while another one is in flight.
    #[error("A fit is already running")]
    FitAlreadyRunning,

    /// Recovery lookup found no stored row for the sample.
    #[error("No stored row matches sample '{0}'")]
    NoMatchingSample(String),

    /// Error indicating a mismatch in vector dimensions.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Error for boundary constraint violations.
    #[error("Bounds error: {0}")]
    BoundsError(String),

    /// Invalid startup configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O error wrapper.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Generic error for cases that don't fit the other categories.
    #[error("Error: {0}")]
    Other(String),
}

impl From<crate::parameters::bounds::BoundsError> for ZarcError {
    fn from(err: crate::parameters::bounds::BoundsError) -> Self {
        ZarcError::BoundsError(format!("{}", err))
    }
}

/// Result type alias for zarcfit operations.
pub type Result<T> = std::result::Result<T, ZarcError>;

impl From<String> for ZarcError {
    fn from(s: String) -> Self {
        ZarcError::Other(s)
    }
}

impl From<&str> for ZarcError {
    fn from(s: &str) -> Self {
        ZarcError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ZarcError::InvalidParameterSet("missing 'Rh'".to_string());
        assert!(format!("{}", err).contains("missing 'Rh'"));

        let err = ZarcError::FitDidNotConverge {
            message: "exceeded max iterations".to_string(),
            last_iterate: HashMap::new(),
        };
        assert!(format!("{}", err).contains("exceeded max iterations"));
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ZarcError = io_err.into();

        match err {
            ZarcError::IoError(_) => (),
            _ => panic!("Expected IoError variant"),
        }

        let str_err: ZarcError = "test error".into();
        match str_err {
            ZarcError::Other(s) => assert_eq!(s, "test error"),
            _ => panic!("Expected Other variant"),
        }
    }
}
