//! Error types for scenario loading and validation

use std::path::PathBuf;
use thiserror::Error;
use validator::ValidationErrors;

/// Unified configuration error type.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Scenario file not found.
    #[error("scenario file not found: {0}")]
    FileNotFound(PathBuf),

    /// Field-level validation failure.
    #[error("invalid scenario:\n{}", format_validation_errors(.0))]
    Validation(#[source] ValidationErrors),

    /// Cross-field semantic failure (missing ports, duplicate links, ...).
    #[error("invalid scenario:\n{}", .0.iter().map(|e| format!("  - {e}")).collect::<Vec<_>>().join("\n"))]
    Semantic(Vec<String>),

    /// Figment parsing error.
    #[error("scenario parsing error: {0}")]
    Parsing(#[from] figment::Error),

    /// I/O error.
    #[error("scenario I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_validation_errors(errors: &ValidationErrors) -> String {
    use std::fmt::Write;

    let mut output = String::new();
    for (field, errors) in errors.field_errors() {
        let _ = writeln!(output, "Field '{}':", field);
        for error in errors {
            let message = match &error.message {
                Some(msg) => msg.to_string(),
                None => error.code.to_string(),
            };
            let _ = writeln!(output, "  - {}", message);
        }
    }
    output
}

impl From<ValidationErrors> for ConfigError {
    fn from(errors: ValidationErrors) -> Self {
        ConfigError::Validation(errors)
    }
}
