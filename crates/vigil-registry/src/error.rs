//! Registry load errors.
//!
//! Every variant is fatal to a run: no report is produced from a catalog that
//! failed to load.

use std::path::PathBuf;

use crate::loader::ControlOrigin;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("control source '{reference}' not found. {suggestion}")]
    NotFound {
        reference: String,
        suggestion: String,
    },

    #[error("failed to read control source '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {origin}: {message}")]
    Parse { origin: String, message: String },

    #[error("{origin}: missing required field '{field}'")]
    MissingField {
        origin: ControlOrigin,
        field: &'static str,
    },

    #[error("{origin}: field '{field}' must not be empty")]
    EmptyField {
        origin: ControlOrigin,
        field: &'static str,
    },

    #[error("control '{id}' ({origin}) has invalid check: {reason}")]
    InvalidCheck {
        id: String,
        origin: ControlOrigin,
        reason: String,
    },

    #[error("duplicate control id '{id}': defined in {first} and {second}")]
    DuplicateControlId {
        id: String,
        first: ControlOrigin,
        second: ControlOrigin,
    },

    #[error("invalid selection pattern '{pattern}': {message}")]
    InvalidSelection { pattern: String, message: String },
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
