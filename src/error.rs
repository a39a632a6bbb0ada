use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Incident queue is full (capacity {0}), incident dropped")]
    QueueFull(usize),

    #[error("Unknown incident kind: {0}")]
    UnknownIncidentKind(String),

    #[error("Coordinates ({x}, {y}) are outside the {width}x{height} map")]
    OutOfBounds {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    },

    #[error("Malformed request: {0}")]
    MalformedRequest(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while loading the unit-type and incident-kind catalogs.
///
/// Every parse error carries the file and 1-based line number so operators
/// can fix the offending entry directly.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{file}:{line}: malformed entry ({reason})")]
    Malformed {
        file: String,
        line: usize,
        reason: String,
    },

    #[error("{file}:{line}: unit type '{name}' must have a positive speed, got {speed}")]
    InvalidSpeed {
        file: String,
        line: usize,
        name: String,
        speed: i64,
    },

    #[error("{file}:{line}: requirement references unknown unit type '{name}'")]
    UnknownUnitType {
        file: String,
        line: usize,
        name: String,
    },

    #[error("{file}:{line}: duplicate entry '{name}'")]
    Duplicate {
        file: String,
        line: usize,
        name: String,
    },

    #[error("{file}:{line}: incident kind '{name}' has no requirements")]
    EmptyRequirements {
        file: String,
        line: usize,
        name: String,
    },

    #[error("Map bounds must be positive, got {width}x{height}")]
    InvalidBounds { width: i32, height: i32 },
}

pub type Result<T> = std::result::Result<T, DispatchError>;
