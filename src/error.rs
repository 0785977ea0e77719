use std::fmt;

/// Errors surfaced across the component boundaries (device, store, config).
///
/// Per-sample DSP code never returns this — it has no fallible paths once
/// constructed — so this enum only appears at construction time and at the
/// edges where the process talks to the OS or the database.
#[derive(Debug)]
pub enum AppError {
    Io(std::io::Error),
    Database(String),
    Device(String),
    Config(String),
    LockPoisoned(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Io(err) => write!(f, "I/O error: {}", err),
            AppError::Database(msg) => write!(f, "database error: {}", msg),
            AppError::Device(msg) => write!(f, "audio device error: {}", msg),
            AppError::Config(msg) => write!(f, "configuration error: {}", msg),
            AppError::LockPoisoned(msg) => write!(f, "lock error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err)
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Database(err.to_string())
    }
}
