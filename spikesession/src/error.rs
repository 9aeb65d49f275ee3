//! Error types for session access

use std::fmt;
use std::io;
use std::path::PathBuf;

use spikecore::algorithm::matching::MatchError;
use spikecore::data::events::ShapeError;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug)]
pub enum SessionError {
    /// Filesystem error
    Io(io::Error),

    /// `realtime512.yaml` is absent
    MissingConfig(PathBuf),

    /// Config file exists but does not parse
    Config(String),

    /// A required directory (e.g. `raw/`) is absent
    MissingDirectory(PathBuf),

    /// Coarse sorting output is absent for a recording
    MissingSorting(String),

    /// Malformed `.npy` file
    Npy { path: PathBuf, msg: String },

    /// JSON (de)serialization failure
    Json(serde_json::Error),

    /// Arrays of a sorting disagree in shape
    Shape(ShapeError),

    /// Unit matching rejected its inputs
    Match(MatchError),

    /// No focus unit with this id
    FocusUnitNotFound(String),

    /// Caller-supplied argument is unusable
    InvalidInput(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Io(e) => write!(f, "I/O error: {}", e),
            SessionError::MissingConfig(p) => write!(f, "Configuration file not found: {}", p.display()),
            SessionError::Config(msg) => write!(f, "Invalid configuration: {}", msg),
            SessionError::MissingDirectory(p) => write!(f, "Directory not found: {}", p.display()),
            SessionError::MissingSorting(bin) => write!(f, "File {} does not have coarse sorting", bin),
            SessionError::Npy { path, msg } => write!(f, "Malformed npy file {}: {}", path.display(), msg),
            SessionError::Json(e) => write!(f, "JSON error: {}", e),
            SessionError::Shape(e) => write!(f, "Shape error: {}", e),
            SessionError::Match(e) => write!(f, "Matching error: {}", e),
            SessionError::FocusUnitNotFound(id) => write!(f, "Focus unit {} not found", id),
            SessionError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Io(e) => Some(e),
            SessionError::Json(e) => Some(e),
            SessionError::Shape(e) => Some(e),
            SessionError::Match(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SessionError {
    fn from(e: io::Error) -> Self {
        SessionError::Io(e)
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        SessionError::Json(e)
    }
}

impl From<serde_yaml::Error> for SessionError {
    fn from(e: serde_yaml::Error) -> Self {
        SessionError::Config(e.to_string())
    }
}

impl From<ShapeError> for SessionError {
    fn from(e: ShapeError) -> Self {
        SessionError::Shape(e)
    }
}

impl From<MatchError> for SessionError {
    fn from(e: MatchError) -> Self {
        SessionError::Match(e)
    }
}
