//! Error types for the KMIR driver

use std::path::PathBuf;
use thiserror::Error;

/// KMIR driver errors
#[derive(Error, Debug)]
pub enum Error {
    // Program DB errors
    /// The SMIR JSON document is missing a required key or has the wrong shape
    ///
    /// **Triggered by:** Loading a file that is not a Stable MIR JSON dump
    /// **Example:** a document without `items`, or `types` given as an object
    #[error("Malformed program DB: {reason}")]
    MalformedProgramDb {
        /// What was wrong with the document
        reason: String,
    },

    /// An entry symbol is not known to the program DB
    ///
    /// **Triggered by:** `reduce_to` or `prove-rs` with a `--start-symbol` that no
    /// `MonoItemFn` carries
    #[error("Unknown symbol: {name}")]
    UnknownSymbol {
        /// The symbol that was looked up
        name: String,
    },

    /// A type id is not present in the type table
    ///
    /// The argument generator recovers from this with an opaque value; the
    /// allocation decoder does not.
    #[error("Unknown type: {ty}")]
    UnknownType {
        /// The missing type id
        ty: i64,
    },

    /// Raw allocation bytes do not decode under the declared type
    ///
    /// **Recovery:** Local - the generated lookup rule carries an
    /// `UnableToDecode` marker instead of a value
    #[error("Unable to decode: {reason}")]
    DecodeFailure {
        /// Why decoding failed
        reason: String,
    },

    // Backend errors
    /// The backend compile driver failed; the target directory was not updated
    #[error("Backend compilation failed: {message}")]
    BackendCompileFailure {
        /// Captured compiler diagnostics
        message: String,
    },

    /// A single backend step failed
    ///
    /// **Recovery:** Local - the node being advanced is marked failing with
    /// the captured diagnostic
    #[error("Backend step failed: {message}")]
    BackendStepFailure {
        /// Captured backend diagnostic
        message: String,
    },

    /// A backend call exceeded its wall-clock budget
    #[error("SMT timeout after {0:?}")]
    SmtTimeout(std::time::Duration),

    // Environment errors
    /// The Rust-to-SMIR extractor could not be located
    #[error("stable_mir_json extractor not found (tried {})", display_paths(.tried))]
    ExtractorNotFound {
        /// Every candidate path that was checked
        tried: Vec<PathBuf>,
    },

    /// Proof data on disk is missing or inconsistent
    #[error("Proof data error at {}: {reason}", .path.display())]
    ProofData {
        /// Proof directory or file
        path: PathBuf,
        /// What was wrong
        reason: String,
    },

    /// Another process is advancing the same proof
    #[error("Proof {id} is locked by another writer")]
    ProofLocked {
        /// Proof identifier
        id: String,
    },

    /// An option value is out of range or inconsistent
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// Filesystem operation failed
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Error severity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Propagates up the call stack; never retried
    Fatal,
    /// Surfaced through the proof object as a failing node with a cause
    Local,
    /// Reported only
    Informational,
}

impl Error {
    /// Create a malformed-DB error with a message
    pub fn malformed(reason: impl Into<String>) -> Self {
        Error::MalformedProgramDb {
            reason: reason.into(),
        }
    }

    /// Create a decode failure with a message
    pub fn decode(reason: impl Into<String>) -> Self {
        Error::DecodeFailure {
            reason: reason.into(),
        }
    }

    /// Create a backend step failure with a message
    pub fn step(message: impl Into<String>) -> Self {
        Error::BackendStepFailure {
            message: message.into(),
        }
    }

    /// Create a backend compile failure with a message
    pub fn compile(message: impl Into<String>) -> Self {
        Error::BackendCompileFailure {
            message: message.into(),
        }
    }

    /// Wrap an I/O error with the path that caused it
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Classify error severity
    pub fn classify(&self) -> ErrorSeverity {
        match self {
            Error::BackendStepFailure { .. } => ErrorSeverity::Local,
            Error::SmtTimeout(_) => ErrorSeverity::Local,
            Error::DecodeFailure { .. } => ErrorSeverity::Local,
            _ => ErrorSeverity::Fatal,
        }
    }
}

/// Result type for KMIR operations
pub type Result<T> = std::result::Result<T, Error>;
