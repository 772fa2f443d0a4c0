//! Error types for the toolkit
//!
//! Every failure surfaced by the parser, the builder, the fee estimator, the
//! lifecycle driver and the funding orchestrator is a [`ToolkitError`]. Errors
//! carry the operation name and the identifiers (address, quantity, wallet,
//! file) needed to reproduce a failure without re-running the CLI by hand.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Ledger rejection produced when a treasury UTXO was consumed by a concurrent
/// transaction between our query and our submit.
static RE_VALUE_NOT_CONSERVED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ValueNotConservedUTxO\s*\(Value\s+0").expect("valid regex"));

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ToolkitError>;

/// Error taxonomy for all toolkit operations
#[derive(Error, Debug)]
pub enum ToolkitError {
    /// The external CLI exited with a nonzero status
    ///
    /// Holds the full command line and the combined stdout/stderr so the
    /// failure can be reproduced verbatim.
    #[error("exec failed: {command} -> {output}")]
    Process {
        command: String,
        output: String,
        status: Option<i32>,
    },

    /// The external CLI could not be started at all
    #[error("unable to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed JSON envelope, undecodable hex/CBOR, or unexpected CLI reply
    #[error("parse error: {0}")]
    Parse(String),

    /// Caller input rejected before any external invocation
    #[error("validation failed: {0}")]
    Validation(String),

    /// A computed remainder would go negative
    #[error("insufficient funds: {context} (available {available}, required {required})")]
    InsufficientFunds {
        context: String,
        available: String,
        required: String,
    },

    /// The transient ledger failure persisted through every retry attempt
    #[error("giving up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<ToolkitError>,
    },

    /// The caller cancelled while an operation was waiting
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Local filesystem failure (scratch files, wallet files, caches)
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Operation-level wrapper around a lower-level failure
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ToolkitError>,
    },
}

impl ToolkitError {
    /// Wrap this error with the name of the failing operation
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping operation wrappers
    pub fn root(&self) -> &ToolkitError {
        match self {
            Self::Context { source, .. } | Self::RetriesExhausted { source, .. } => source.root(),
            other => other,
        }
    }

    /// True when the ledger rejected the transaction with a zero-valued
    /// "value not conserved" failure.
    pub fn is_value_not_conserved(&self) -> bool {
        match self.root() {
            Self::Process { output, .. } => RE_VALUE_NOT_CONSERVED.is_match(output),
            _ => false,
        }
    }

    /// Check whether retrying the funding operation might succeed
    ///
    /// Only the "value not conserved" race qualifies. An exhausted retry
    /// sequence is never retried again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RetriesExhausted { .. } | Self::Cancelled(_) => false,
            _ => self.is_value_not_conserved(),
        }
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::Process { .. } => "process",
            Self::Spawn { .. } => "spawn",
            Self::Parse(_) => "parse",
            Self::Validation(_) => "validation",
            Self::InsufficientFunds { .. } => "funds",
            Self::RetriesExhausted { .. } => "transient",
            Self::Cancelled(_) => "cancelled",
            Self::Io { .. } => "io",
            Self::Context { source, .. } => source.category(),
        }
    }
}

// Convenience constructors for common error scenarios
impl ToolkitError {
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse(reason.into())
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn insufficient_funds(
        context: impl Into<String>,
        available: impl ToString,
        required: impl ToString,
    ) -> Self {
        Self::InsufficientFunds {
            context: context.into(),
            available: available.to_string(),
            required: required.to_string(),
        }
    }
}
