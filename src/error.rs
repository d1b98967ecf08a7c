// src/error.rs
use thiserror::Error;

/// Errors surfaced by the chain and bundler capabilities.
#[derive(Error, Debug)]
pub enum AccessError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rejected ({code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("Malformed response: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Account unavailable: {0}")]
    AccountUnavailable(String),

    #[error("Gas estimation unavailable: {0}")]
    EstimationUnavailable(String),

    #[error("Bundler rejected operation: {0}")]
    SubmissionRejected(String),

    #[error("Submission failed: {cause}")]
    SubmissionFailed { cause: String },

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Ethereum provider error: {0}")]
    Provider(#[from] AccessError),
}

impl LifecycleError {
    /// JSON-RPC error code reported to RPC callers.
    pub fn rpc_code(&self) -> i32 {
        match self {
            LifecycleError::InvalidInput(_) => -32602,
            _ => -32000,
        }
    }
}
