use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Key provisioning error: {0}")]
    KeyProvisioning(String),

    #[error("Policy error: {0}")]
    Policy(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Step execution error: {0}")]
    StepExecution(String),

    #[error("Refusing to overwrite existing path: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("Tier identifier collision: {0}")]
    TierCollision(String),

    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<openssl::error::ErrorStack> for Error {
    fn from(err: openssl::error::ErrorStack) -> Self {
        Error::Signing(err.to_string())
    }
}
