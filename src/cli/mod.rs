pub mod commands;
pub mod handlers;
use crate::error::Error;

// Re-export commonly used items
pub use commands::{EnvelopeChoice, GenerateArgs, HashAlgorithmChoice};
pub use handlers::handle_generate_command;

pub const CLI_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const CLI_NAME: &str = "supply-chain-stress";

pub fn format_error(error: &Error) -> String {
    match error {
        Error::Io(err) => format!("IO error: {err}"),
        Error::Configuration(msg) => format!("Configuration error: {msg}"),
        Error::KeyProvisioning(msg) => format!("Key provisioning error: {msg}"),
        Error::Policy(msg) => format!("Policy error: {msg}"),
        Error::Validation(msg) => format!("Validation error: {msg}"),
        Error::Signing(msg) => format!("Signing error: {msg}"),
        Error::Serialization(msg) => format!("Serialization error: {msg}"),
        Error::StepExecution(msg) => format!("Step execution error: {msg}"),
        Error::AlreadyExists(path) => format!(
            "{} already exists; run with --clean first",
            path.display()
        ),
        Error::TierCollision(msg) => format!("Tier collision: {msg}"),
        Error::InitializationError(msg) => format!("Initialization error: {msg}"),
        Error::HexDecode(err) => format!("Hex decode error: {err}"),
        Error::Json(err) => format!("JSON error: {err}"),
    }
}

/// Helper function to print validation warnings to the user
pub fn print_validation_warning(message: &str) {
    eprintln!("Warning: {message}");
}

// Shared functionality for progress indication
pub mod progress {
    use indicatif::{ProgressBar, ProgressStyle};

    pub fn create_progress_bar(len: u64) -> ProgressBar {
        let pb = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
        {
            pb.set_style(style.progress_chars("=>-"));
        }
        pb
    }
}
