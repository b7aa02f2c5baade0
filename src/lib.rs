//! # supply-chain-stress
//!
//! Generates signed in-toto supply chains in bulk, for exercising a
//! supply-chain verifier under load.
//!
//! Every chain consists of RSA keypairs for its owner and functionaries, a
//! layout signed by the owner, and one link per step signed by that step's
//! functionary. Advanced chains additionally embed a sublayout (which may
//! itself be nested) inside their link directory.
//!
//! ## Quick Start
//!
//! Generate four chains, one of them nested, in the current directory:
//! ```bash
//! supply-chain-stress --total 4 --advanced 1
//! ```
//!
//! Remove everything generated, keeping `.keep` sentinels:
//! ```bash
//! supply-chain-stress --clean
//! ```
//!
//! ## Library use
//!
//! ```no_run
//! use supply_chain_stress::generator::{self, GeneratorConfig};
//!
//! let config = GeneratorConfig {
//!     root: "fixtures".into(),
//!     total: 2,
//!     advanced: 1,
//!     ..Default::default()
//! };
//! let chains = generator::generate(&config).unwrap();
//! assert_eq!(chains.len(), 2);
//! ```

pub mod cli;
pub mod compose;
pub mod error;
pub mod generator;
pub mod hash;
pub mod in_toto;
pub mod keys;
pub mod runner;
pub mod signing;
#[cfg(test)]
mod tests;
pub mod utils;
pub mod workspace;

// Re-export error types
pub use error::{Error, Result};
pub use generator::GeneratorConfig;

/// Initialize logging for the CLI
///
/// Verbosity follows `RUST_LOG`.
///
/// # Examples
///
/// ```
/// use supply_chain_stress::init_logging;
///
/// // Initialize with default settings
/// let result = init_logging();
/// // Note: This might fail if already initialized
/// assert!(result.is_ok() || result.is_err());
/// ```
pub fn init_logging() -> Result<()> {
    env_logger::try_init().map_err(|e| Error::InitializationError(e.to_string()))
}
