//! # Generator
//!
//! Turns a [`GeneratorConfig`] into `total` supply chains under one root.
//! The first `advanced` chains are nested, the rest are flat.
//!
//! Chains share nothing but the top-level directories, so each one is
//! composed by its own task on a blocking pool of `jobs` threads. A chain
//! that fails rolls back its own files; the others still complete and the
//! first failure is reported once all tasks are done.

use crate::cli::progress;
use crate::compose::{ChainShape, ComposedChain, ComposerSettings, SupplyChainComposer};
use crate::error::{Error, Result};
use crate::hash::HashAlgorithm;
use crate::in_toto::EnvelopeFormat;
use crate::in_toto::layout::DEFAULT_EXPIRY_DAYS;
use crate::keys::FileKeyStore;
use crate::signing::MIN_RSA_BITS;
use crate::workspace::{CleanReport, Workspace};
use indicatif::ProgressBar;
use log::{error, info};
use std::path::PathBuf;

pub const CHAIN_PREFIX: &str = "supply-chain";
pub const DEFAULT_TOTAL: usize = 4;
pub const DEFAULT_ADVANCED: usize = 1;
pub const DEFAULT_DEPTH: usize = 1;
pub const DEFAULT_KEY_BITS: u32 = 3072;

/// Generator configuration options
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Directory holding `keys/`, `metadata/` and `artifacts/`
    pub root: PathBuf,
    /// Number of chains to generate
    pub total: usize,
    /// How many of them are nested
    pub advanced: usize,
    /// Sublayout levels below each nested chain
    pub depth: usize,
    /// Upper bound on chains generated at once
    pub jobs: usize,
    pub key_bits: u32,
    pub hash_alg: HashAlgorithm,
    pub envelope: EnvelopeFormat,
    pub expires_days: i64,
    /// Whether to show progress bars
    pub show_progress: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            total: DEFAULT_TOTAL,
            advanced: DEFAULT_ADVANCED,
            depth: DEFAULT_DEPTH,
            jobs: default_jobs(),
            key_bits: DEFAULT_KEY_BITS,
            hash_alg: HashAlgorithm::default(),
            envelope: EnvelopeFormat::default(),
            expires_days: DEFAULT_EXPIRY_DAYS,
            show_progress: true,
        }
    }
}

pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl GeneratorConfig {
    /// Reject configurations that cannot be generated. Nothing is written
    /// before this passes.
    pub fn validate(&self) -> Result<()> {
        if self.advanced > self.total {
            return Err(Error::Configuration(format!(
                "advanced ({}) cannot exceed total ({})",
                self.advanced, self.total
            )));
        }
        if self.jobs == 0 {
            return Err(Error::Configuration("jobs must be at least 1".to_string()));
        }
        if self.key_bits < MIN_RSA_BITS {
            return Err(Error::Configuration(format!(
                "key size must be at least {MIN_RSA_BITS} bits, got {}",
                self.key_bits
            )));
        }
        if self.expires_days <= 0 {
            return Err(Error::Configuration(format!(
                "expiry must be in the future, got {} days",
                self.expires_days
            )));
        }
        if self.advanced > 0 && self.depth == 0 {
            return Err(Error::Configuration(
                "nested chains need a depth of at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn chain_name(index: usize) -> String {
        format!("{CHAIN_PREFIX}-{index}")
    }

    /// Chain names and shapes in generation order.
    pub fn plan(&self) -> Vec<(String, ChainShape)> {
        (0..self.total)
            .map(|index| {
                let shape = if index < self.advanced {
                    ChainShape::with_depth(self.depth)
                } else {
                    ChainShape::Flat
                };
                (Self::chain_name(index), shape)
            })
            .collect()
    }

    pub fn composer_settings(&self) -> ComposerSettings {
        ComposerSettings {
            format: self.envelope,
            hash_alg: self.hash_alg,
            expires_days: self.expires_days,
        }
    }
}

/// Generate every chain of `config`, returning them in plan order.
pub fn generate(config: &GeneratorConfig) -> Result<Vec<ComposedChain>> {
    config.validate()?;

    let workspace = Workspace::new(&config.root);
    workspace.prepare()?;

    let plan = config.plan();
    info!(
        "Generating {} supply chains ({} nested, depth {}) in {}",
        config.total,
        config.advanced,
        config.depth,
        workspace.root().display()
    );

    let progress_bar = if config.show_progress {
        progress::create_progress_bar(plan.len() as u64)
    } else {
        ProgressBar::hidden()
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .max_blocking_threads(config.jobs)
        .build()
        .map_err(|e| Error::InitializationError(format!("Failed to start worker pool: {e}")))?;

    let outcomes = runtime.block_on(async {
        let mut tasks = Vec::with_capacity(plan.len());
        for (name, shape) in plan {
            let workspace = workspace.clone();
            let config = config.clone();
            let progress_bar = progress_bar.clone();

            let task = tokio::task::spawn_blocking(move || {
                let keys = FileKeyStore::new(workspace.keys_dir(), config.key_bits);
                let composer =
                    SupplyChainComposer::new(&workspace, &keys, config.composer_settings());
                let result = composer.compose(&name, &shape);
                progress_bar.set_message(name.clone());
                progress_bar.inc(1);
                result
            });
            tasks.push(task);
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in tasks {
            outcomes.push(task.await.map_err(|e| {
                Error::StepExecution(format!("Chain worker did not finish: {e}"))
            }));
        }
        outcomes
    });
    progress_bar.finish_and_clear();

    let mut chains = Vec::with_capacity(outcomes.len());
    let mut first_failure = None;
    for outcome in outcomes {
        match outcome.and_then(|result| result) {
            Ok(chain) => chains.push(chain),
            Err(e) => {
                error!("Chain generation failed: {e}");
                first_failure.get_or_insert(e);
            }
        }
    }

    match first_failure {
        Some(e) => Err(e),
        None => {
            info!("Generated {} supply chains", chains.len());
            Ok(chains)
        }
    }
}

/// Remove previously generated material under `root`, keeping sentinels.
pub fn clean(root: impl Into<PathBuf>) -> Result<CleanReport> {
    Workspace::new(root).clean()
}
