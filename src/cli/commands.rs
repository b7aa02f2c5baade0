use crate::generator::{
    DEFAULT_ADVANCED, DEFAULT_DEPTH, DEFAULT_KEY_BITS, DEFAULT_TOTAL, GeneratorConfig,
    default_jobs,
};
use crate::hash::HashAlgorithm;
use crate::in_toto::EnvelopeFormat;
use crate::in_toto::layout::DEFAULT_EXPIRY_DAYS;
use clap::Args;
use std::path::PathBuf;

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum HashAlgorithmChoice {
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithmChoice {
    pub fn to_hash_algorithm(&self) -> HashAlgorithm {
        match self {
            HashAlgorithmChoice::Sha256 => HashAlgorithm::Sha256,
            HashAlgorithmChoice::Sha384 => HashAlgorithm::Sha384,
            HashAlgorithmChoice::Sha512 => HashAlgorithm::Sha512,
        }
    }
}

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum EnvelopeChoice {
    /// Classic in-toto `{signed, signatures}` envelope
    Metablock,
    /// Dead Simple Signing Envelope
    Dsse,
}

impl EnvelopeChoice {
    pub fn to_envelope_format(&self) -> EnvelopeFormat {
        match self {
            EnvelopeChoice::Metablock => EnvelopeFormat::Metablock,
            EnvelopeChoice::Dsse => EnvelopeFormat::Dsse,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct GenerateArgs {
    /// Total number of supply chains to generate
    #[arg(short = 't', long = "total", default_value_t = DEFAULT_TOTAL)]
    pub total: usize,

    /// How many of the chains contain nested sublayouts
    #[arg(short = 'a', long = "advanced", default_value_t = DEFAULT_ADVANCED)]
    pub advanced: usize,

    /// Remove generated keys, metadata and artifacts, then exit
    #[arg(short = 'c', long = "clean")]
    pub clean: bool,

    /// Directory holding keys/, metadata/ and artifacts/
    #[arg(long = "root", default_value = ".")]
    pub root: PathBuf,

    /// Number of chains generated in parallel (default: available cores)
    #[arg(long = "jobs")]
    pub jobs: Option<usize>,

    /// Envelope used for layouts and links
    #[arg(long = "envelope", value_enum, default_value = "metablock")]
    pub envelope: EnvelopeChoice,

    /// RSA key size in bits
    #[arg(long = "key-bits", default_value_t = DEFAULT_KEY_BITS)]
    pub key_bits: u32,

    /// Digest algorithm recorded for artifacts (default: sha256)
    #[arg(long = "hash-alg", value_enum, default_value = "sha256")]
    pub hash_alg: HashAlgorithmChoice,

    /// Days until generated layouts expire
    #[arg(long = "expires-days", default_value_t = DEFAULT_EXPIRY_DAYS)]
    pub expires_days: i64,

    /// Sublayout levels below each advanced chain
    #[arg(long = "depth", default_value_t = DEFAULT_DEPTH)]
    pub depth: usize,

    /// Disable the progress bar
    #[arg(long = "no-progress")]
    pub no_progress: bool,
}

impl GenerateArgs {
    pub fn to_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            root: self.root.clone(),
            total: self.total,
            advanced: self.advanced,
            depth: self.depth,
            jobs: self.jobs.unwrap_or_else(default_jobs),
            key_bits: self.key_bits,
            hash_alg: self.hash_alg.to_hash_algorithm(),
            envelope: self.envelope.to_envelope_format(),
            expires_days: self.expires_days,
            show_progress: !self.no_progress,
        }
    }
}
