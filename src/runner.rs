//! # Step runner
//!
//! Executes one step of a supply chain and records it as a signed link:
//!
//! 1. hash every declared material path,
//! 2. perform the step's [`StepAction`],
//! 3. hash every declared product path,
//! 4. sign the resulting [`Link`] with the functionary's key and write it to
//!    `<link dir>/<step>.<keyid prefix>.link`.
//!
//! Artifact paths are relative to the runner's base directory and recorded
//! with `/` separators. A declared directory is recorded file by file.

use crate::error::{Error, Result};
use crate::hash::{self, DigestSet, HashAlgorithm};
use crate::in_toto::layout::Step;
use crate::in_toto::link::{Link, link_file_name};
use crate::in_toto::{EnvelopeFormat, SignedEnvelope};
use crate::keys::KeyPair;
use crate::utils::{safe_create_file, safe_open_file, write_new_file};
use log::debug;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Builder, Header};
use walkdir::WalkDir;

/// What happens between the material and product snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Write a new file (relative path).
    WriteFile { path: String, contents: Vec<u8> },
    /// Hash files and report `<hex>  <path>` lines on stdout, like `sha256sum`.
    Checksum { paths: Vec<String> },
    /// Pack files into a new tar archive with normalized headers.
    Archive {
        sources: Vec<String>,
        destination: String,
    },
}

/// Everything the runner needs to execute one step.
#[derive(Debug, Clone)]
pub struct StepInvocation<'a> {
    pub step: &'a Step,
    pub materials: Vec<String>,
    pub products: Vec<String>,
    pub action: StepAction,
}

/// A link that has been signed and written.
#[derive(Debug)]
pub struct RecordedLink {
    pub envelope: SignedEnvelope<Link>,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct StepRunner {
    base_dir: PathBuf,
    hash_alg: HashAlgorithm,
    format: EnvelopeFormat,
}

#[derive(Default)]
struct ActionOutput {
    stdout: String,
    stderr: String,
    return_value: Option<i32>,
}

impl StepRunner {
    pub fn new(base_dir: impl Into<PathBuf>, hash_alg: HashAlgorithm, format: EnvelopeFormat) -> Self {
        Self {
            base_dir: base_dir.into(),
            hash_alg,
            format,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn run(
        &self,
        invocation: &StepInvocation<'_>,
        functionary: &KeyPair,
        link_dir: &Path,
    ) -> Result<RecordedLink> {
        let step = invocation.step;
        if !step.signers.contains(&functionary.id) {
            return Err(Error::Policy(format!(
                "Key {} is not authorized to sign step {}",
                functionary.id, step.name
            )));
        }

        let materials = self.record_artifacts(&invocation.materials)?;
        let output = self.perform(&invocation.action).map_err(|e| match e {
            Error::AlreadyExists(_) => e,
            e => Error::StepExecution(format!("Step {} failed: {e}", step.name)),
        })?;
        let products = self.record_artifacts(&invocation.products)?;

        let mut link = Link::new(&step.name);
        link.materials = materials;
        link.products = products;
        link.command = step.command.clone();
        link.byproducts.stdout = output.stdout;
        link.byproducts.stderr = output.stderr;
        link.byproducts.return_value = output.return_value;

        let envelope = SignedEnvelope::seal(link, &functionary.private, self.format)?;
        let path = link_dir.join(link_file_name(&step.name, &functionary.id));
        envelope.dump(&path)?;

        debug!(
            "Recorded step {} ({} materials, {} products) at {}",
            step.name,
            envelope.body().materials.len(),
            envelope.body().products.len(),
            path.display()
        );
        Ok(RecordedLink { envelope, path })
    }

    fn record_artifacts(&self, paths: &[String]) -> Result<BTreeMap<String, DigestSet>> {
        let mut artifacts = BTreeMap::new();
        for declared in paths {
            let full = self.base_dir.join(declared);
            if full.is_dir() {
                for entry in WalkDir::new(&full).sort_by_file_name() {
                    let entry = entry.map_err(|e| Error::Io(e.into()))?;
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let name = self.artifact_name(entry.path())?;
                    artifacts.insert(name, hash::file_digest_set(entry.path(), &self.hash_alg)?);
                }
            } else if full.is_file() {
                artifacts.insert(
                    normalize(declared),
                    hash::file_digest_set(&full, &self.hash_alg)?,
                );
            } else {
                return Err(Error::StepExecution(format!(
                    "Declared artifact {declared} does not exist"
                )));
            }
        }
        Ok(artifacts)
    }

    fn artifact_name(&self, full: &Path) -> Result<String> {
        let relative = full.strip_prefix(&self.base_dir).map_err(|_| {
            Error::StepExecution(format!("{} is outside the base directory", full.display()))
        })?;
        Ok(normalize(&relative.to_string_lossy()))
    }

    fn perform(&self, action: &StepAction) -> Result<ActionOutput> {
        match action {
            StepAction::WriteFile { path, contents } => {
                write_new_file(&self.base_dir.join(path), contents)?;
                Ok(ActionOutput::default())
            }
            StepAction::Checksum { paths } => {
                let mut stdout = String::new();
                for path in paths {
                    let digest = hash::calculate_file_hash_with_algorithm(
                        self.base_dir.join(path),
                        &self.hash_alg,
                    )?;
                    stdout.push_str(&format!("{digest}  {path}\n"));
                }
                Ok(ActionOutput {
                    stdout,
                    return_value: Some(0),
                    ..ActionOutput::default()
                })
            }
            StepAction::Archive {
                sources,
                destination,
            } => {
                self.write_archive(sources, destination)?;
                Ok(ActionOutput {
                    return_value: Some(0),
                    ..ActionOutput::default()
                })
            }
        }
    }

    fn write_archive(&self, sources: &[String], destination: &str) -> Result<()> {
        let file = safe_create_file(&self.base_dir.join(destination))?;
        let mut builder = Builder::new(file);

        for source in sources {
            let mut contents = Vec::new();
            safe_open_file(&self.base_dir.join(source))?.read_to_end(&mut contents)?;

            // normalized header so equal inputs give equal archives
            let mut header = Header::new_gnu();
            header.set_path(normalize(source))?;
            header.set_size(contents.len() as u64);
            header.set_mtime(0);
            header.set_uid(0);
            header.set_gid(0);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, contents.as_slice())?;
        }

        builder.into_inner()?;
        Ok(())
    }
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}
