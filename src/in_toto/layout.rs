//! # Layouts
//!
//! A layout is the signed policy of a supply chain: the ordered steps, who may
//! sign each step's link, how many of them must, and the artifact rules that
//! tie the steps together. [`LayoutBuilder`] is the only way the generator
//! produces one, and it refuses to produce a layout that a verifier would
//! reject on structural grounds.

use crate::error::{Error, Result};
use crate::in_toto::DocumentType;
use crate::in_toto::rules::{ArtifactRule, Direction};
use crate::keys::{KeyId, PublicKeyRecord};
use chrono::{DateTime, Duration, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// in-toto timestamp format, second precision, always UTC.
pub const EXPIRES_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub const DEFAULT_EXPIRY_DAYS: i64 = 30;

/// One pipeline stage of a layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "_type")]
    pub doc_type: DocumentType,
    pub name: String,
    #[serde(rename = "expected_materials")]
    pub materials: Vec<ArtifactRule>,
    #[serde(rename = "expected_products")]
    pub products: Vec<ArtifactRule>,
    #[serde(rename = "pubkeys")]
    pub signers: BTreeSet<KeyId>,
    #[serde(rename = "expected_command")]
    pub command: Vec<String>,
    pub threshold: u32,
}

impl Step {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            doc_type: DocumentType::Step,
            name: name.into(),
            materials: Vec::new(),
            products: Vec::new(),
            signers: BTreeSet::new(),
            command: Vec::new(),
            threshold: 1,
        }
    }

    pub fn materials(mut self, rules: Vec<ArtifactRule>) -> Self {
        self.materials = rules;
        self
    }

    pub fn products(mut self, rules: Vec<ArtifactRule>) -> Self {
        self.products = rules;
        self
    }

    pub fn signer(mut self, keyid: KeyId) -> Self {
        self.signers.insert(keyid);
        self
    }

    pub fn threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn rules(&self, direction: Direction) -> &[ArtifactRule] {
        match direction {
            Direction::Materials => &self.materials,
            Direction::Products => &self.products,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    #[serde(rename = "_type")]
    pub doc_type: DocumentType,
    pub readme: String,
    pub expires: String,
    pub keys: BTreeMap<KeyId, PublicKeyRecord>,
    pub steps: Vec<Step>,
    /// Inspections are never generated.
    pub inspect: Vec<serde_json::Value>,
}

impl Layout {
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// Check the structural invariants [`LayoutBuilder::build`] enforces.
    ///
    /// Useful on layouts read back from disk.
    pub fn validate(&self) -> Result<()> {
        check_steps(&self.steps, &self.keys)?;

        let referenced: BTreeSet<&KeyId> = self.steps.iter().flat_map(|s| &s.signers).collect();
        if let Some(unused) = self.keys.keys().find(|k| !referenced.contains(k)) {
            return Err(Error::Policy(format!(
                "Layout trusts key {unused} that no step references"
            )));
        }
        for (keyid, record) in &self.keys {
            if &record.keyid != keyid {
                return Err(Error::Policy(format!(
                    "Key map entry {keyid} holds record for {}",
                    record.keyid
                )));
            }
        }
        DateTime::parse_from_rfc3339(&self.expires)
            .map_err(|e| Error::Policy(format!("Invalid expiry {:?}: {e}", self.expires)))?;
        Ok(())
    }
}

/// Assembles steps and the public keys they reference into a [`Layout`].
///
/// Keys may be offered freely with [`LayoutBuilder::add_key`]; only the ones a
/// step actually lists as a signer end up in the layout.
#[derive(Debug, Clone)]
pub struct LayoutBuilder {
    readme: String,
    expires: DateTime<Utc>,
    keys: BTreeMap<KeyId, PublicKeyRecord>,
    steps: Vec<Step>,
}

impl Default for LayoutBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LayoutBuilder {
    pub fn new() -> Self {
        Self {
            readme: String::new(),
            expires: Utc::now() + Duration::days(DEFAULT_EXPIRY_DAYS),
            keys: BTreeMap::new(),
            steps: Vec::new(),
        }
    }

    pub fn readme(mut self, readme: impl Into<String>) -> Self {
        self.readme = readme.into();
        self
    }

    pub fn expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = expires;
        self
    }

    pub fn expires_in_days(self, days: i64) -> Self {
        self.expires(Utc::now() + Duration::days(days))
    }

    pub fn add_key(mut self, record: PublicKeyRecord) -> Self {
        self.keys.insert(record.keyid.clone(), record);
        self
    }

    pub fn add_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn build(self) -> Result<Layout> {
        check_steps(&self.steps, &self.keys)?;

        let referenced: BTreeSet<&KeyId> = self.steps.iter().flat_map(|s| &s.signers).collect();
        let keys: BTreeMap<KeyId, PublicKeyRecord> = self
            .keys
            .iter()
            .filter(|(id, _)| referenced.contains(id))
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect();
        if keys.len() < self.keys.len() {
            debug!(
                "Dropped {} offered key(s) not referenced by any step",
                self.keys.len() - keys.len()
            );
        }

        Ok(Layout {
            doc_type: DocumentType::Layout,
            readme: self.readme,
            expires: self.expires.format(EXPIRES_FORMAT).to_string(),
            keys,
            steps: self.steps,
            inspect: Vec::new(),
        })
    }
}

fn check_steps(steps: &[Step], keys: &BTreeMap<KeyId, PublicKeyRecord>) -> Result<()> {
    if steps.is_empty() {
        return Err(Error::Policy("Layout has no steps".to_string()));
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for step in steps {
        if step.name.is_empty() {
            return Err(Error::Policy("Step name must not be empty".to_string()));
        }
        if step.threshold == 0 {
            return Err(Error::Policy(format!(
                "Step {} has a threshold of 0",
                step.name
            )));
        }
        if step.threshold as usize > step.signers.len() {
            return Err(Error::Policy(format!(
                "Step {} requires {} signature(s) but only {} signer(s) are authorized",
                step.name,
                step.threshold,
                step.signers.len()
            )));
        }
        if let Some(unknown) = step.signers.iter().find(|k| !keys.contains_key(*k)) {
            return Err(Error::Policy(format!(
                "Step {} references unregistered key {unknown}",
                step.name
            )));
        }
        for rule in step.materials.iter().chain(&step.products) {
            if let Some(cross_ref) = rule.cross_ref() {
                if !seen.contains(cross_ref.step.as_str()) {
                    return Err(Error::Policy(format!(
                        "Step {} rule \"{rule}\" references step {} which is not declared before it",
                        step.name, cross_ref.step
                    )));
                }
            }
        }
        if !seen.insert(step.name.as_str()) {
            return Err(Error::Policy(format!("Duplicate step name {}", step.name)));
        }
    }
    Ok(())
}
