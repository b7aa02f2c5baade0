use crate::hash::DigestSet;
use crate::in_toto::DocumentType;
use crate::in_toto::rules::Artifacts;
use crate::keys::KeyId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const LINK_EXTENSION: &str = "link";

/// What the step's command left behind besides its products.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Byproducts {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(rename = "return-value", default)]
    pub return_value: Option<i32>,
}

/// Record of one step execution: what it consumed, what it produced, how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    #[serde(rename = "_type")]
    pub doc_type: DocumentType,
    pub name: String,
    pub materials: BTreeMap<String, DigestSet>,
    pub products: BTreeMap<String, DigestSet>,
    pub command: Vec<String>,
    pub byproducts: Byproducts,
    pub environment: BTreeMap<String, serde_json::Value>,
}

impl Link {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            doc_type: DocumentType::Link,
            name: name.into(),
            materials: BTreeMap::new(),
            products: BTreeMap::new(),
            command: Vec::new(),
            byproducts: Byproducts::default(),
            environment: BTreeMap::new(),
        }
    }

    pub fn artifacts(&self) -> Artifacts<'_> {
        Artifacts {
            materials: &self.materials,
            products: &self.products,
        }
    }
}

/// `<step>.<keyid prefix>.link`, the name verifiers look links up by.
pub fn link_file_name(step: &str, signer: &KeyId) -> String {
    format!("{step}.{}.{LINK_EXTENSION}", signer.short())
}
