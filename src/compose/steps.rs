//! Step definitions shared by flat and nested chains.
//!
//! Every rule list built here goes through [`rules::close`], so it ends with
//! exactly one `DISALLOW *`.

use crate::in_toto::layout::Step;
use crate::in_toto::rules::{self, ArtifactRule, Direction, WILDCARD};
use crate::keys::KeyId;

pub const SOURCE_STEP: &str = "source";
pub const TEST_STEP: &str = "test";
pub const BUILD_STEP: &str = "build";

/// An artifact the test step receives, with the step that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    pub path: String,
    pub from: String,
}

impl Input {
    pub fn new(path: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            from: from.into(),
        }
    }
}

/// Writes the chain's source file out of nothing.
pub fn source(src: &str, signer: &KeyId) -> Step {
    Step::new(SOURCE_STEP)
        .materials(rules::close(vec![]))
        .products(rules::close(vec![ArtifactRule::create(src)]))
        .signer(signer.clone())
}

/// Stands in for a whole sublayout: its only product is the tier's archive.
pub fn tier(name: &str, archive: &str, sub_owner: &KeyId) -> Step {
    Step::new(name)
        .materials(rules::close(vec![]))
        .products(rules::close(vec![ArtifactRule::create(archive)]))
        .signer(sub_owner.clone())
}

/// Checks its inputs against the steps that produced them and passes them on
/// unchanged.
pub fn test(inputs: &[Input], signer: &KeyId) -> Step {
    let materials = inputs
        .iter()
        .map(|i| ArtifactRule::match_from(&i.path, Direction::Products, &i.from))
        .collect();
    let products = inputs.iter().map(|i| ArtifactRule::allow(&i.path)).collect();

    Step::new(TEST_STEP)
        .materials(rules::close(materials))
        .products(rules::close(products))
        .signer(signer.clone())
}

/// Which of the test step's products the build step pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildInputs<'a> {
    Each(&'a [Input]),
    All,
}

/// Packs the tested inputs into the chain's archive.
pub fn build(inputs: BuildInputs<'_>, archive: &str, signer: &KeyId) -> Step {
    let materials = match inputs {
        BuildInputs::Each(inputs) => inputs
            .iter()
            .map(|i| ArtifactRule::match_from(&i.path, Direction::Products, TEST_STEP))
            .collect(),
        BuildInputs::All => vec![ArtifactRule::match_from(
            WILDCARD,
            Direction::Products,
            TEST_STEP,
        )],
    };

    Step::new(BUILD_STEP)
        .materials(rules::close(materials))
        .products(rules::close(vec![ArtifactRule::create(archive)]))
        .signer(signer.clone())
}
