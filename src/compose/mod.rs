//! # Supply chain composition
//!
//! A composed chain is a tree of chain nodes. The root node owns
//! `metadata/<chain>.layout` and the link directory `metadata/<chain>/`. A
//! nested node (a *tier*) lives inside its parent's link directory:
//!
//! ```text
//! metadata/<chain>/tier-2-supply-chain.<keyid8>.link   signed sublayout
//! metadata/<chain>/tier-2-supply-chain.<keyid8>/       the tier's links
//! ```
//!
//! For every node the composer provisions one key per role, builds and signs
//! the layout with the node's owner key, then runs the steps in order so each
//! functionary signs its own link. Sublayouts are composed completely before
//! the parent layout is built, because the parent's tier step names the
//! sublayout owner as its signer.
//!
//! All paths a composition creates are claimed in a [`BuildContext`]. If any
//! part of the tree fails, everything the chain created so far is removed.

pub mod context;
pub mod steps;
pub mod tier;

pub use context::BuildContext;
pub use tier::{TierAllocator, tier_step_name};

use crate::error::{Error, Result};
use crate::hash::HashAlgorithm;
use crate::in_toto::layout::{DEFAULT_EXPIRY_DAYS, Layout, LayoutBuilder};
use crate::in_toto::link::{LINK_EXTENSION, link_file_name};
use crate::in_toto::{EnvelopeFormat, SignedEnvelope};
use crate::keys::{KeyPair, KeyProvisioner, PublicKeyRecord};
use crate::runner::{StepAction, StepInvocation, StepRunner};
use crate::utils::safe_create_dir;
use crate::workspace::Workspace;
use log::{debug, info};
use std::path::{Path, PathBuf};
use steps::{BUILD_STEP, BuildInputs, Input, SOURCE_STEP, TEST_STEP};

/// Tier number of a top-level chain. Its first sublayout is tier 2.
pub const ROOT_TIER: usize = 1;

const OWNER_ROLE: &str = "owner";

/// How deep a chain nests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainShape {
    Flat,
    /// A chain with one sublayout of the given shape.
    Nested(Box<ChainShape>),
}

impl ChainShape {
    /// A chain with `depth` levels of sublayouts beneath it.
    pub fn with_depth(depth: usize) -> Self {
        (0..depth).fold(ChainShape::Flat, |inner, _| {
            ChainShape::Nested(Box::new(inner))
        })
    }

    pub fn depth(&self) -> usize {
        match self {
            ChainShape::Flat => 0,
            ChainShape::Nested(inner) => 1 + inner.depth(),
        }
    }

    pub fn is_nested(&self) -> bool {
        matches!(self, ChainShape::Nested(_))
    }
}

/// Knobs shared by every chain of a run.
#[derive(Debug, Clone)]
pub struct ComposerSettings {
    pub format: EnvelopeFormat,
    pub hash_alg: HashAlgorithm,
    pub expires_days: i64,
}

impl Default for ComposerSettings {
    fn default() -> Self {
        Self {
            format: EnvelopeFormat::Metablock,
            hash_alg: HashAlgorithm::Sha256,
            expires_days: DEFAULT_EXPIRY_DAYS,
        }
    }
}

/// Result of composing one chain (or one tier of it).
#[derive(Debug, Clone)]
pub struct ComposedChain {
    pub name: String,
    pub tier: usize,
    pub layout: Layout,
    pub layout_path: PathBuf,
    pub link_dir: PathBuf,
    pub owner: PublicKeyRecord,
    /// Link files written for this node's own steps, in step order.
    pub links: Vec<PathBuf>,
    /// Relative path of the archive the build step produced.
    pub archive: String,
    pub sublayout: Option<Box<ComposedChain>>,
}

impl ComposedChain {
    /// Number of nodes in this tree, counting itself.
    pub fn node_count(&self) -> usize {
        1 + self.sublayout.as_ref().map_or(0, |sub| sub.node_count())
    }
}

/// One node of the chain tree. Owns its paths and borrows the link directory
/// of the node it is embedded in.
#[derive(Debug)]
struct ChainNode<'p> {
    /// Name of the top-level chain this node belongs to.
    stem: &'p str,
    name: String,
    tier: usize,
    layout_path: PathBuf,
    link_dir: PathBuf,
    parent_link_dir: Option<&'p Path>,
}

pub struct SupplyChainComposer<'a> {
    workspace: &'a Workspace,
    keys: &'a dyn KeyProvisioner,
    runner: StepRunner,
    settings: ComposerSettings,
}

impl<'a> SupplyChainComposer<'a> {
    pub fn new(
        workspace: &'a Workspace,
        keys: &'a dyn KeyProvisioner,
        settings: ComposerSettings,
    ) -> Self {
        let runner = StepRunner::new(workspace.root(), settings.hash_alg, settings.format);
        Self {
            workspace,
            keys,
            runner,
            settings,
        }
    }

    /// Compose chain `name` with the given shape. On error nothing the chain
    /// created is left on disk.
    pub fn compose(&self, name: &str, shape: &ChainShape) -> Result<ComposedChain> {
        let mut ctx = BuildContext::new();

        let owner = self.provision(&mut ctx, name, OWNER_ROLE)?;
        let node = ChainNode {
            stem: name,
            name: name.to_string(),
            tier: ROOT_TIER,
            layout_path: self.workspace.layout_path(name),
            link_dir: self.workspace.link_dir(name),
            parent_link_dir: None,
        };
        let chain = self.compose_node(&mut ctx, &node, &owner, shape)?;

        info!(
            "Composed {} ({} tiers, {} paths)",
            name,
            chain.node_count(),
            ctx.claimed().len()
        );
        ctx.commit();
        Ok(chain)
    }

    fn provision(&self, ctx: &mut BuildContext, chain: &str, role: &str) -> Result<KeyPair> {
        let name = format!("{chain}-{role}");
        for path in self.keys.locations(&name) {
            ctx.claim(path)?;
        }
        self.keys.generate(&name)
    }

    fn compose_node(
        &self,
        ctx: &mut BuildContext,
        node: &ChainNode<'_>,
        owner: &KeyPair,
        shape: &ChainShape,
    ) -> Result<ComposedChain> {
        if let Some(parent) = node.parent_link_dir {
            if !parent.is_dir() {
                return Err(Error::Validation(format!(
                    "Parent link directory {} of {} does not exist",
                    parent.display(),
                    node.name
                )));
            }
        }
        debug!("Composing {} at tier {}", node.name, node.tier);

        let source_key = self.provision(ctx, &node.name, SOURCE_STEP)?;
        let test_key = self.provision(ctx, &node.name, TEST_STEP)?;
        let build_key = self.provision(ctx, &node.name, BUILD_STEP)?;

        ctx.claim(&node.link_dir)?;
        safe_create_dir(&node.link_dir)?;

        let src = self.workspace.artifact(&node.name, "src");
        let archive = self.workspace.artifact(&node.name, "tar");

        let mut builder = LayoutBuilder::new()
            .readme(readme(node, shape))
            .expires_in_days(self.settings.expires_days)
            .add_key(source_key.public.clone())
            .add_key(test_key.public.clone())
            .add_key(build_key.public.clone())
            .add_step(steps::source(&src, &source_key.id));

        let mut inputs = vec![Input::new(&src, SOURCE_STEP)];
        let sublayout = match shape {
            ChainShape::Flat => None,
            ChainShape::Nested(inner) => {
                let mut tiers = TierAllocator::new(&node.link_dir);
                let sub = self.compose_tier(ctx, node, &mut tiers, inner)?;

                let step_name = tier_step_name(sub.tier);
                builder = builder
                    .add_key(sub.owner.clone())
                    .add_step(steps::tier(&step_name, &sub.archive, &sub.owner.keyid));
                inputs.push(Input::new(&sub.archive, step_name));
                Some(Box::new(sub))
            }
        };

        let tested: Vec<String> = inputs.iter().map(|i| i.path.clone()).collect();
        let build_inputs = match shape {
            ChainShape::Flat => BuildInputs::Each(&inputs),
            ChainShape::Nested(_) => BuildInputs::All,
        };
        let layout = builder
            .add_step(steps::test(&inputs, &test_key.id))
            .add_step(steps::build(build_inputs, &archive, &build_key.id))
            .build()?;

        ctx.claim(&node.layout_path)?;
        SignedEnvelope::seal(layout.clone(), &owner.private, self.settings.format)?
            .dump(&node.layout_path)?;

        let plan = [
            (
                &source_key,
                StepPlan {
                    step: SOURCE_STEP,
                    materials: vec![],
                    products: vec![src.clone()],
                    action: StepAction::WriteFile {
                        path: src.clone(),
                        contents: fixture_source(&node.name),
                    },
                },
            ),
            (
                &test_key,
                StepPlan {
                    step: TEST_STEP,
                    materials: tested.clone(),
                    products: tested.clone(),
                    action: StepAction::Checksum {
                        paths: tested.clone(),
                    },
                },
            ),
            (
                &build_key,
                StepPlan {
                    step: BUILD_STEP,
                    materials: tested.clone(),
                    products: vec![archive.clone()],
                    action: StepAction::Archive {
                        sources: tested,
                        destination: archive.clone(),
                    },
                },
            ),
        ];

        let mut links = Vec::with_capacity(plan.len());
        for (key, plan) in plan {
            links.push(self.run_step(ctx, node, &layout, plan, key)?);
        }

        Ok(ComposedChain {
            name: node.name.clone(),
            tier: node.tier,
            layout,
            layout_path: node.layout_path.clone(),
            link_dir: node.link_dir.clone(),
            owner: owner.public.clone(),
            links,
            archive,
            sublayout,
        })
    }

    /// Compose the sublayout embedded in `parent`'s link directory.
    fn compose_tier(
        &self,
        ctx: &mut BuildContext,
        parent: &ChainNode<'_>,
        tiers: &mut TierAllocator,
        shape: &ChainShape,
    ) -> Result<ComposedChain> {
        let tier = parent.tier + 1;
        let name = format!("{}-tier-{tier}", parent.stem);

        let owner = self.provision(ctx, &name, OWNER_ROLE)?;
        let id = tiers.allocate(&tier_step_name(tier), &owner.id)?;

        let node = ChainNode {
            stem: parent.stem,
            name,
            tier,
            layout_path: parent.link_dir.join(format!("{id}.{LINK_EXTENSION}")),
            link_dir: parent.link_dir.join(&id),
            parent_link_dir: Some(&parent.link_dir),
        };
        self.compose_node(ctx, &node, &owner, shape)
    }

    fn run_step(
        &self,
        ctx: &mut BuildContext,
        node: &ChainNode<'_>,
        layout: &Layout,
        plan: StepPlan,
        functionary: &KeyPair,
    ) -> Result<PathBuf> {
        let step = layout.step(plan.step).ok_or_else(|| {
            Error::Policy(format!("Layout of {} has no step {}", node.name, plan.step))
        })?;

        for product in plan.products.iter().filter(|p| !plan.materials.contains(p)) {
            ctx.claim(self.workspace.root().join(product))?;
        }
        ctx.claim(node.link_dir.join(link_file_name(plan.step, &functionary.id)))?;

        let invocation = StepInvocation {
            step,
            materials: plan.materials,
            products: plan.products,
            action: plan.action,
        };
        Ok(self.runner.run(&invocation, functionary, &node.link_dir)?.path)
    }
}

struct StepPlan {
    step: &'static str,
    materials: Vec<String>,
    products: Vec<String>,
    action: StepAction,
}

fn readme(node: &ChainNode<'_>, shape: &ChainShape) -> String {
    let kind = if shape.is_nested() { "nested" } else { "flat" };
    format!(
        "Generated {kind} supply chain {} (tier {})",
        node.name, node.tier
    )
}

fn fixture_source(name: &str) -> Vec<u8> {
    format!("fn main() {{\n    println!(\"{name}\");\n}}\n").into_bytes()
}
