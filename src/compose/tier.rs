use crate::error::{Error, Result};
use crate::keys::KeyId;
use std::collections::HashSet;
use std::path::PathBuf;

/// Name of the step that stands for a sublayout at `tier` (2 for the first
/// level of nesting).
pub fn tier_step_name(tier: usize) -> String {
    format!("tier-{tier}-supply-chain")
}

/// Hands out `<tier step>.<owner keyid prefix>` identifiers inside one parent
/// link directory.
///
/// An identifier is refused if it was handed out before or if anything with
/// that name already sits in the scope. Truncated keyids can collide, and a
/// collision must never overwrite another tier's metadata.
#[derive(Debug)]
pub struct TierAllocator {
    scope: PathBuf,
    allocated: HashSet<String>,
}

impl TierAllocator {
    pub fn new(scope: impl Into<PathBuf>) -> Self {
        Self {
            scope: scope.into(),
            allocated: HashSet::new(),
        }
    }

    pub fn allocate(&mut self, step_name: &str, owner: &KeyId) -> Result<String> {
        let id = format!("{step_name}.{}", owner.short());

        if self.allocated.contains(&id)
            || self.scope.join(&id).exists()
            || self.scope.join(format!("{id}.link")).exists()
        {
            return Err(Error::TierCollision(format!(
                "{id} already allocated in {}",
                self.scope.display()
            )));
        }

        self.allocated.insert(id.clone());
        Ok(id)
    }
}
