use crate::error::Result;
use crate::generator::GeneratorConfig;
use crate::in_toto::SignedEnvelope;
use crate::in_toto::layout::Layout;
use crate::in_toto::link::Link;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Small keys, no progress bar.
pub fn test_config(root: &Path, total: usize, advanced: usize) -> GeneratorConfig {
    GeneratorConfig {
        root: root.to_path_buf(),
        total,
        advanced,
        jobs: 2,
        key_bits: 2048,
        show_progress: false,
        ..Default::default()
    }
}

/// Sorted entry names of a directory.
pub fn entries(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

pub fn load_layout(path: &Path) -> Result<SignedEnvelope<Layout>> {
    SignedEnvelope::load(path)
}

/// Step links in `dir`, keyed by step name. Sublayout files are skipped.
pub fn load_links(dir: &Path) -> Result<BTreeMap<String, SignedEnvelope<Link>>> {
    let mut links = BTreeMap::new();
    for name in entries(dir)? {
        let path = dir.join(&name);
        if !path.is_file() || !name.ends_with(".link") || name.starts_with("tier-") {
            continue;
        }
        let link: SignedEnvelope<Link> = SignedEnvelope::load(&path)?;
        links.insert(link.body().name.clone(), link);
    }
    Ok(links)
}
