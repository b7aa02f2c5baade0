use crate::compose::ComposedChain;
use crate::error::Result;
use crate::generator;
use crate::in_toto::canonical;
use crate::in_toto::layout::Layout;
use crate::in_toto::link::Link;
use crate::in_toto::rules::{self, Artifacts, Direction};
use crate::in_toto::{EnvelopeFormat, SignedEnvelope};
use crate::keys::{FileKeyStore, KeyProvisioner, PublicKeyRecord};
use crate::tests::common::{load_layout, load_links, test_config};
use crate::workspace::Workspace;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

/// The record a verifier substitutes for a sublayout step: materials of its
/// first step, products of its last.
fn summary_link(name: &str, links: &BTreeMap<String, SignedEnvelope<Link>>) -> Link {
    let mut summary = Link::new(name);
    summary.materials = links["source"].body().materials.clone();
    summary.products = links["build"].body().products.clone();
    summary
}

fn assert_rules_hold(layout: &Layout, links: &BTreeMap<String, Link>) -> Result<()> {
    let others: BTreeMap<String, Artifacts<'_>> = links
        .iter()
        .map(|(name, link)| (name.clone(), link.artifacts()))
        .collect();

    for step in &layout.steps {
        let link = &links[&step.name];
        for direction in [Direction::Materials, Direction::Products] {
            let report = rules::evaluate(step.rules(direction), direction, link.artifacts(), &others)?;
            assert!(
                report.passed(),
                "{} {direction:?}: {:?}",
                step.name,
                report.dispositions
            );
        }
    }
    Ok(())
}

fn check_chain(chain: &ComposedChain) -> Result<()> {
    let signed = load_links(&chain.link_dir)?;
    let mut links: BTreeMap<String, Link> = signed
        .iter()
        .map(|(name, link)| (name.clone(), link.body().clone()))
        .collect();

    if let Some(sub) = chain.sublayout.as_deref() {
        let step_name = crate::compose::tier_step_name(sub.tier);
        let sub_links = load_links(&sub.link_dir)?;
        links.insert(step_name.clone(), summary_link(&step_name, &sub_links));
        check_chain(sub)?;
    }

    assert_rules_hold(&chain.layout, &links)
}

#[test]
fn test_generated_links_satisfy_their_layouts() -> Result<()> {
    let dir = tempdir()?;
    let chains = generator::generate(&crate::GeneratorConfig {
        depth: 2,
        ..test_config(dir.path(), 2, 1)
    })?;

    for chain in &chains {
        check_chain(chain)?;
    }
    Ok(())
}

#[test]
fn test_links_are_signed_by_their_functionaries() -> Result<()> {
    let dir = tempdir()?;
    let chains = generator::generate(&test_config(dir.path(), 1, 1))?;
    let chain = &chains[0];

    let mut node = Some(chain);
    while let Some(current) = node {
        let links = load_links(&current.link_dir)?;
        assert_eq!(links.len(), 3);

        for (name, link) in &links {
            let step = current.layout.step(name).expect("step for link");
            let signers = link.signer_keyids();
            assert_eq!(signers.len(), 1);

            let keyid = step.signers.iter().next().expect("one signer");
            assert_eq!(signers[0], keyid.as_str());
            assert!(link.verify(&current.layout.keys[keyid])?);
            assert_eq!(link.body().command, step.command);
            assert!(step.command.is_empty());
        }
        node = current.sublayout.as_deref();
    }
    Ok(())
}

/// Keyid of a `.pub` file as securesystemslib derives it on import: the
/// PEM block without its trailing newline, inside the sorted key record.
fn imported_keyid(pub_path: &Path) -> Result<String> {
    let pem = fs::read_to_string(pub_path)?;
    let record = format!(
        "{{\"keyid_hash_algorithms\":[\"sha256\",\"sha512\"],\"keytype\":\"rsa\",\"keyval\":{{\"public\":\"{}\"}},\"scheme\":\"rsassa-pss-sha256\"}}",
        pem.trim_end()
    );
    Ok(hex::encode(Sha256::digest(record.as_bytes())))
}

/// Check a metablock file the way an in-toto verifier reads it: parse plain
/// JSON, canonicalize `signed`, verify the hex signature by `key`.
fn assert_metablock_accepts(path: &Path, key: &PublicKeyRecord) -> Result<()> {
    let document: Value = serde_json::from_slice(&fs::read(path)?)?;
    let signed = canonical::to_canonical_bytes(&document["signed"])?;

    // newlines in PEM keys and stdout stay raw bytes
    assert!(!signed.windows(2).any(|w| w == b"\\n"));

    let signatures = document["signatures"].as_array().expect("signature list");
    let signature = signatures
        .iter()
        .find(|s| s["keyid"] == key.keyid.as_str())
        .expect("signature by key");
    let sig = hex::decode(signature["sig"].as_str().expect("hex signature"))?;
    assert!(key.verify(&signed, &sig)?);
    Ok(())
}

#[test]
fn test_layout_round_trip_resigns() -> Result<()> {
    let dir = tempdir()?;
    generator::generate(&test_config(dir.path(), 1, 1))?;
    let workspace = Workspace::new(dir.path());
    let keys = FileKeyStore::new(workspace.keys_dir(), 2048);
    let owner = keys.load_public("supply-chain-0-owner")?;
    let layout_path = workspace.layout_path("supply-chain-0");

    assert_eq!(
        owner.keyid.as_str(),
        imported_keyid(&workspace.keys_dir().join("supply-chain-0-owner.pub"))?
    );
    assert_metablock_accepts(&layout_path, &owner)?;
    let layout_json = fs::read_to_string(&layout_path)?;
    assert!(layout_json.contains(r#"-----END PUBLIC KEY-----""#));

    let loaded = load_layout(&layout_path)?;
    assert!(loaded.verify(&owner)?);

    let layout = loaded.into_body();
    layout.validate()?;
    for role in ["source", "test", "build", "tier-2-owner"] {
        let keyid = imported_keyid(&keys.public_path(&format!("supply-chain-0-{role}")))?;
        let embedded = layout
            .keys
            .values()
            .find(|record| record.keyid.as_str() == keyid)
            .expect("trusted key with imported keyid");
        assert_eq!(embedded.keyval.public.lines().last(), Some("-----END PUBLIC KEY-----"));
    }

    let private = keys.load_private("supply-chain-0-owner")?;
    let resealed = SignedEnvelope::seal(layout.clone(), &private, EnvelopeFormat::Metablock)?;
    let resealed_path = dir.path().join("resealed.layout");
    resealed.dump(&resealed_path)?;
    assert_metablock_accepts(&resealed_path, &owner)?;

    let reparsed: SignedEnvelope<Layout> = SignedEnvelope::load(&resealed_path)?;
    assert_eq!(reparsed.body(), &layout);
    assert!(reparsed.verify(&owner)?);
    Ok(())
}

#[test]
fn test_links_verify_over_canonical_bytes() -> Result<()> {
    let dir = tempdir()?;
    let chains = generator::generate(&test_config(dir.path(), 1, 0))?;
    let chain = &chains[0];

    for path in &chain.links {
        let link: SignedEnvelope<Link> = SignedEnvelope::load(path)?;
        let step = chain.layout.step(&link.body().name).expect("step for link");
        let keyid = step.signers.iter().next().expect("one signer");
        assert_metablock_accepts(path, &chain.layout.keys[keyid])?;
    }
    Ok(())
}

#[test]
fn test_sublayout_is_signed_by_tier_owner() -> Result<()> {
    let dir = tempdir()?;
    let chains = generator::generate(&test_config(dir.path(), 1, 1))?;
    let workspace = Workspace::new(dir.path());
    let keys = FileKeyStore::new(workspace.keys_dir(), 2048);

    let sub = chains[0].sublayout.as_deref().expect("sublayout");
    let sub_owner = keys.load_public("supply-chain-0-tier-2-owner")?;
    assert_eq!(sub_owner.keyid, sub.owner.keyid);

    let embedded: SignedEnvelope<Layout> = SignedEnvelope::load(&sub.layout_path)?;
    assert!(embedded.verify(&sub_owner)?);
    assert_eq!(embedded.body().step_names(), vec!["source", "test", "build"]);
    Ok(())
}
