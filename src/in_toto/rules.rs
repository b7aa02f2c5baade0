//! # Artifact rules
//!
//! The artifact-flow language of in-toto layouts. A step declares an ordered
//! list of rules for its materials and another for its products. On the wire
//! each rule is a list of strings:
//!
//! ```text
//! ["CREATE", "<pattern>"]
//! ["DELETE", "<pattern>"]
//! ["MODIFY", "<pattern>"]
//! ["ALLOW", "<pattern>"]
//! ["DISALLOW", "<pattern>"]
//! ["REQUIRE", "<path>"]
//! ["MATCH", "<pattern>", ["IN", "<prefix>"], "WITH", "PRODUCTS"|"MATERIALS",
//!  ["IN", "<prefix>"], "FROM", "<step>"]
//! ```
//!
//! [`evaluate`] applies a rule list the way a verifier does: rules run in
//! declared order against a queue of paths, each rule consumes the paths it
//! accounts for, and a `DISALLOW` fails on anything still queued that it
//! matches. The generator never verifies bundles itself; the evaluator exists
//! so that emitted rule lists can be checked for closure and consistency.
//!
//! ## Examples
//!
//! ```
//! use supply_chain_stress::in_toto::rules::ArtifactRule;
//!
//! let rule: ArtifactRule = "MATCH foo.tar WITH PRODUCTS FROM build".parse().unwrap();
//! assert_eq!(rule.to_string(), "MATCH foo.tar WITH PRODUCTS FROM build");
//! ```

use crate::error::{Error, Result};
use crate::hash::{DigestSet, digest_sets_match};
use globset::{GlobBuilder, GlobMatcher};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Pattern matching every path.
pub const WILDCARD: &str = "*";

/// Which artifact set of a step a rule list or cross-reference addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Materials,
    Products,
}

impl Direction {
    pub fn keyword(&self) -> &'static str {
        match self {
            Direction::Materials => "MATERIALS",
            Direction::Products => "PRODUCTS",
        }
    }
}

/// Target of a `MATCH` rule: the step and artifact set whose digests must match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CrossRef {
    pub step: String,
    pub direction: Direction,
    pub source_prefix: Option<String>,
    pub destination_prefix: Option<String>,
}

impl CrossRef {
    pub fn new(step: impl Into<String>, direction: Direction) -> Self {
        Self {
            step: step.into(),
            direction,
            source_prefix: None,
            destination_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    Create,
    Delete,
    Modify,
    Allow,
    Disallow,
    Require,
    Match,
}

impl RuleKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            RuleKind::Create => "CREATE",
            RuleKind::Delete => "DELETE",
            RuleKind::Modify => "MODIFY",
            RuleKind::Allow => "ALLOW",
            RuleKind::Disallow => "DISALLOW",
            RuleKind::Require => "REQUIRE",
            RuleKind::Match => "MATCH",
        }
    }
}

/// One rule of the artifact-flow language.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub enum ArtifactRule {
    Create(String),
    Delete(String),
    Modify(String),
    Allow(String),
    Disallow(String),
    Require(String),
    Match { pattern: String, cross_ref: CrossRef },
}

impl ArtifactRule {
    pub fn create(pattern: impl Into<String>) -> Self {
        ArtifactRule::Create(pattern.into())
    }

    pub fn allow(pattern: impl Into<String>) -> Self {
        ArtifactRule::Allow(pattern.into())
    }

    pub fn disallow(pattern: impl Into<String>) -> Self {
        ArtifactRule::Disallow(pattern.into())
    }

    /// `MATCH <pattern> WITH <direction> FROM <step>`
    pub fn match_from(
        pattern: impl Into<String>,
        direction: Direction,
        step: impl Into<String>,
    ) -> Self {
        ArtifactRule::Match {
            pattern: pattern.into(),
            cross_ref: CrossRef::new(step, direction),
        }
    }

    pub fn kind(&self) -> RuleKind {
        match self {
            ArtifactRule::Create(_) => RuleKind::Create,
            ArtifactRule::Delete(_) => RuleKind::Delete,
            ArtifactRule::Modify(_) => RuleKind::Modify,
            ArtifactRule::Allow(_) => RuleKind::Allow,
            ArtifactRule::Disallow(_) => RuleKind::Disallow,
            ArtifactRule::Require(_) => RuleKind::Require,
            ArtifactRule::Match { .. } => RuleKind::Match,
        }
    }

    pub fn pattern(&self) -> &str {
        match self {
            ArtifactRule::Create(p)
            | ArtifactRule::Delete(p)
            | ArtifactRule::Modify(p)
            | ArtifactRule::Allow(p)
            | ArtifactRule::Disallow(p)
            | ArtifactRule::Require(p) => p,
            ArtifactRule::Match { pattern, .. } => pattern,
        }
    }

    pub fn cross_ref(&self) -> Option<&CrossRef> {
        match self {
            ArtifactRule::Match { cross_ref, .. } => Some(cross_ref),
            _ => None,
        }
    }

    /// True for `ALLOW *` and `DISALLOW *`, which leave no path unclassified.
    pub fn is_catch_all(&self) -> bool {
        matches!(self, ArtifactRule::Allow(p) | ArtifactRule::Disallow(p) if p == WILDCARD)
    }

    fn to_tokens(&self) -> Vec<String> {
        let mut tokens = vec![self.kind().keyword().to_string(), self.pattern().to_string()];
        if let Some(cross_ref) = self.cross_ref() {
            if let Some(prefix) = &cross_ref.source_prefix {
                tokens.extend(["IN".to_string(), prefix.clone()]);
            }
            tokens.extend(["WITH".to_string(), cross_ref.direction.keyword().to_string()]);
            if let Some(prefix) = &cross_ref.destination_prefix {
                tokens.extend(["IN".to_string(), prefix.clone()]);
            }
            tokens.extend(["FROM".to_string(), cross_ref.step.clone()]);
        }
        tokens
    }

    fn from_tokens(tokens: &[String]) -> Result<Self> {
        let invalid = || Error::Policy(format!("Invalid artifact rule: {tokens:?}"));

        let (keyword, rest) = tokens.split_first().ok_or_else(invalid)?;
        let keyword = keyword.to_ascii_uppercase();

        if keyword != "MATCH" {
            let [pattern] = rest else {
                return Err(invalid());
            };
            let pattern = pattern.clone();
            return match keyword.as_str() {
                "CREATE" => Ok(ArtifactRule::Create(pattern)),
                "DELETE" => Ok(ArtifactRule::Delete(pattern)),
                "MODIFY" => Ok(ArtifactRule::Modify(pattern)),
                "ALLOW" => Ok(ArtifactRule::Allow(pattern)),
                "DISALLOW" => Ok(ArtifactRule::Disallow(pattern)),
                "REQUIRE" => Ok(ArtifactRule::Require(pattern)),
                _ => Err(invalid()),
            };
        }

        let pattern = rest.first().ok_or_else(invalid)?.clone();
        let keyword_at =
            |i: usize, kw: &str| rest.get(i).is_some_and(|t| t.eq_ignore_ascii_case(kw));

        let mut i = 1;
        let mut source_prefix = None;
        if keyword_at(i, "IN") {
            source_prefix = Some(rest.get(i + 1).ok_or_else(invalid)?.clone());
            i += 2;
        }
        if !keyword_at(i, "WITH") {
            return Err(invalid());
        }
        let direction = match rest.get(i + 1).map(|t| t.to_ascii_uppercase()).as_deref() {
            Some("PRODUCTS") => Direction::Products,
            Some("MATERIALS") => Direction::Materials,
            _ => return Err(invalid()),
        };
        i += 2;
        let mut destination_prefix = None;
        if keyword_at(i, "IN") {
            destination_prefix = Some(rest.get(i + 1).ok_or_else(invalid)?.clone());
            i += 2;
        }
        if !keyword_at(i, "FROM") || rest.len() != i + 2 {
            return Err(invalid());
        }
        let step = rest[i + 1].clone();

        Ok(ArtifactRule::Match {
            pattern,
            cross_ref: CrossRef {
                step,
                direction,
                source_prefix,
                destination_prefix,
            },
        })
    }
}

impl TryFrom<Vec<String>> for ArtifactRule {
    type Error = Error;

    fn try_from(tokens: Vec<String>) -> Result<Self> {
        Self::from_tokens(&tokens)
    }
}

impl From<ArtifactRule> for Vec<String> {
    fn from(rule: ArtifactRule) -> Self {
        rule.to_tokens()
    }
}

impl FromStr for ArtifactRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let tokens: Vec<String> = s.split_whitespace().map(str::to_string).collect();
        Self::from_tokens(&tokens)
    }
}

impl fmt::Display for ArtifactRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_tokens().join(" "))
    }
}

/// Append the closing `DISALLOW *` unless the list already ends with it.
pub fn close(mut rules: Vec<ArtifactRule>) -> Vec<ArtifactRule> {
    if rules.last() != Some(&ArtifactRule::disallow(WILDCARD)) {
        rules.push(ArtifactRule::disallow(WILDCARD));
    }
    rules
}

/// A list is closed when its last rule is a catch-all.
pub fn is_closed(rules: &[ArtifactRule]) -> bool {
    rules.last().is_some_and(ArtifactRule::is_catch_all)
}

/// Recorded artifacts of one step execution.
#[derive(Debug, Clone, Copy)]
pub struct Artifacts<'a> {
    pub materials: &'a BTreeMap<String, DigestSet>,
    pub products: &'a BTreeMap<String, DigestSet>,
}

impl<'a> Artifacts<'a> {
    pub fn get(&self, direction: Direction) -> &'a BTreeMap<String, DigestSet> {
        match direction {
            Direction::Materials => self.materials,
            Direction::Products => self.products,
        }
    }
}

/// How evaluation classified a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Consumed by `ALLOW`.
    Allowed,
    /// Consumed by a rule that constrains it (`CREATE`, `DELETE`, `MODIFY`, `MATCH`).
    Required,
    /// Matched a `DISALLOW` while still queued.
    Disallowed,
    /// No rule accounted for the path.
    Unclassified,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RuleReport {
    pub dispositions: BTreeMap<String, Disposition>,
    /// Paths named by `REQUIRE` that were absent.
    pub missing: Vec<String>,
}

impl RuleReport {
    pub fn passed(&self) -> bool {
        self.missing.is_empty()
            && !self
                .dispositions
                .values()
                .any(|d| *d == Disposition::Disallowed)
    }

    pub fn paths_with(&self, disposition: Disposition) -> Vec<&str> {
        self.dispositions
            .iter()
            .filter(|(_, d)| **d == disposition)
            .map(|(p, _)| p.as_str())
            .collect()
    }
}

fn matcher(pattern: &str) -> Result<GlobMatcher> {
    // fnmatch semantics: `*` also crosses `/`
    let glob = GlobBuilder::new(pattern)
        .literal_separator(false)
        .build()
        .map_err(|e| Error::Policy(format!("Invalid rule pattern {pattern:?}: {e}")))?;
    Ok(glob.compile_matcher())
}

/// Apply `rules` to the `direction` artifact set of `own`.
///
/// `others` maps step names to their recorded artifacts for `MATCH` lookups. A
/// `MATCH` naming a step absent from `others` consumes nothing.
pub fn evaluate(
    rules: &[ArtifactRule],
    direction: Direction,
    own: Artifacts<'_>,
    others: &BTreeMap<String, Artifacts<'_>>,
) -> Result<RuleReport> {
    let mut queue: BTreeSet<&str> = own.get(direction).keys().map(String::as_str).collect();
    let mut report = RuleReport::default();

    for rule in rules {
        let glob = matcher(rule.pattern())?;
        let filtered: Vec<&str> = queue.iter().copied().filter(|p| glob.is_match(p)).collect();

        let (consumed, disposition): (Vec<&str>, Disposition) = match rule {
            ArtifactRule::Create(_) => (
                filtered
                    .into_iter()
                    .filter(|p| !own.materials.contains_key(*p) && own.products.contains_key(*p))
                    .collect(),
                Disposition::Required,
            ),
            ArtifactRule::Delete(_) => (
                filtered
                    .into_iter()
                    .filter(|p| own.materials.contains_key(*p) && !own.products.contains_key(*p))
                    .collect(),
                Disposition::Required,
            ),
            ArtifactRule::Modify(_) => (
                filtered
                    .into_iter()
                    .filter(|p| match (own.materials.get(*p), own.products.get(*p)) {
                        (Some(before), Some(after)) => !digest_sets_match(before, after),
                        _ => false,
                    })
                    .collect(),
                Disposition::Required,
            ),
            ArtifactRule::Allow(_) => (filtered, Disposition::Allowed),
            ArtifactRule::Disallow(_) => (filtered, Disposition::Disallowed),
            ArtifactRule::Require(path) => {
                if !queue.contains(path.as_str()) {
                    report.missing.push(path.clone());
                }
                continue;
            }
            ArtifactRule::Match { cross_ref, .. } => {
                let own_set = own.get(direction);
                let target = others.get(&cross_ref.step).map(|a| a.get(cross_ref.direction));
                let consumed = filtered
                    .into_iter()
                    .filter(|p| {
                        let Some(target) = target else {
                            return false;
                        };
                        let Some(dest) = rebase(p, cross_ref) else {
                            return false;
                        };
                        match (own_set.get(*p), target.get(&dest)) {
                            (Some(ours), Some(theirs)) => digest_sets_match(ours, theirs),
                            _ => false,
                        }
                    })
                    .collect();
                (consumed, Disposition::Required)
            }
        };

        for path in consumed {
            queue.remove(path);
            report.dispositions.insert(path.to_string(), disposition);
        }
    }

    for path in queue {
        report
            .dispositions
            .insert(path.to_string(), Disposition::Unclassified);
    }

    Ok(report)
}

// Map a path under the rule's source prefix to the corresponding path under
// the destination prefix.
fn rebase(path: &str, cross_ref: &CrossRef) -> Option<String> {
    let relative = match &cross_ref.source_prefix {
        Some(prefix) => path
            .strip_prefix(prefix.trim_end_matches('/'))?
            .strip_prefix('/')?,
        None => path,
    };
    Some(match &cross_ref.destination_prefix {
        Some(prefix) => format!("{}/{relative}", prefix.trim_end_matches('/')),
        None => relative.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(hex_byte: &str) -> DigestSet {
        DigestSet::from([("sha256".to_string(), hex_byte.repeat(32))])
    }

    fn set(entries: &[(&str, &str)]) -> BTreeMap<String, DigestSet> {
        entries
            .iter()
            .map(|(p, d)| (p.to_string(), digest(d)))
            .collect()
    }

    fn rules(lines: &[&str]) -> Vec<ArtifactRule> {
        lines.iter().map(|l| l.parse().unwrap()).collect()
    }

    #[test]
    fn test_parse_and_display_simple_rules() {
        for line in [
            "CREATE foo",
            "DELETE foo",
            "MODIFY foo",
            "ALLOW *",
            "DISALLOW *.tmp",
            "REQUIRE foo",
        ] {
            let rule: ArtifactRule = line.parse().unwrap();
            assert_eq!(rule.to_string(), line);
        }
    }

    #[test]
    fn test_parse_match_with_prefixes() {
        let rule: ArtifactRule = "MATCH * IN src WITH PRODUCTS IN dist FROM build"
            .parse()
            .unwrap();
        let cross_ref = rule.cross_ref().unwrap();
        assert_eq!(cross_ref.step, "build");
        assert_eq!(cross_ref.direction, Direction::Products);
        assert_eq!(cross_ref.source_prefix.as_deref(), Some("src"));
        assert_eq!(cross_ref.destination_prefix.as_deref(), Some("dist"));
        assert_eq!(
            rule.to_string(),
            "MATCH * IN src WITH PRODUCTS IN dist FROM build"
        );
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        let rule: ArtifactRule = "match foo with materials from test".parse().unwrap();
        assert_eq!(rule, ArtifactRule::match_from("foo", Direction::Materials, "test"));
    }

    #[test]
    fn test_parse_rejects_malformed_rules() {
        for line in [
            "",
            "CREATE",
            "CREATE a b",
            "EXPLODE foo",
            "MATCH foo",
            "MATCH foo WITH THINGS FROM x",
            "MATCH foo WITH PRODUCTS x",
            "MATCH foo WITH PRODUCTS FROM",
            "MATCH foo WITH PRODUCTS FROM x extra",
        ] {
            assert!(line.parse::<ArtifactRule>().is_err(), "{line:?} should fail");
        }
    }

    #[test]
    fn test_wire_form_is_list_of_strings() {
        let rule = ArtifactRule::match_from("a.src", Direction::Products, "source");
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(
            json,
            serde_json::json!(["MATCH", "a.src", "WITH", "PRODUCTS", "FROM", "source"])
        );
        let back: ArtifactRule = serde_json::from_value(json).unwrap();
        assert_eq!(back, rule);
    }

    #[test]
    fn test_close_is_idempotent() {
        let closed = close(vec![ArtifactRule::create("x")]);
        assert_eq!(closed.len(), 2);
        assert!(is_closed(&closed));
        assert_eq!(close(closed.clone()), closed);
        assert!(!is_closed(&[]));
        assert!(!is_closed(&[ArtifactRule::disallow("*.tmp")]));
    }

    #[test]
    fn test_create_consumes_new_products() -> Result<()> {
        let materials = set(&[]);
        let products = set(&[("a.src", "aa")]);
        let own = Artifacts {
            materials: &materials,
            products: &products,
        };

        let report = evaluate(
            &rules(&["CREATE a.src", "DISALLOW *"]),
            Direction::Products,
            own,
            &BTreeMap::new(),
        )?;
        assert!(report.passed());
        assert_eq!(report.dispositions["a.src"], Disposition::Required);
        Ok(())
    }

    #[test]
    fn test_create_does_not_consume_existing_material() -> Result<()> {
        let materials = set(&[("a.src", "aa")]);
        let products = set(&[("a.src", "aa")]);
        let own = Artifacts {
            materials: &materials,
            products: &products,
        };

        let report = evaluate(
            &rules(&["CREATE a.src", "DISALLOW *"]),
            Direction::Products,
            own,
            &BTreeMap::new(),
        )?;
        assert!(!report.passed());
        assert_eq!(report.paths_with(Disposition::Disallowed), vec!["a.src"]);
        Ok(())
    }

    #[test]
    fn test_modify_and_delete() -> Result<()> {
        let materials = set(&[("changed", "aa"), ("gone", "bb"), ("same", "cc")]);
        let products = set(&[("changed", "dd"), ("same", "cc")]);
        let own = Artifacts {
            materials: &materials,
            products: &products,
        };

        let report = evaluate(
            &rules(&["MODIFY *", "ALLOW same", "DISALLOW *"]),
            Direction::Products,
            own,
            &BTreeMap::new(),
        )?;
        assert!(report.passed());
        assert_eq!(report.dispositions["changed"], Disposition::Required);
        assert_eq!(report.dispositions["same"], Disposition::Allowed);

        let report = evaluate(
            &rules(&["DELETE gone", "ALLOW *"]),
            Direction::Materials,
            own,
            &BTreeMap::new(),
        )?;
        assert!(report.passed());
        assert_eq!(report.dispositions["gone"], Disposition::Required);
        Ok(())
    }

    #[test]
    fn test_first_match_wins() -> Result<()> {
        let materials = set(&[]);
        let products = set(&[("a.log", "aa")]);
        let own = Artifacts {
            materials: &materials,
            products: &products,
        };

        let allowed_first = evaluate(
            &rules(&["ALLOW *.log", "DISALLOW *"]),
            Direction::Products,
            own,
            &BTreeMap::new(),
        )?;
        assert!(allowed_first.passed());

        let disallowed_first = evaluate(
            &rules(&["DISALLOW *", "ALLOW *.log"]),
            Direction::Products,
            own,
            &BTreeMap::new(),
        )?;
        assert!(!disallowed_first.passed());
        Ok(())
    }

    #[test]
    fn test_match_threads_artifacts_between_steps() -> Result<()> {
        let empty = set(&[]);
        let source_products = set(&[("a.src", "aa")]);
        let mut others = BTreeMap::new();
        others.insert(
            "source".to_string(),
            Artifacts {
                materials: &empty,
                products: &source_products,
            },
        );

        let good = set(&[("a.src", "aa")]);
        let report = evaluate(
            &rules(&["MATCH a.src WITH PRODUCTS FROM source", "DISALLOW *"]),
            Direction::Materials,
            Artifacts {
                materials: &good,
                products: &empty,
            },
            &others,
        )?;
        assert!(report.passed());

        let tampered = set(&[("a.src", "ff")]);
        let report = evaluate(
            &rules(&["MATCH a.src WITH PRODUCTS FROM source", "DISALLOW *"]),
            Direction::Materials,
            Artifacts {
                materials: &tampered,
                products: &empty,
            },
            &others,
        )?;
        assert!(!report.passed());
        Ok(())
    }

    #[test]
    fn test_match_with_prefixes_and_unknown_step() -> Result<()> {
        let empty = set(&[]);
        let upstream = set(&[("dist/app", "aa")]);
        let mut others = BTreeMap::new();
        others.insert(
            "build".to_string(),
            Artifacts {
                materials: &empty,
                products: &upstream,
            },
        );
        let ours = set(&[("pkg/app", "aa")]);
        let own = Artifacts {
            materials: &ours,
            products: &empty,
        };

        let report = evaluate(
            &rules(&["MATCH * IN pkg WITH PRODUCTS IN dist FROM build", "DISALLOW *"]),
            Direction::Materials,
            own,
            &others,
        )?;
        assert!(report.passed());

        let report = evaluate(
            &rules(&["MATCH * WITH PRODUCTS FROM nowhere", "DISALLOW *"]),
            Direction::Materials,
            own,
            &others,
        )?;
        assert!(!report.passed());
        Ok(())
    }

    #[test]
    fn test_require_and_unclassified() -> Result<()> {
        let empty = set(&[]);
        let products = set(&[("present", "aa"), ("stray", "bb")]);
        let own = Artifacts {
            materials: &empty,
            products: &products,
        };

        let report = evaluate(
            &rules(&["REQUIRE present", "REQUIRE absent", "CREATE present"]),
            Direction::Products,
            own,
            &BTreeMap::new(),
        )?;
        assert_eq!(report.missing, vec!["absent".to_string()]);
        assert_eq!(report.dispositions["stray"], Disposition::Unclassified);
        assert!(!report.passed());
        Ok(())
    }

    #[test]
    fn test_wildcard_crosses_directories() -> Result<()> {
        let empty = set(&[]);
        let products = set(&[("artifacts/deep/x.tar", "aa")]);
        let report = evaluate(
            &rules(&["ALLOW artifacts/*"]),
            Direction::Products,
            Artifacts {
                materials: &empty,
                products: &products,
            },
            &BTreeMap::new(),
        )?;
        assert_eq!(
            report.dispositions["artifacts/deep/x.tar"],
            Disposition::Allowed
        );
        Ok(())
    }
}
