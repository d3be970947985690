//! Deployment plans.
//!
//! A plan names the versions of a space's source, the default version, and
//! an ordered list of canary stages that route document keys to versions.
//! Plans are created only by [`Plan::parse`] and are immutable afterwards,
//! so every invariant established during validation holds for the plan's
//! whole lifetime:
//!
//! - `versions` is non-empty
//! - `default_version` names a declared version
//! - every stage targets a declared version

mod routing;
mod validation;

use std::collections::{BTreeMap, BTreeSet};

use crate::error::PlanError;

pub use routing::bucket;

/// Source of one named version.
///
/// Equality is byte equality of every field; the forge reuses a previously
/// compiled version exactly when its `DeployedVersion` compares equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeployedVersion {
    /// Main DSL source.
    pub main: String,
    /// Named include sources, ordered by name.
    pub includes: BTreeMap<String, String>,
}

impl DeployedVersion {
    /// A version with no includes.
    #[must_use]
    pub fn new(main: impl Into<String>) -> Self {
        Self {
            main: main.into(),
            includes: BTreeMap::new(),
        }
    }

    /// Adds an include.
    #[must_use]
    pub fn with_include(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.includes.insert(name.into(), source.into());
        self
    }
}

/// One canary stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    /// Version selected when the stage matches.
    pub version: String,
    /// Explicit allow-list; a listed key always matches.
    pub keys: Option<BTreeSet<String>>,
    /// Keys must start with this prefix to be eligible for the percentage.
    pub prefix: String,
    /// Seed mixed into the bucket hash so stages sample independently.
    pub seed: String,
    /// Percentage of eligible keys routed to `version`.
    pub percent: f64,
}

impl Stage {
    /// Returns true if `key` is routed by this stage.
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        if self.keys.as_ref().is_some_and(|keys| keys.contains(key)) {
            return true;
        }
        if !key.starts_with(self.prefix.as_str()) {
            return false;
        }
        self.percent >= 100.0 || bucket(&self.seed, key) <= self.percent
    }
}

/// A validated deployment plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    content_hash: String,
    versions: BTreeMap<String, DeployedVersion>,
    stages: Vec<Stage>,
    default_version: String,
    instrument: bool,
}

impl Plan {
    /// Parses and validates a plan from its JSON text.
    pub fn parse(json: &str) -> Result<Self, PlanError> {
        validation::parse(json)
    }

    /// Fingerprint of the raw plan text (change detection only).
    #[must_use]
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Declared versions by name.
    #[must_use]
    pub fn versions(&self) -> &BTreeMap<String, DeployedVersion> {
        &self.versions
    }

    /// Looks up one declared version.
    #[must_use]
    pub fn version(&self, name: &str) -> Option<&DeployedVersion> {
        self.versions.get(name)
    }

    /// Canary stages in declaration order.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Version used when no stage matches.
    #[must_use]
    pub fn default_version(&self) -> &str {
        &self.default_version
    }

    /// Whether compiled versions should carry instrumentation.
    #[must_use]
    pub const fn instrument(&self) -> bool {
        self.instrument
    }

    /// Resolves the version serving `routing_key`.
    ///
    /// The first matching stage wins; if none match the default version is
    /// returned. The result is a pure function of the plan and the key.
    #[must_use]
    pub fn pick_version(&self, routing_key: &str) -> &str {
        self.stages
            .iter()
            .find(|stage| stage.matches(routing_key))
            .map_or(self.default_version.as_str(), |stage| stage.version.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(json: &str) -> Plan {
        Plan::parse(json).unwrap()
    }

    #[test]
    fn test_empty_stages_always_return_default() {
        let p = plan(r#"{"versions":{"a":"x","b":"y"},"default":"b"}"#);
        for key in ["", "doc-1", "anything", "\u{1F600}"] {
            assert_eq!(p.pick_version(key), "b");
        }
    }

    #[test]
    fn test_full_percent_with_matching_prefix_always_matches() {
        let p = plan(
            r#"{"versions":{"a":"x","b":"y"},"default":"a",
                "plan":[{"version":"b","prefix":"beta-","percent":100}]}"#,
        );
        assert_eq!(p.pick_version("beta-1"), "b");
        assert_eq!(p.pick_version("beta-zzz"), "b");
        assert_eq!(p.pick_version("prod-1"), "a");
    }

    #[test]
    fn test_allow_list_wins_even_at_zero_percent() {
        let p = plan(
            r#"{"versions":{"a":"x","b":"y"},"default":"a",
                "plan":[{"version":"b","keys":["vip"],"percent":0,"prefix":"nomatch"}]}"#,
        );
        assert_eq!(p.pick_version("vip"), "b");
        assert_eq!(p.pick_version("other"), "a");
    }

    #[test]
    fn test_first_matching_stage_wins() {
        let p = plan(
            r#"{"versions":{"a":"x","b":"y","c":"z"},"default":"a",
                "plan":[{"version":"b","keys":["k"]},{"version":"c"}]}"#,
        );
        // Both stages match "k"; the first declared one is chosen.
        assert_eq!(p.pick_version("k"), "b");
        assert_eq!(p.pick_version("other"), "c");
    }

    #[test]
    fn test_pick_version_is_deterministic() {
        let p = plan(
            r#"{"versions":{"a":"x","b":"y"},"default":"a",
                "plan":[{"version":"b","percent":37.5,"seed":"s1"}]}"#,
        );
        for i in 0..500 {
            let key = format!("doc-{i}");
            let first = p.pick_version(&key).to_string();
            assert_eq!(p.pick_version(&key), first);
        }
    }

    #[test]
    fn test_canary_distribution_splits_roughly_in_half() {
        let p = plan(
            r#"{"versions":{"x":"1","y":"2","z":"3"},"default":"z",
                "plan":[{"version":"x","percent":0,"keys":["1","2"]},
                        {"version":"y","percent":50,"prefix":""}]}"#,
        );
        assert_eq!(p.pick_version("1"), "x");
        assert_eq!(p.pick_version("2"), "x");

        let total = 20_000;
        let (mut x, mut y, mut z) = (0, 0, 0);
        for i in 0..total {
            match p.pick_version(&format!("document/{i}")) {
                "x" => x += 1,
                "y" => y += 1,
                "z" => z += 1,
                other => panic!("unexpected version {other}"),
            }
        }
        // A zero-percent stage still admits keys landing exactly on bucket 0.
        assert!(x <= 3, "zero-percent stage took {x} keys");
        assert_eq!(x + y + z, total);
        let ratio = f64::from(y) / f64::from(total);
        assert!((0.45..=0.55).contains(&ratio), "ratio was {ratio}");
    }

    #[test]
    fn test_different_seeds_sample_different_keys() {
        let a = plan(
            r#"{"versions":{"a":"x","b":"y"},"default":"a",
                "plan":[{"version":"b","percent":50,"seed":"one"}]}"#,
        );
        let b = plan(
            r#"{"versions":{"a":"x","b":"y"},"default":"a",
                "plan":[{"version":"b","percent":50,"seed":"two"}]}"#,
        );
        let differing = (0..1000)
            .map(|i| format!("k{i}"))
            .filter(|k| a.pick_version(k) != b.pick_version(k))
            .count();
        assert!(differing > 100, "seeds should decorrelate stages ({differing})");
    }
}
