//! Plan parsing and validation.
//!
//! Plans are walked as a `serde_json::Value` rather than derived through
//! serde so that each failure maps to its own `PlanError` variant.

use std::collections::{BTreeMap, BTreeSet};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map, Value};

use crate::error::PlanError;

use super::{DeployedVersion, Plan, Stage};

const TOP_LEVEL_FIELDS: &[&str] = &["instrument", "versions", "default", "plan"];
const VERSION_FIELDS: &[&str] = &["main", "includes"];
const STAGE_FIELDS: &[&str] = &["version", "keys", "prefix", "seed", "percent"];

fn reject_unknown(path: &str, obj: &Map<String, Value>, allowed: &[&str]) -> Result<(), PlanError> {
    match obj.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(field) => Err(PlanError::UnknownField {
            path: path.to_string(),
            field: field.clone(),
        }),
        None => Ok(()),
    }
}

fn expect_object<'a>(path: &str, value: &'a Value) -> Result<&'a Map<String, Value>, PlanError> {
    value.as_object().ok_or_else(|| PlanError::WrongShape {
        path: path.to_string(),
        expected: "object",
    })
}

fn expect_str<'a>(path: &str, value: &'a Value) -> Result<&'a str, PlanError> {
    value.as_str().ok_or_else(|| PlanError::WrongShape {
        path: path.to_string(),
        expected: "string",
    })
}

fn optional_str(path: &str, obj: &Map<String, Value>, field: &str) -> Result<String, PlanError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(v) => expect_str(&format!("{path}.{field}"), v).map(str::to_string),
    }
}

fn parse_version(name: &str, value: &Value) -> Result<DeployedVersion, PlanError> {
    let path = format!("versions.{name}");
    if let Some(main) = value.as_str() {
        return Ok(DeployedVersion::new(main));
    }

    let Some(obj) = value.as_object() else {
        return Err(PlanError::WrongShape {
            path,
            expected: "string or object",
        });
    };
    reject_unknown(&path, obj, VERSION_FIELDS)?;

    let main = match obj.get("main") {
        Some(v) => expect_str(&format!("{path}.main"), v)?.to_string(),
        None => {
            return Err(PlanError::WrongShape {
                path: format!("{path}.main"),
                expected: "string",
            })
        }
    };

    let mut includes = BTreeMap::new();
    if let Some(raw) = obj.get("includes") {
        let inc_path = format!("{path}.includes");
        for (inc_name, source) in expect_object(&inc_path, raw)? {
            let source = expect_str(&format!("{inc_path}.{inc_name}"), source)?;
            includes.insert(inc_name.clone(), source.to_string());
        }
    }

    Ok(DeployedVersion { main, includes })
}

fn parse_stage(
    index: usize,
    value: &Value,
    versions: &BTreeMap<String, DeployedVersion>,
) -> Result<Stage, PlanError> {
    let path = format!("plan[{index}]");
    let obj = expect_object(&path, value)?;
    reject_unknown(&path, obj, STAGE_FIELDS)?;

    let version = match obj.get("version") {
        Some(v) => expect_str(&format!("{path}.version"), v)?.to_string(),
        None => {
            return Err(PlanError::WrongShape {
                path: format!("{path}.version"),
                expected: "string",
            })
        }
    };
    if !versions.contains_key(&version) {
        return Err(PlanError::UnknownStageVersion { index, version });
    }

    let keys = match obj.get("keys") {
        None | Some(Value::Null) => None,
        Some(raw) => {
            let keys_path = format!("{path}.keys");
            let arr = raw.as_array().ok_or_else(|| PlanError::WrongShape {
                path: keys_path.clone(),
                expected: "array of strings",
            })?;
            let mut set = BTreeSet::new();
            for key in arr {
                set.insert(expect_str(&keys_path, key)?.to_string());
            }
            Some(set)
        }
    };

    let percent = match obj.get("percent") {
        None | Some(Value::Null) => 100.0,
        Some(raw) => raw.as_f64().ok_or_else(|| PlanError::WrongShape {
            path: format!("{path}.percent"),
            expected: "number",
        })?,
    };

    Ok(Stage {
        version,
        keys,
        prefix: optional_str(&path, obj, "prefix")?,
        seed: optional_str(&path, obj, "seed")?,
        percent,
    })
}

/// Fingerprint of the raw plan text.
pub(super) fn content_hash(text: &str) -> String {
    STANDARD.encode(blake3::hash(text.as_bytes()).as_bytes())
}

pub(super) fn parse(text: &str) -> Result<Plan, PlanError> {
    let root: Value = serde_json::from_str(text).map_err(|e| PlanError::Malformed {
        reason: e.to_string(),
    })?;
    let obj = expect_object("$", &root)?;
    reject_unknown("$", obj, TOP_LEVEL_FIELDS)?;

    let instrument = match obj.get("instrument") {
        None | Some(Value::Null) => false,
        Some(v) => v.as_bool().ok_or_else(|| PlanError::WrongShape {
            path: "instrument".to_string(),
            expected: "bool",
        })?,
    };

    let raw_versions = match obj.get("versions") {
        None | Some(Value::Null) => return Err(PlanError::MissingVersions),
        Some(v) => expect_object("versions", v)?,
    };
    if raw_versions.is_empty() {
        return Err(PlanError::EmptyVersions);
    }
    let mut versions = BTreeMap::new();
    for (name, value) in raw_versions {
        versions.insert(name.clone(), parse_version(name, value)?);
    }

    let default_version = match obj.get("default") {
        None | Some(Value::Null) => return Err(PlanError::MissingDefault),
        Some(v) => expect_str("default", v)?.to_string(),
    };
    if !versions.contains_key(&default_version) {
        return Err(PlanError::UnknownDefault {
            version: default_version,
        });
    }

    let stages = match obj.get("plan") {
        None | Some(Value::Null) => Vec::new(),
        Some(raw) => {
            let arr = raw.as_array().ok_or_else(|| PlanError::WrongShape {
                path: "plan".to_string(),
                expected: "array",
            })?;
            arr.iter()
                .enumerate()
                .map(|(index, stage)| parse_stage(index, stage, &versions))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    Ok(Plan {
        content_hash: content_hash(text),
        versions,
        stages,
        default_version,
        instrument,
    })
}
