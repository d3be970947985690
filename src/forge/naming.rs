//! Content-addressed artifact names.
//!
//! `<normalized space>_<blake3 hex>`: identical version source built with
//! the same instrument flag always yields the same name, which is what lets
//! the compile cache and the external store serve redeploys.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{HostError, HostResult};
use crate::plan::DeployedVersion;

static NON_IDENT: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

fn non_ident() -> HostResult<&'static Regex> {
    NON_IDENT
        .get_or_init(|| Regex::new("[^a-z0-9]"))
        .as_ref()
        .map_err(|e| HostError::internal(format!("space name pattern: {e}")))
}

/// Lowercases `space` and maps every character outside `[a-z0-9]` to `_`.
pub fn normalize_space(space: &str) -> HostResult<String> {
    let lowered = space.to_ascii_lowercase();
    Ok(non_ident()?.replace_all(&lowered, "_").into_owned())
}

/// Digest of a version's sources: main first, then includes by name, then
/// the instrument flag.
///
/// Every piece is length-prefixed so that moving bytes between adjacent
/// pieces changes the digest. Instrumented and plain builds generate
/// different code, so they never share a name.
#[must_use]
pub fn source_digest(version: &DeployedVersion, instrument: bool) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    let mut piece = |bytes: &[u8]| {
        hasher.update(&(bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    };
    piece(version.main.as_bytes());
    for (name, source) in &version.includes {
        piece(name.as_bytes());
        piece(source.as_bytes());
    }
    piece(&[u8::from(instrument)]);
    hasher.finalize()
}

/// Artifact name for `version` deployed into `space`.
pub fn artifact_name(space: &str, version: &DeployedVersion, instrument: bool) -> HostResult<String> {
    Ok(format!(
        "{}_{}",
        normalize_space(space)?,
        source_digest(version, instrument).to_hex()
    ))
}
