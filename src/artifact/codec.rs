//! Binary codec for compiled artifacts.
//!
//! Format (all integers big-endian `i32`):
//! ```text
//! [magic = 0x42]
//! [len][utf8 space] [len][utf8 artifact name] [len][utf8 reflection]
//! [blob count]
//! repeated: [len][utf8 blob name] [len][blob bytes]
//! ```
//!
//! Decoding never fails loudly: a bad magic, negative length, truncated
//! field or invalid UTF-8 yields `None`, which callers treat as a miss.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use super::CompiledArtifact;

/// Leading marker of a packed artifact.
pub const MAGIC: i32 = 0x42;

fn write_len(out: &mut Vec<u8>, len: usize) {
    // Lengths beyond i32::MAX cannot be represented; saturate so the
    // reader rejects the record as truncated instead of misframing it.
    let len = i32::try_from(len).unwrap_or(i32::MAX);
    out.extend_from_slice(&len.to_be_bytes());
}

fn write_bytes(out: &mut Vec<u8>, data: &[u8]) {
    write_len(out, data.len());
    out.extend_from_slice(data);
}

/// Serializes an artifact.
#[must_use]
pub fn pack(artifact: &CompiledArtifact) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + artifact.size_estimate() as usize);
    out.extend_from_slice(&MAGIC.to_be_bytes());
    write_bytes(&mut out, artifact.space().as_bytes());
    write_bytes(&mut out, artifact.artifact_name().as_bytes());
    write_bytes(&mut out, artifact.reflection().as_bytes());
    write_len(&mut out, artifact.blobs().len());
    for (name, data) in artifact.blobs() {
        write_bytes(&mut out, name.as_bytes());
        write_bytes(&mut out, data);
    }
    out
}

fn read_i32(reader: &mut impl Read) -> Option<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).ok()?;
    Some(i32::from_be_bytes(buf))
}

fn read_bytes(reader: &mut Cursor<&[u8]>) -> Option<Vec<u8>> {
    let len = usize::try_from(read_i32(reader)?).ok()?;
    let remaining = reader.get_ref().len().saturating_sub(reader.position() as usize);
    if len > remaining {
        return None;
    }
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).ok()?;
    Some(data)
}

fn read_string(reader: &mut Cursor<&[u8]>) -> Option<String> {
    String::from_utf8(read_bytes(reader)?).ok()
}

/// Deserializes an artifact, or `None` if `bytes` is not a well-formed record.
#[must_use]
pub fn unpack(bytes: &[u8]) -> Option<CompiledArtifact> {
    let mut reader = Cursor::new(bytes);
    if read_i32(&mut reader)? != MAGIC {
        return None;
    }
    let space = read_string(&mut reader)?;
    let artifact_name = read_string(&mut reader)?;
    let reflection = read_string(&mut reader)?;
    let count = usize::try_from(read_i32(&mut reader)?).ok()?;

    let mut blobs = BTreeMap::new();
    for _ in 0..count {
        let name = read_string(&mut reader)?;
        let data = read_bytes(&mut reader)?;
        blobs.insert(name, data);
    }
    Some(CompiledArtifact::new(space, artifact_name, reflection, blobs))
}
