//! Whole-map snapshot files for [`MemoryEngine`](crate::MemoryEngine).
//!
//! On-disk format:
//! ```text
//! [4 bytes: magic "LKV1"]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [N bytes: payload (bincode-serialized SnapshotBody)]
//! ```
//!
//! Snapshots are written to a temporary file in the target directory and
//! renamed over the previous snapshot, so a crash leaves either the old or
//! the new file, never a torn one.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, EngineResult};

const MAGIC: &[u8; 4] = b"LKV1";
const HEADER_SIZE: usize = 8;
const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SnapshotBody {
    version: u32,
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

/// Load the map stored at `path`.
///
/// A missing file is an empty map.
pub fn load(path: &Path) -> EngineResult<BTreeMap<Vec<u8>, Vec<u8>>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };

    let corrupt = |reason: &str| EngineError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if bytes.len() < HEADER_SIZE || &bytes[..4] != MAGIC {
        return Err(corrupt("missing snapshot header"));
    }
    let expected = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let payload = &bytes[HEADER_SIZE..];
    let actual = crc32fast::hash(payload);
    if expected != actual {
        return Err(corrupt(&format!(
            "crc mismatch: expected {expected:#010x}, got {actual:#010x}"
        )));
    }

    let body: SnapshotBody =
        bincode::deserialize(payload).map_err(|e| EngineError::Serialization(e.to_string()))?;
    if body.version != FORMAT_VERSION {
        return Err(corrupt(&format!("unsupported version {}", body.version)));
    }

    debug!(path = %path.display(), entries = body.entries.len(), "snapshot loaded");
    Ok(body.entries)
}

/// Atomically replace the snapshot at `path` with `entries`.
pub fn save(path: &Path, entries: &BTreeMap<Vec<u8>, Vec<u8>>) -> EngineResult<()> {
    #[derive(Serialize)]
    struct BodyRef<'a> {
        version: u32,
        entries: &'a BTreeMap<Vec<u8>, Vec<u8>>,
    }

    let payload = bincode::serialize(&BodyRef {
        version: FORMAT_VERSION,
        entries,
    })
    .map_err(|e| EngineError::Serialization(e.to_string()))?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(MAGIC)?;
    tmp.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    tmp.write_all(&payload)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| EngineError::Io(e.error))?;
    Ok(())
}
