
use bincode::Options;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::{DistanceMetric, IndexEntry};
use crate::{Result, StudyError};

/// File signature of a persisted index
pub const MAGIC: [u8; 8] = *b"STUDYIDX";
/// Bumped on any incompatible change to the header or entry layout
pub const FORMAT_VERSION: u32 = 1;

/// Fixed-width bincode, rejecting trailing bytes
fn codec() -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexHeader {
    pub magic: [u8; 8],
    pub version: u32,
    pub dimension: u64,
    pub metric: DistanceMetric,
    pub entry_count: u64,
    pub next_seq: u64,
    /// Hex SHA-256 of the encoded entries
    pub checksum: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    header: IndexHeader,
    payload: Vec<u8>,
}

/// Contents of a verified index file
#[derive(Debug)]
pub struct LoadedIndex {
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub entries: Vec<IndexEntry>,
    pub next_seq: u64,
}

fn corruption(path: &Path, reason: impl Into<String>) -> StudyError {
    StudyError::IndexCorruption {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Encode the index into its on-disk byte form
#[inline]
pub fn encode(
    dimension: usize,
    metric: DistanceMetric,
    entries: &[Arc<IndexEntry>],
    next_seq: u64,
) -> Result<Vec<u8>> {
    let refs: Vec<&IndexEntry> = entries.iter().map(AsRef::as_ref).collect();
    let payload = codec()
        .serialize(&refs)
        .map_err(|e| anyhow::anyhow!("Failed to encode index entries: {}", e))?;

    let header = IndexHeader {
        magic: MAGIC,
        version: FORMAT_VERSION,
        dimension: dimension as u64,
        metric,
        entry_count: entries.len() as u64,
        next_seq,
        checksum: hex::encode(Sha256::digest(&payload)),
    };

    let bytes = codec()
        .serialize(&IndexFile { header, payload })
        .map_err(|e| anyhow::anyhow!("Failed to encode index file: {}", e))?;
    Ok(bytes)
}

/// Decode and verify bytes read from `path`
#[inline]
pub fn decode(path: &Path, bytes: &[u8]) -> Result<LoadedIndex> {
    let file: IndexFile = codec()
        .deserialize(bytes)
        .map_err(|e| corruption(path, format!("unreadable index file: {}", e)))?;
    let header = file.header;

    if header.magic != MAGIC {
        return Err(corruption(path, "not an index file (bad magic)"));
    }
    if header.version != FORMAT_VERSION {
        return Err(corruption(
            path,
            format!(
                "unsupported format version {} (expected {})",
                header.version, FORMAT_VERSION
            ),
        ));
    }

    let checksum = hex::encode(Sha256::digest(&file.payload));
    if checksum != header.checksum {
        return Err(corruption(path, "checksum mismatch"));
    }

    let entries: Vec<IndexEntry> = codec()
        .deserialize(&file.payload)
        .map_err(|e| corruption(path, format!("unreadable entries: {}", e)))?;

    if entries.len() as u64 != header.entry_count {
        return Err(corruption(
            path,
            format!(
                "header declares {} entries, payload holds {}",
                header.entry_count,
                entries.len()
            ),
        ));
    }

    let dimension = usize::try_from(header.dimension)
        .map_err(|_| corruption(path, "dimension out of range"))?;

    let mut previous_seq = None;
    for entry in &entries {
        if entry.vector.len() != dimension {
            return Err(corruption(
                path,
                format!(
                    "entry {} has {} dimensions, header declares {}",
                    entry.seq,
                    entry.vector.len(),
                    dimension
                ),
            ));
        }
        if previous_seq.is_some_and(|prev| entry.seq <= prev) || entry.seq >= header.next_seq {
            return Err(corruption(path, "entries out of insertion order"));
        }
        if entry.chunk.document_id != entry.document.id {
            return Err(corruption(
                path,
                format!("entry {} belongs to two documents", entry.seq),
            ));
        }
        previous_seq = Some(entry.seq);
    }

    Ok(LoadedIndex {
        dimension,
        metric: header.metric,
        entries,
        next_seq: header.next_seq,
    })
}

/// Write the index to `path` through a temporary sibling and a rename
#[inline]
pub fn write_index(
    path: &Path,
    dimension: usize,
    metric: DistanceMetric,
    entries: &[Arc<IndexEntry>],
    next_seq: u64,
) -> Result<()> {
    let bytes = encode(dimension, metric, entries, next_seq)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = temp_path(path);
    if let Err(e) = write_and_rename(&tmp, path, &bytes) {
        // best effort; the original file is untouched either way
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }

    debug!(
        "Wrote {} entries ({} bytes) to {}",
        entries.len(),
        bytes.len(),
        path.display()
    );
    Ok(())
}

fn write_and_rename(tmp: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(tmp, path)
}

/// Read and verify the index stored at `path`
#[inline]
pub fn read_index(path: &Path) -> Result<LoadedIndex> {
    let bytes = fs::read(path)?;
    let loaded = decode(path, &bytes)?;
    info!(
        "Loaded {} entries from {}",
        loaded.entries.len(),
        path.display()
    );
    Ok(loaded)
}
