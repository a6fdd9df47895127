//! Cache types.

use lazy_core::Compression;
use serde::{Deserialize, Serialize};

/// Byte-count callback invoked once per transferred chunk, in transfer order.
///
/// Borrowed for the duration of one transfer, so it may capture a shared
/// progress sink by reference.
pub type ProgressCallback<'a> = dyn Fn(u64) + Send + Sync + 'a;

/// What kind of filesystem entry a fingerprint was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Link,
}

/// Fingerprint of a single tracked path.
///
/// Regular files hash their bytes; symlinks hash their target string and are
/// never dereferenced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileFingerprint {
    pub kind: FileKind,
    pub content_hash: String,
}

/// Result of probing a backend for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactDetails {
    /// Size of the archive blob in bytes.
    pub size: u64,
}

/// Storage keys of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactKeys {
    /// The archive blob.
    pub archive: String,
    /// Metadata companion. Reserved; nothing reads or writes it yet.
    pub metadata: String,
}

impl ArtifactKeys {
    /// Derive the keys for `fingerprint` under the configured base path.
    pub fn new(base: &str, fingerprint: &str, compression: Compression) -> Self {
        let key = format!("{}/{}", base.trim_end_matches('/'), fingerprint);
        Self {
            archive: format!("{}.{}", key, compression.extension()),
            metadata: format!("{}.json", key),
        }
    }
}
