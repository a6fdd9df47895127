//! Build-result cache for lazy-build.
//!
//! Fingerprints a set of input files plus a command, and stores or restores
//! the declared outputs of that command through a pluggable backend
//! (local filesystem or S3-compatible object store).

pub mod archiver;
pub mod context;
pub mod ignore;
pub mod object_store;
pub mod provider;
pub mod stream;
pub mod types;

pub use archiver::{extract_artifact, package_artifact};
pub use context::BuildContext;
pub use ignore::IgnoreMatcher;
pub use object_store::{ObjectStoreBackend, ObjectStoreClient, S3Client};
pub use provider::{CacheBackend, FilesystemBackend, open_backend};
pub use stream::copy_with_progress;
pub use types::{ArtifactDetails, ArtifactKeys, FileFingerprint, FileKind, ProgressCallback};
