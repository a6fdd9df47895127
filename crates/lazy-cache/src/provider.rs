//! Cache backend trait and the filesystem implementation.

use crate::object_store::{ObjectStoreBackend, S3Client};
use crate::stream::copy_with_progress;
use crate::types::{ArtifactDetails, ArtifactKeys, ProgressCallback};
use async_trait::async_trait;
use lazy_core::{BackendConfig, Compression, Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tracing::debug;

/// Storage for cache entries, keyed by build fingerprint.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Keys of the entry stored under `fingerprint`.
    fn artifact_keys(&self, fingerprint: &str) -> ArtifactKeys;

    /// Probe for an entry. `None` when nothing is stored; other failures
    /// are returned as errors.
    async fn artifact_details(&self, fingerprint: &str) -> Result<Option<ArtifactDetails>>;

    /// Fetch an entry into a new temporary file and return its path.
    /// The caller owns the file and must delete it.
    async fn get_artifact(
        &self,
        fingerprint: &str,
        progress: &ProgressCallback<'_>,
    ) -> Result<PathBuf>;

    /// Store `path` under `fingerprint`, replacing any existing entry.
    async fn store_artifact(
        &self,
        fingerprint: &str,
        path: &Path,
        progress: &ProgressCallback<'_>,
    ) -> Result<()>;

    /// Remove an entry. Not supported by any backend yet.
    async fn invalidate_artifact(&self, _fingerprint: &str) -> Result<()> {
        Err(Error::Unsupported("invalidate_artifact"))
    }
}

/// Build the backend described by `config`.
///
/// Relative filesystem cache paths are resolved against `workdir`. The S3
/// client is loaded from the standard AWS environment and credential chain.
pub async fn open_backend(config: &BackendConfig, workdir: &Path) -> Box<dyn CacheBackend> {
    match config {
        BackendConfig::Filesystem { path, compression } => {
            Box::new(FilesystemBackend::new(workdir.join(path), *compression))
        }
        BackendConfig::S3 {
            bucket,
            path,
            compression,
        } => Box::new(ObjectStoreBackend::new(
            S3Client::from_env().await,
            bucket.clone(),
            path.clone(),
            *compression,
        )),
    }
}

/// Cache stored as plain files in a local (or network-mounted) directory.
pub struct FilesystemBackend {
    root_dir: PathBuf,
    compression: Compression,
}

impl FilesystemBackend {
    pub fn new(root_dir: PathBuf, compression: Compression) -> Self {
        Self {
            root_dir,
            compression,
        }
    }

    fn archive_path(&self, fingerprint: &str) -> PathBuf {
        PathBuf::from(self.artifact_keys(fingerprint).archive)
    }
}

#[async_trait]
impl CacheBackend for FilesystemBackend {
    fn artifact_keys(&self, fingerprint: &str) -> ArtifactKeys {
        ArtifactKeys::new(
            &self.root_dir.to_string_lossy(),
            fingerprint,
            self.compression,
        )
    }

    async fn artifact_details(&self, fingerprint: &str) -> Result<Option<ArtifactDetails>> {
        let archive = self.archive_path(fingerprint);
        match tokio::fs::metadata(&archive).await {
            Ok(metadata) => Ok(Some(ArtifactDetails {
                size: metadata.len(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::path("stat", archive)(e)),
        }
    }

    async fn get_artifact(
        &self,
        fingerprint: &str,
        progress: &ProgressCallback<'_>,
    ) -> Result<PathBuf> {
        let archive = self.archive_path(fingerprint);
        let mut src = File::open(&archive)
            .await
            .map_err(Error::path("open", &archive))?;

        let (file, tmp_path) = tempfile::NamedTempFile::new()?.into_parts();
        let mut dst = File::from_std(file);
        // tmp_path deletes the download if anything below fails.
        copy_with_progress(&mut src, &mut dst, progress)
            .await
            .map_err(Error::path("copy", &archive))?;
        drop(dst);

        let local = tmp_path.keep().map_err(|e| Error::Io(e.error))?;
        debug!(archive = %archive.display(), local = %local.display(), "Fetched artifact");
        Ok(local)
    }

    async fn store_artifact(
        &self,
        fingerprint: &str,
        path: &Path,
        progress: &ProgressCallback<'_>,
    ) -> Result<()> {
        let archive = self.archive_path(fingerprint);
        let dir = archive.parent().unwrap_or(Path::new("."));
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(Error::path("create directory", dir))?;

        let mut src = File::open(path).await.map_err(Error::path("open", path))?;

        // Write to a hidden sibling and rename over the final name, so
        // readers never see a partial entry.
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = tempfile::Builder::new()
            .prefix(&format!(".{}", name))
            .tempfile_in(dir)
            .map_err(Error::path("create temporary file in", dir))?;
        let (file, tmp_path) = tmp.into_parts();
        let mut dst = File::from_std(file);

        copy_with_progress(&mut src, &mut dst, progress)
            .await
            .map_err(Error::path("write", &*tmp_path))?;
        dst.sync_all()
            .await
            .map_err(Error::path("sync", &*tmp_path))?;
        drop(dst);

        tmp_path
            .persist(&archive)
            .map_err(|e| Error::path("rename into", &archive)(e.error))?;
        debug!(archive = %archive.display(), "Stored artifact");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn backend(dir: &Path) -> FilesystemBackend {
        FilesystemBackend::new(dir.join("cache"), Compression::None)
    }

    #[tokio::test]
    async fn test_details_absent_for_unknown_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let details = backend(dir.path()).artifact_details("never-stored").await.unwrap();
        assert_eq!(details, None);
    }

    #[tokio::test]
    async fn test_store_then_details_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let source = dir.path().join("artifact.tar");
        std::fs::write(&source, vec![3u8; 20_000]).unwrap();

        let uploaded = AtomicU64::new(0);
        backend
            .store_artifact("abc", &source, &|n| {
                uploaded.fetch_add(n, Ordering::SeqCst);
            })
            .await
            .unwrap();
        assert_eq!(uploaded.load(Ordering::SeqCst), 20_000);
        assert!(dir.path().join("cache/abc.tar").is_file());

        let details = backend.artifact_details("abc").await.unwrap();
        assert_eq!(details, Some(ArtifactDetails { size: 20_000 }));

        let downloaded = AtomicU64::new(0);
        let local = backend
            .get_artifact("abc", &|n| {
                downloaded.fetch_add(n, Ordering::SeqCst);
            })
            .await
            .unwrap();
        assert_eq!(downloaded.load(Ordering::SeqCst), 20_000);
        assert_eq!(std::fs::read(&local).unwrap(), vec![3u8; 20_000]);
        std::fs::remove_file(local).unwrap();
    }

    #[tokio::test]
    async fn test_store_overwrites_existing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let source = dir.path().join("artifact.tar");

        std::fs::write(&source, b"first").unwrap();
        backend.store_artifact("abc", &source, &|_| {}).await.unwrap();
        std::fs::write(&source, b"second!").unwrap();
        backend.store_artifact("abc", &source, &|_| {}).await.unwrap();

        assert_eq!(
            std::fs::read(dir.path().join("cache/abc.tar")).unwrap(),
            b"second!"
        );
    }

    #[tokio::test]
    async fn test_failed_store_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());

        let err = backend
            .store_artifact("abc", &dir.path().join("missing.tar"), &|_| {})
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("cache"))
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
        assert_eq!(backend.artifact_details("abc").await.unwrap(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_write_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        // Opening a directory succeeds; reading from it does not.
        let source = dir.path().join("not-a-file");
        std::fs::create_dir(&source).unwrap();

        let err = backend
            .store_artifact("abc", &source, &|_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Path { operation: "write", .. }));

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("cache"))
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
        assert_eq!(backend.artifact_details("abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_missing_entry_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = backend(dir.path())
            .get_artifact("abc", &|_| {})
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_invalidate_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let err = backend(dir.path()).invalidate_artifact("abc").await.unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn test_keys_for_gzip_backend() {
        let backend = FilesystemBackend::new(PathBuf::from("/var/cache/lazy/"), Compression::Gzip);
        let keys = backend.artifact_keys("f00");
        assert_eq!(keys.archive, "/var/cache/lazy/f00.tar.gz");
        assert_eq!(keys.metadata, "/var/cache/lazy/f00.json");
    }
}
