//! Build context construction and fingerprinting.

use crate::ignore::IgnoreMatcher;
use crate::types::{FileFingerprint, FileKind};
use lazy_core::{Config, Error, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Component, Path};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Hex-encoded SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

impl FileFingerprint {
    /// Fingerprint a path without following it if it is a symlink.
    pub fn from_path(path: &Path) -> Result<Self> {
        let metadata = std::fs::symlink_metadata(path).map_err(Error::path("stat", path))?;
        if metadata.file_type().is_symlink() {
            let target = std::fs::read_link(path).map_err(Error::path("read link", path))?;
            Ok(Self {
                kind: FileKind::Link,
                content_hash: sha256_hex(&link_target_bytes(&target)),
            })
        } else {
            let contents = std::fs::read(path).map_err(Error::path("read", path))?;
            Ok(Self {
                kind: FileKind::File,
                content_hash: sha256_hex(&contents),
            })
        }
    }
}

#[cfg(unix)]
fn link_target_bytes(target: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    target.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn link_target_bytes(target: &Path) -> Vec<u8> {
    target.to_string_lossy().into_owned().into_bytes()
}

/// The command being cached plus the fingerprints of every tracked file,
/// keyed by path relative to the working directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BuildContext {
    pub command: Vec<String>,
    pub files: BTreeMap<String, FileFingerprint>,
}

impl BuildContext {
    /// Walk every context root in `config` and fingerprint what it contains.
    ///
    /// Roots are resolved to their real path once. Below a root, symlinks are
    /// recorded as links and never followed, and ignored paths are pruned
    /// along with everything beneath them.
    pub fn build(config: &Config) -> Result<Self> {
        let base = config
            .workdir
            .canonicalize()
            .map_err(Error::path("resolve", &config.workdir))?;
        let ignore = IgnoreMatcher::new(&config.ignore)?;
        let mut files = BTreeMap::new();

        for root in &config.context {
            let real = base.join(root).canonicalize().map_err(|e| {
                Error::Configuration(format!(
                    "context path {} cannot be resolved: {}",
                    root.display(),
                    e
                ))
            })?;
            let file_type = std::fs::symlink_metadata(&real)
                .map_err(Error::path("stat", &real))?
                .file_type();
            if !file_type.is_file() && !file_type.is_dir() {
                return Err(Error::Configuration(format!(
                    "context path {} is neither a file nor a directory",
                    root.display()
                )));
            }
            collect_files(&base, &real, &ignore, &mut files)?;
        }

        debug!(files = files.len(), "Built context");
        Ok(Self {
            command: config.command.clone(),
            files,
        })
    }

    /// The cache key for this context.
    ///
    /// Hashes the JSON form of `(command, files)`; `files` is a sorted map,
    /// so discovery order never affects the result.
    pub fn fingerprint(&self) -> String {
        let serialized =
            serde_json::to_vec(self).expect("string-keyed maps always serialize to JSON");
        sha256_hex(&serialized)
    }
}

fn collect_files(
    base: &Path,
    root: &Path,
    ignore: &IgnoreMatcher,
    files: &mut BTreeMap<String, FileFingerprint>,
) -> Result<()> {
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !ignore.should_ignore(&relative_key(base, entry.path())));

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            Error::Path {
                operation: "walk",
                path,
                source: e.into(),
            }
        })?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }

        let key = relative_key(base, entry.path());
        if files.contains_key(&key) {
            continue;
        }
        if !file_type.is_file() && !file_type.is_symlink() {
            warn!(path = %key, "Skipping special file");
            continue;
        }

        let fingerprint = FileFingerprint::from_path(entry.path())?;
        debug!(path = %key, kind = ?fingerprint.kind, "Fingerprinted");
        files.insert(key, fingerprint);
    }
    Ok(())
}

/// `path` relative to `base`, `/`-separated. Both must be absolute.
fn relative_key(base: &Path, path: &Path) -> String {
    let base_parts: Vec<Component> = base.components().collect();
    let path_parts: Vec<Component> = path.components().collect();
    let common = base_parts
        .iter()
        .zip(&path_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = vec!["..".to_string(); base_parts.len() - common];
    parts.extend(
        path_parts[common..]
            .iter()
            .map(|c| c.as_os_str().to_string_lossy().into_owned()),
    );

    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazy_core::{BackendConfig, Compression};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    fn config(workdir: &Path, context: &[&str], ignore: &[&str]) -> Config {
        Config {
            workdir: workdir.to_path_buf(),
            context: context.iter().map(PathBuf::from).collect(),
            ignore: ignore.iter().map(|s| s.to_string()).collect(),
            output: BTreeSet::from([PathBuf::from("out")]),
            command: vec!["make".into(), "all".into()],
            after_download: vec![],
            backend: BackendConfig::Filesystem {
                path: PathBuf::from("cache"),
                compression: Compression::None,
            },
            dry_run: false,
            verbose: false,
        }
    }

    fn file(content: &[u8]) -> FileFingerprint {
        FileFingerprint {
            kind: FileKind::File,
            content_hash: sha256_hex(content),
        }
    }

    #[test]
    fn test_relative_key() {
        assert_eq!(relative_key(Path::new("/a/b"), Path::new("/a/b/c/d")), "c/d");
        assert_eq!(relative_key(Path::new("/a/b"), Path::new("/a/b")), ".");
        assert_eq!(relative_key(Path::new("/a/b"), Path::new("/a/x")), "../x");
    }

    #[cfg(unix)]
    #[test]
    fn test_build_context_simple() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("a"), b"foo").unwrap();
        std::fs::create_dir(root.join("b")).unwrap();
        std::fs::write(root.join("b/c"), b"bar").unwrap();
        std::fs::create_dir(root.join("d")).unwrap();
        std::fs::write(root.join("d/e"), b"baz").unwrap();
        std::os::unix::fs::symlink("/etc/passwd", root.join("f")).unwrap();

        let ctx = BuildContext::build(&config(root, &[".", "a"], &["d"])).unwrap();

        let expected = BTreeMap::from([
            ("a".to_string(), file(b"foo")),
            ("b/c".to_string(), file(b"bar")),
            (
                "f".to_string(),
                FileFingerprint {
                    kind: FileKind::Link,
                    content_hash: sha256_hex(b"/etc/passwd"),
                },
            ),
        ]);
        assert_eq!(ctx.files, expected);
        assert_eq!(ctx.command, vec!["make".to_string(), "all".to_string()]);
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::write(dir.path().join("src/one.rs"), b"1").unwrap();
        std::fs::write(dir.path().join("src/nested/two.rs"), b"2").unwrap();

        let conf = config(dir.path(), &["src"], &[]);
        let first = BuildContext::build(&conf).unwrap();
        let second = BuildContext::build(&conf).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn test_fingerprint_ignores_insertion_order() {
        let mut forward = BTreeMap::new();
        forward.insert("a".to_string(), file(b"1"));
        forward.insert("b".to_string(), file(b"2"));
        let mut backward = BTreeMap::new();
        backward.insert("b".to_string(), file(b"2"));
        backward.insert("a".to_string(), file(b"1"));

        let command = vec!["x".to_string()];
        let left = BuildContext {
            command: command.clone(),
            files: forward,
        };
        let right = BuildContext {
            command,
            files: backward,
        };
        assert_eq!(left.fingerprint(), right.fingerprint());
    }

    #[test]
    fn test_content_change_changes_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("input"), b"first input\n").unwrap();
        let conf = config(dir.path(), &["input"], &[]);
        let before = BuildContext::build(&conf).unwrap().fingerprint();

        std::fs::write(dir.path().join("input"), b"second input\n").unwrap();
        let changed = BuildContext::build(&conf).unwrap().fingerprint();
        assert_ne!(before, changed);

        std::fs::write(dir.path().join("input"), b"first input\n").unwrap();
        let reverted = BuildContext::build(&conf).unwrap().fingerprint();
        assert_eq!(before, reverted);
    }

    #[test]
    fn test_command_change_changes_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("input"), b"x").unwrap();
        let mut conf = config(dir.path(), &["input"], &[]);
        let before = BuildContext::build(&conf).unwrap().fingerprint();
        conf.command.push("--release".into());
        assert_ne!(before, BuildContext::build(&conf).unwrap().fingerprint());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_hash_ignores_target_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("target"), b"one").unwrap();
        std::os::unix::fs::symlink("target", dir.path().join("link")).unwrap();
        let conf = config(dir.path(), &["."], &["/target"]);
        let before = BuildContext::build(&conf).unwrap();

        std::fs::write(dir.path().join("target"), b"two").unwrap();
        let modified = BuildContext::build(&conf).unwrap();
        assert_eq!(before, modified);

        std::fs::remove_file(dir.path().join("target")).unwrap();
        let dangling = BuildContext::build(&conf).unwrap();
        assert_eq!(before, dangling);
        assert_eq!(dangling.files["link"].kind, FileKind::Link);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directory_is_not_traversed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("real")).unwrap();
        std::fs::write(dir.path().join("real/file"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("tree")).unwrap();
        std::os::unix::fs::symlink("../real", dir.path().join("tree/alias")).unwrap();

        let ctx = BuildContext::build(&config(dir.path(), &["tree"], &[])).unwrap();
        assert_eq!(ctx.files.len(), 1);
        assert_eq!(
            ctx.files["tree/alias"],
            FileFingerprint {
                kind: FileKind::Link,
                content_hash: sha256_hex(b"../real"),
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_root_is_resolved() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("real")).unwrap();
        std::fs::write(dir.path().join("real/file"), b"x").unwrap();
        std::os::unix::fs::symlink("real", dir.path().join("alias")).unwrap();

        let ctx = BuildContext::build(&config(dir.path(), &["alias"], &[])).unwrap();
        let keys: Vec<&str> = ctx.files.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["real/file"]);
    }

    #[test]
    fn test_ignore_prunes_nested_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("app/venv/lib")).unwrap();
        std::fs::write(dir.path().join("app/venv/lib/site.py"), b"x").unwrap();
        std::fs::write(dir.path().join("app/main.py"), b"y").unwrap();
        std::fs::write(dir.path().join("app/main.pyc"), b"z").unwrap();

        let ctx =
            BuildContext::build(&config(dir.path(), &["app"], &["venv", "*.py[co]"])).unwrap();
        let keys: Vec<&str> = ctx.files.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["app/main.py"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_special_file_root_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let _listener =
            std::os::unix::net::UnixListener::bind(dir.path().join("socket")).unwrap();

        let err = BuildContext::build(&config(dir.path(), &["socket"], &[])).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_special_file_below_root_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.c"), b"int main;").unwrap();
        let _listener =
            std::os::unix::net::UnixListener::bind(dir.path().join("src/socket")).unwrap();

        let ctx = BuildContext::build(&config(dir.path(), &["src"], &[])).unwrap();
        let keys: Vec<&str> = ctx.files.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["src/main.c"]);
    }

    #[test]
    fn test_missing_root_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = BuildContext::build(&config(dir.path(), &["nope"], &[])).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
