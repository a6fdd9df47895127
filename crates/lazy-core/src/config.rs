//! Resolved configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Archive compression, which also decides the archive object's extension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

impl Compression {
    pub fn extension(self) -> &'static str {
        match self {
            Compression::None => "tar",
            Compression::Gzip => "tar.gz",
        }
    }
}

/// Where cache entries live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum BackendConfig {
    S3 {
        bucket: String,
        path: String,
        #[serde(default)]
        compression: Compression,
    },
    Filesystem {
        path: PathBuf,
        #[serde(default)]
        compression: Compression,
    },
}

impl BackendConfig {
    pub fn compression(&self) -> Compression {
        match self {
            BackendConfig::S3 { compression, .. } | BackendConfig::Filesystem { compression, .. } => {
                *compression
            }
        }
    }
}

/// Everything one invocation needs, already merged from the project file
/// and the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory that relative paths and fingerprint keys are resolved against.
    pub workdir: PathBuf,
    /// Files or directories whose content makes up the build context.
    pub context: BTreeSet<PathBuf>,
    /// Glob patterns excluded from the build context.
    pub ignore: BTreeSet<String>,
    /// Paths produced by a successful build.
    pub output: BTreeSet<PathBuf>,
    /// The wrapped build command.
    pub command: Vec<String>,
    /// Command run after restoring an artifact, if any.
    pub after_download: Vec<String>,
    pub backend: BackendConfig,
    pub dry_run: bool,
    pub verbose: bool,
}

impl Config {
    /// Reject configurations that cannot be fingerprinted or packaged.
    pub fn validate(&self) -> Result<()> {
        self.validate_context()?;
        if self.output.is_empty() {
            return Err(Error::Configuration(
                "at least one output path is required".into(),
            ));
        }
        Ok(())
    }

    /// Reject configurations that cannot be fingerprinted or that name an
    /// unusable backend. Outputs are not required.
    pub fn validate_context(&self) -> Result<()> {
        if self.command.is_empty() {
            return Err(Error::Configuration("a build command is required".into()));
        }
        if self.context.is_empty() {
            return Err(Error::Configuration(
                "at least one context path is required".into(),
            ));
        }
        if let BackendConfig::S3 { bucket, .. } = &self.backend {
            if bucket.is_empty() {
                return Err(Error::Configuration("s3 cache requires a bucket".into()));
            }
        }
        Ok(())
    }
}
