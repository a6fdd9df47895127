//! Project configuration file and argument merging.

use crate::commands::{BuildArgs, ContextArgs};
use lazy_core::{BackendConfig, Compression, Config, Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Candidate project file names, in lookup order. JSON parses as YAML.
const PROJECT_FILES: &[&str] = &[".lazy-build.yaml", ".lazy-build.yml", ".lazy-build.json"];

/// Contents of a `.lazy-build.yaml` / `.lazy-build.json` project file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectFile {
    /// Cache backend.
    pub cache: Option<BackendConfig>,
    /// Ignore patterns applied in addition to `--ignore`.
    #[serde(default)]
    pub ignore: Vec<String>,
}

impl ProjectFile {
    /// Load the first project file found in `dir`, if any.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        for name in PROJECT_FILES {
            let path = dir.join(name);
            if path.exists() {
                let content =
                    std::fs::read_to_string(&path).map_err(Error::path("read", &path))?;
                let file = serde_yaml::from_str(&content).map_err(|e| {
                    Error::Configuration(format!("{}: {}", path.display(), e))
                })?;
                return Ok(Some(file));
            }
        }
        Ok(None)
    }
}

/// Filesystem cache under the user's cache directory.
fn default_backend() -> Result<BackendConfig> {
    let dirs = directories::ProjectDirs::from("", "", "lazy-build").ok_or_else(|| {
        Error::Configuration("could not determine a cache directory; configure one in .lazy-build.yaml".into())
    })?;
    Ok(BackendConfig::Filesystem {
        path: dirs.cache_dir().to_path_buf(),
        compression: Compression::None,
    })
}

/// Project file in `workdir` merged with the fingerprint inputs. No outputs.
fn context_config(args: ContextArgs, workdir: &Path, verbose: bool) -> Result<Config> {
    let project = ProjectFile::load(workdir)?.unwrap_or_default();
    let backend = match project.cache {
        Some(backend) => backend,
        None => default_backend()?,
    };

    Ok(Config {
        workdir: workdir.to_path_buf(),
        context: args.context.into_iter().collect(),
        ignore: project.ignore.into_iter().chain(args.ignore).collect(),
        output: Default::default(),
        command: args.command,
        after_download: Vec::new(),
        backend,
        dry_run: false,
        verbose,
    })
}

/// Merge `build` arguments with the project file in `workdir`.
pub fn resolve(args: BuildArgs, workdir: &Path, verbose: bool) -> Result<Config> {
    let mut config = context_config(args.inputs, workdir, verbose)?;
    config.output = args.output.into_iter().collect();
    config.dry_run = args.dry_run;
    if let Some(line) = args.after_download {
        config.after_download = shlex::split(&line).ok_or_else(|| {
            Error::Configuration(format!("cannot parse --after-download {:?}", line))
        })?;
    }
    config.validate()?;
    Ok(config)
}

/// Merge `invalidate` arguments with the project file in `workdir`.
pub fn resolve_context(args: ContextArgs, workdir: &Path, verbose: bool) -> Result<Config> {
    let config = context_config(args, workdir, verbose)?;
    config.validate_context()?;
    Ok(config)
}
