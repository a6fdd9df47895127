//! Command handlers.

use crate::progress::Progress;
use console::style;
use lazy_cache::{
    ArtifactDetails, BuildContext, CacheBackend, extract_artifact, open_backend, package_artifact,
};
use lazy_core::{Config, Error, Result};
use std::borrow::Cow;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::{debug, info};

fn log(line: impl Display) {
    eprintln!("{}", line);
}

fn quote(command: &[String]) -> String {
    command
        .iter()
        .map(|arg| shlex::try_quote(arg).unwrap_or(Cow::Borrowed(arg.as_str())))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Restore outputs from the cache, or build and publish them.
pub async fn build(config: &Config) -> Result<()> {
    let ctx = BuildContext::build(config)?;
    let fingerprint = ctx.fingerprint();

    if config.verbose {
        log(format!("Generated build context with hash {}", fingerprint));
        log("Individual files:");
        log(serde_json::to_string_pretty(&ctx.files)?);
    }

    let backend = open_backend(&config.backend, &config.workdir).await;
    run_build(config, &ctx, &fingerprint, backend.as_ref()).await
}

/// The hit/miss decision against an already opened backend.
pub async fn run_build(
    config: &Config,
    ctx: &BuildContext,
    fingerprint: &str,
    backend: &dyn CacheBackend,
) -> Result<()> {
    match backend.artifact_details(fingerprint).await? {
        Some(artifact) => {
            info!(%fingerprint, size = artifact.size, "Cache hit");
            log(style("Found cached build artifact, downloading.").on_black().bright());
            build_from_artifact(config, fingerprint, artifact, backend).await
        }
        None => {
            info!(%fingerprint, "Cache miss");
            log(style("Found no cached build artifact, building locally.").on_black().bright());
            build_from_command(config, ctx, fingerprint, backend).await
        }
    }
}

async fn build_from_artifact(
    config: &Config,
    fingerprint: &str,
    artifact: ArtifactDetails,
    backend: &dyn CacheBackend,
) -> Result<()> {
    if config.dry_run {
        log(format!(
            "Would download {} ({} bytes) and extract it.",
            backend.artifact_keys(fingerprint).archive,
            artifact.size
        ));
        return Ok(());
    }

    log(style("Downloading artifact...").yellow());
    let progress = Progress::new(artifact.size);
    let downloaded = backend
        .get_artifact(fingerprint, &|n| progress.on_chunk(n))
        .await;
    progress.finish();
    // Deleted when dropped, on success and failure alike.
    let archive = TempPath::from_path(downloaded?);

    log(style("Extracting artifact...").yellow());
    let conf = config.clone();
    let path = archive.to_path_buf();
    tokio::task::spawn_blocking(move || extract_artifact(&conf, &path))
        .await
        .map_err(|e| Error::Internal(format!("extract task failed: {}", e)))??;
    drop(archive);
    log(style("done!").yellow());

    if !config.after_download.is_empty() {
        log(style("Running after-download script...").yellow());
        log(style(format!("$ {}", quote(&config.after_download))).yellow());
        run_command(&config.after_download, &config.workdir).await?;
        log(style("Done!").yellow());
    }
    Ok(())
}

async fn build_from_command(
    config: &Config,
    ctx: &BuildContext,
    fingerprint: &str,
    backend: &dyn CacheBackend,
) -> Result<()> {
    if config.dry_run {
        log(format!(
            "Would run `{}`, then package {} output(s) and upload them to {}.",
            quote(&ctx.command),
            config.output.len(),
            backend.artifact_keys(fingerprint).archive
        ));
        return Ok(());
    }

    log(style(format!("$ {}", quote(&ctx.command))).yellow());
    run_command(&ctx.command, &config.workdir).await?;

    log(style("Packaging artifact...").yellow());
    let conf = config.clone();
    let packaged = tokio::task::spawn_blocking(move || package_artifact(&conf))
        .await
        .map_err(|e| Error::Internal(format!("package task failed: {}", e)))??;
    let archive = TempPath::from_path(packaged);

    log(style("Uploading artifact to shared cache...").yellow());
    let total_bytes = std::fs::metadata(&archive)
        .map_err(Error::path("stat", &*archive))?
        .len();
    let progress = Progress::new(total_bytes);
    let stored = backend
        .store_artifact(fingerprint, &archive, &|n| progress.on_chunk(n))
        .await;
    progress.finish();
    stored?;
    log(style("done!").yellow());
    Ok(())
}

/// Drop the cache entry for the current context.
pub async fn invalidate(config: &Config) -> Result<()> {
    let fingerprint = BuildContext::build(config)?.fingerprint();
    let backend = open_backend(&config.backend, &config.workdir).await;
    backend.invalidate_artifact(&fingerprint).await
}

async fn run_command(command: &[String], workdir: &Path) -> Result<()> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| Error::Configuration("empty command".into()))?;
    debug!(command = %quote(command), workdir = %workdir.display(), "Running command");

    let status = tokio::process::Command::new(program)
        .args(args)
        .current_dir(workdir)
        .status()
        .await
        .map_err(Error::path("run", PathBuf::from(program)))?;
    if !status.success() {
        return Err(Error::CommandFailed {
            command: command.to_vec(),
            code: status.code(),
        });
    }
    Ok(())
}
