//! Packaging declared outputs into a tar archive and restoring them.

use lazy_core::{Compression, Config, Error, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Archive every declared output of `config` into a new temporary file.
///
/// The caller owns the returned file and must delete it.
pub fn package_artifact(config: &Config) -> Result<PathBuf> {
    create_archive(
        &config.workdir,
        &config.output,
        config.backend.compression(),
    )
}

/// Restore the declared outputs of `config` from `archive`.
pub fn extract_artifact(config: &Config, archive: &Path) -> Result<()> {
    extract_archive(
        &config.workdir,
        &config.output,
        archive,
        config.backend.compression(),
    )
}

/// Create an archive of `outputs` (relative to `base_dir`) in a temporary file.
///
/// Directories are added recursively; symlinks are stored as links.
pub fn create_archive<'a, I>(base_dir: &Path, outputs: I, compression: Compression) -> Result<PathBuf>
where
    I: IntoIterator<Item = &'a PathBuf>,
{
    let tmp = tempfile::Builder::new()
        .prefix("lazy-build-")
        .suffix(&format!(".{}", compression.extension()))
        .tempfile()?;
    let (file, tmp_path) = tmp.into_parts();
    let writer = BufWriter::new(file);

    // tmp_path removes the partial archive on any error below.
    match compression {
        Compression::None => {
            let mut writer = append_outputs(tar::Builder::new(writer), base_dir, outputs)?;
            writer.flush()?;
        }
        Compression::Gzip => {
            let encoder = flate2::write::GzEncoder::new(writer, flate2::Compression::default());
            let encoder = append_outputs(tar::Builder::new(encoder), base_dir, outputs)?;
            encoder
                .finish()
                .map_err(|e| Error::Archive(format!("Failed to finish gzip stream: {}", e)))?
                .flush()?;
        }
    }

    tmp_path.keep().map_err(|e| Error::Io(e.error))
}

fn append_outputs<'a, W, I>(mut builder: tar::Builder<W>, base_dir: &Path, outputs: I) -> Result<W>
where
    W: Write,
    I: IntoIterator<Item = &'a PathBuf>,
{
    builder.follow_symlinks(false);
    for output in outputs {
        let name = archive_name(base_dir, output)?;
        let abs_path = base_dir.join(&name);
        let metadata = match std::fs::symlink_metadata(&abs_path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::MissingOutput(output.clone()));
            }
            Err(e) => return Err(Error::path("stat", abs_path)(e)),
        };

        if metadata.is_dir() {
            builder
                .append_dir_all(&name, &abs_path)
                .map_err(|e| Error::Archive(format!("Failed to pack dir {}: {}", name.display(), e)))?;
        } else {
            builder
                .append_path_with_name(&abs_path, &name)
                .map_err(|e| Error::Archive(format!("Failed to pack file {}: {}", name.display(), e)))?;
        }
        debug!(output = %name.display(), "Packed output");
    }
    builder
        .into_inner()
        .map_err(|e| Error::Archive(format!("Failed to finish tar: {}", e)))
}

/// Path of `output` inside the archive: relative to `base_dir`.
fn archive_name(base_dir: &Path, output: &Path) -> Result<PathBuf> {
    if output.is_absolute() {
        output
            .strip_prefix(base_dir)
            .map(Path::to_path_buf)
            .map_err(|_| {
                Error::Configuration(format!(
                    "output {} is outside {}",
                    output.display(),
                    base_dir.display()
                ))
            })
    } else {
        Ok(output.to_path_buf())
    }
}

/// Remove each existing output under `base_dir`, then unpack `archive` there.
///
/// Clearing first means no stale file survives next to restored content.
pub fn extract_archive<'a, I>(
    base_dir: &Path,
    outputs: I,
    archive: &Path,
    compression: Compression,
) -> Result<()>
where
    I: IntoIterator<Item = &'a PathBuf>,
{
    for output in outputs {
        let abs_path = base_dir.join(archive_name(base_dir, output)?);
        match std::fs::symlink_metadata(&abs_path) {
            Ok(metadata) if metadata.is_dir() => std::fs::remove_dir_all(&abs_path)
                .map_err(Error::path("remove directory", &abs_path))?,
            Ok(_) => std::fs::remove_file(&abs_path).map_err(Error::path("remove", &abs_path))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::path("stat", abs_path)(e)),
        }
    }

    let reader = BufReader::new(File::open(archive).map_err(Error::path("open", archive))?);
    match compression {
        Compression::None => unpack(tar::Archive::new(reader), base_dir),
        Compression::Gzip => unpack(
            tar::Archive::new(flate2::read::GzDecoder::new(reader)),
            base_dir,
        ),
    }
}

fn unpack<R: Read>(mut archive: tar::Archive<R>, dest: &Path) -> Result<()> {
    archive.set_preserve_mtime(true);
    archive
        .unpack(dest)
        .map_err(|e| Error::Archive(format!("Failed to unpack archive: {}", e)))
}
