//! CLI command definitions.

use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Restore outputs from the cache, or run the command and cache them
    Build {
        #[command(flatten)]
        args: BuildArgs,
    },

    /// Drop the cache entry for the current build context
    Invalidate {
        #[command(flatten)]
        args: ContextArgs,
    },
}

/// What the fingerprint is computed from.
#[derive(Args, Debug, Clone, Default)]
pub struct ContextArgs {
    /// File or directory to include in the build context
    #[arg(long, num_args = 1.., required = true)]
    pub context: Vec<PathBuf>,

    /// Paths to exclude when creating the build context
    #[arg(long, num_args = 1..)]
    pub ignore: Vec<String>,

    /// Build command to execute, after `--`
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct BuildArgs {
    #[command(flatten)]
    pub inputs: ContextArgs,

    /// File or directory produced by a successful build
    #[arg(long, num_args = 1.., required = true)]
    pub output: Vec<PathBuf>,

    /// Command to run after restoring an artifact (e.g. to fix up shebangs)
    #[arg(long)]
    pub after_download: Option<String>,

    /// Say what would be done, without doing it
    #[arg(long)]
    pub dry_run: bool,
}
