//! lazy-build CLI entrypoint.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod handlers;
mod progress;


use commands::Commands;

#[derive(Parser)]
#[command(name = "lazy-build")]
#[command(author, version, about = "Cache build artifacts based on files on disk", long_about = None)]
struct Cli {
    /// Show the build context and debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "warn,lazy_build=debug,lazy_cache=debug"
    } else {
        "warn"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let workdir = std::env::current_dir()?;

    match cli.command {
        Commands::Build { args } => {
            let config = config::resolve(args, &workdir, cli.verbose)?;
            handlers::build(&config).await?
        }
        Commands::Invalidate { args } => {
            let config = config::resolve_context(args, &workdir, cli.verbose)?;
            handlers::invalidate(&config).await?
        }
    }

    Ok(())
}
