//! Command-line entry point for the appx packager.

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use appx::{Cli, create_package};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // Help and version requests print to stdout and exit 0
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => {
            let _ = err.print();
            std::process::exit(1);
        }
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let inputs = cli.input_specs();
    let options = cli.package_options();
    create_package(&cli.output, &inputs, &options)
        .await
        .with_context(|| format!("failed to create {}", cli.output.display()))?;

    Ok(())
}
