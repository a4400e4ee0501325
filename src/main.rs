use std::io::Write;

use clap::Parser;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sandcastle::cli::{Cli, CliCommand};
use sandcastle::config::Config;
use sandcastle::dashboard::{Browse, Sandcastle};
use sandcastle::diff;
use sandcastle::error::{Error, Result};

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::Render(format!("failed to serialize output: {e}")))?;
    println!("{json}");
    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    if cli.command == CliCommand::Stylesheet {
        println!("{}", diff::stylesheet()?);
        return Ok(());
    }

    let config = Config::load(cli)?;
    info!(?config, "config loaded");
    let sandcastle = Sandcastle::from_config(config);

    match &cli.command {
        CliCommand::Overview => print_json(&sandcastle.overview()?),
        CliCommand::Pull { number } => print_json(&sandcastle.pull(*number)?),
        CliCommand::Branch { name } => print_json(&sandcastle.branch(name)?),
        CliCommand::Review { id } => print_json(&sandcastle.review(*id)?),
        CliCommand::Browse { name, path } => match sandcastle.browse(name, path)? {
            Browse::File { bytes } => {
                std::io::stdout().write_all(&bytes)?;
                Ok(())
            }
            listing @ Browse::Directory { .. } => print_json(&listing),
        },
        CliCommand::Stylesheet => Ok(()),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    if let Err(e) = run(&cli) {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}
