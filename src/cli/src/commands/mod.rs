//! CLI command definitions and dispatch.

mod extract;
mod inspect;
mod version;

use clap::{Parser, Subcommand};

/// image-inspector - extract and inspect container image filesystems.
#[derive(Parser)]
#[command(name = "image-inspector", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Acquire an image or running container and extract its filesystem
    Inspect(inspect::InspectArgs),
    /// Replay local gzip-compressed layer archives onto a directory
    ExtractLayers(extract::ExtractLayersArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Inspect(args) => inspect::execute(args).await,
        Command::ExtractLayers(args) => extract::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}
