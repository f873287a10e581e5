//! `image-inspector extract-layers` command - Replay local layer archives.

use std::path::PathBuf;

use clap::Args;

#[derive(Args, Debug)]
pub struct ExtractLayersArgs {
    /// Destination directory (created if missing)
    #[arg(short, long)]
    pub dest: PathBuf,

    /// Gzip-compressed layer archives, lowest layer first
    #[arg(required = true)]
    pub layers: Vec<PathBuf>,
}

pub async fn execute(args: ExtractLayersArgs) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&args.dest)?;

    let ExtractLayersArgs { dest, layers } = args;
    let target = dest.clone();
    tokio::task::spawn_blocking(move || image_inspector_runtime::extract_layers(&layers, &target))
        .await??;

    println!("{}", dest.display());
    Ok(())
}
