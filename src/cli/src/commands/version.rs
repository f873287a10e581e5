//! `image-inspector version` command.

use clap::Args;

#[derive(Args)]
pub struct VersionArgs;

pub async fn execute(_args: VersionArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("image-inspector version {}", image_inspector_core::VERSION);
    Ok(())
}
