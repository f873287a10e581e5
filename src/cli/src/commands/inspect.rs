//! `image-inspector inspect` command - Extract a filesystem and report
//! inspection metadata as JSON.

use std::path::PathBuf;

use clap::Args;
use image_inspector_core::{InspectionOptions, InspectorMetadata, PullPolicy, DEFAULT_DOCKER_URI};
use image_inspector_runtime::Inspector;

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Container engine endpoint (unix:// or tcp://)
    #[arg(long = "docker", env = "DOCKER_HOST", default_value = DEFAULT_DOCKER_URI)]
    pub docker_uri: String,

    /// Image reference to inspect (e.g., "alpine:3.19")
    #[arg(short, long, conflicts_with = "container")]
    pub image: Option<String>,

    /// Running container to inspect instead of an image
    #[arg(short, long)]
    pub container: Option<String>,

    /// Also collect filesystem changes of the running container
    #[arg(long, requires = "container")]
    pub scan_container_changes: bool,

    /// When to pull the image: never, always, if-not-present
    #[arg(long, default_value = "if-not-present")]
    pub pull_policy: PullPolicy,

    /// Registry username
    #[arg(short, long, env = "IMAGE_INSPECTOR_USERNAME", requires = "password_file")]
    pub username: Option<String>,

    /// File containing the registry password
    #[arg(long, requires = "username")]
    pub password_file: Option<PathBuf>,

    /// Engine credential file (config.json or .dockercfg); repeatable
    #[arg(long = "dockercfg")]
    pub docker_cfg: Vec<PathBuf>,

    /// Extraction directory (a temporary directory when omitted)
    #[arg(long = "dest-dir")]
    pub dest_dir: Option<PathBuf>,
}

impl InspectArgs {
    /// Options for one inspection run.
    pub fn to_options(&self) -> InspectionOptions {
        InspectionOptions {
            docker_uri: self.docker_uri.clone(),
            image: self.image.clone().unwrap_or_default(),
            container: self.container.clone().unwrap_or_default(),
            scan_container_changes: self.scan_container_changes,
            pull_policy: self.pull_policy,
            username: self.username.clone().unwrap_or_default(),
            password_file: self.password_file.clone(),
            docker_cfg: self.docker_cfg.clone(),
            dst_path: self.dest_dir.clone(),
            ..Default::default()
        }
    }
}

pub async fn execute(args: InspectArgs) -> Result<(), Box<dyn std::error::Error>> {
    let opts = args.to_options();
    opts.validate()?;

    let mut meta = InspectorMetadata::new();
    let result = Inspector::new(opts).inspect(&mut meta).await;

    // Metadata is reported on failure too; it carries the acquisition error.
    println!("{}", serde_json::to_string_pretty(&meta)?);

    let path = result?;
    tracing::info!(path = %path.display(), "Inspection complete");
    Ok(())
}
