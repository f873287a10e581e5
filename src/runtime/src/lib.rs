//! Image Inspector Runtime - acquisition and extraction engine.
//!
//! This crate resolves registry credentials, acquires an image or a running
//! container through a container engine, decodes the engine's pull progress
//! feed and replays filesystem layers onto local disk for scanners.

#![allow(clippy::result_large_err)]

pub mod acquire;
pub mod auth;
pub mod client;
pub mod docker;
pub mod inspector;
pub mod layers;
pub mod output_dir;
pub mod stream;

// Re-export common types
pub use acquire::{AcquireState, AcquisitionResult, ImageAcquirer};
pub use auth::{resolve_credentials, CredentialEntry, CredentialSet};
pub use client::{
    parse_repository_tag, ByteStream, CreateContainerOptions, DownloadFromContainerOptions,
    PullImageOptions, RemoveContainerOptions, RuntimeClient,
};
pub use docker::DockerClient;
pub use inspector::{Inspector, Scanner};
pub use layers::{extract_gzip_layer, extract_layer_tar, extract_layers, untar_gz_layer};
pub use output_dir::{create_output_dir, DirOps, OsDirOps, OutputDir};
pub use stream::StreamDecoder;
