//! image-inspector CLI - inspect container images and running containers.

pub mod commands;
