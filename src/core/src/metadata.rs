//! Per-run inspection metadata handed to downstream scanners.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Change, ContainerDescriptor, ImageDescriptor};

/// Record accumulated during one inspection run.
///
/// `image_acquire_error` is empty on success. Scan results are opaque JSON
/// values keyed by scanner name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InspectorMetadata {
    pub image_acquire_error: String,
    pub image: Option<ImageDescriptor>,
    pub container: Option<ContainerDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_changes: Vec<Change>,
    pub extracted_path: Option<PathBuf>,
    pub inspected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scan_results: BTreeMap<String, serde_json::Value>,
}

impl InspectorMetadata {
    pub fn new() -> Self {
        Self {
            inspected_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Whether acquisition succeeded.
    pub fn acquired(&self) -> bool {
        self.image_acquire_error.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_metadata_is_successful_and_timestamped() {
        let meta = InspectorMetadata::new();
        assert!(meta.acquired());
        assert!(meta.inspected_at.is_some());
        assert!(meta.scan_results.is_empty());
    }

    #[test]
    fn test_acquire_error_marks_failure() {
        let mut meta = InspectorMetadata::new();
        meta.image_acquire_error = "Unable to pull docker image: boom".to_string();
        assert!(!meta.acquired());
    }

    #[test]
    fn test_serializes_scan_results() {
        let mut meta = InspectorMetadata::default();
        meta.scan_results
            .insert("clamav".to_string(), serde_json::json!({"infected": 0}));
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["scan_results"]["clamav"]["infected"], 0);
        assert!(json.get("container_changes").is_none());
    }
}
