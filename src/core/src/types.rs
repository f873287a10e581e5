//! Container engine descriptors.
//!
//! Field names follow the engine's JSON encoding so the same types can be
//! decoded from API responses and stored in inspection metadata.

use serde::{Deserialize, Serialize};

/// Locally available image, as reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ImageDescriptor {
    pub id: String,
    pub repo_tags: Vec<String>,
    pub created: Option<String>,
    pub architecture: Option<String>,
    pub os: Option<String>,
    pub size: Option<i64>,
}

/// Run state of a container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerState {
    pub status: String,
    pub running: bool,
}

/// Container, as reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerDescriptor {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: Option<ContainerState>,
}

/// Kind of a container filesystem change.
///
/// Encoded on the wire as `0`, `1` and `2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ChangeKind {
    Modified,
    Added,
    Deleted,
}

impl TryFrom<u8> for ChangeKind {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Modified),
            1 => Ok(Self::Added),
            2 => Ok(Self::Deleted),
            other => Err(format!("unknown change kind: {}", other)),
        }
    }
}

impl From<ChangeKind> for u8 {
    fn from(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::Modified => 0,
            ChangeKind::Added => 1,
            ChangeKind::Deleted => 2,
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Modified => write!(f, "C"),
            Self::Added => write!(f, "A"),
            Self::Deleted => write!(f, "D"),
        }
    }
}

/// One filesystem change record of a running container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Change {
    pub path: String,
    pub kind: ChangeKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_descriptor_from_engine_json() {
        let json = r#"{
            "Id": "sha256:abc",
            "RepoTags": ["alpine:3.19"],
            "Architecture": "amd64",
            "Os": "linux",
            "Size": 7377890,
            "RootFS": {"Type": "layers"}
        }"#;
        let image: ImageDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(image.id, "sha256:abc");
        assert_eq!(image.repo_tags, vec!["alpine:3.19"]);
        assert_eq!(image.os.as_deref(), Some("linux"));
        assert_eq!(image.size, Some(7377890));
        assert!(image.created.is_none());
    }

    #[test]
    fn test_container_descriptor_from_engine_json() {
        let json = r#"{
            "Id": "f00d",
            "Name": "/web",
            "Image": "sha256:abc",
            "State": {"Status": "running", "Running": true, "Pid": 42}
        }"#;
        let container: ContainerDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(container.id, "f00d");
        assert_eq!(container.name, "/web");
        assert!(container.state.unwrap().running);
    }

    #[test]
    fn test_changes_from_engine_json() {
        let json = r#"[
            {"Path": "/etc", "Kind": 0},
            {"Path": "/etc/motd", "Kind": 1},
            {"Path": "/tmp/x", "Kind": 2}
        ]"#;
        let changes: Vec<Change> = serde_json::from_str(json).unwrap();
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0].kind, ChangeKind::Modified);
        assert_eq!(changes[1].kind, ChangeKind::Added);
        assert_eq!(changes[2].kind, ChangeKind::Deleted);
        assert_eq!(changes[2].kind.to_string(), "D");
    }

    #[test]
    fn test_unknown_change_kind_rejected() {
        let result: std::result::Result<Change, _> =
            serde_json::from_str(r#"{"Path": "/x", "Kind": 7}"#);
        assert!(result.is_err());
    }
}
