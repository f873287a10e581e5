use std::path::PathBuf;

use thiserror::Error;

/// Image inspector error types
#[derive(Error, Debug)]
pub enum InspectorError {
    /// The engine endpoint could not be parsed or reached
    #[error("Unable to connect to docker daemon: {0}")]
    DaemonConnect(String),

    /// Pulling the image failed, either at the client level or in the progress stream
    #[error("Unable to pull docker image: {0}")]
    PullFailed(String),

    /// Image is missing locally and the pull policy forbids fetching it
    #[error("Image {image} is not available and pull-policy {policy} doesn't allow pulling")]
    PullForbidden { image: String, policy: String },

    /// Running container could not be inspected
    #[error("Unable to get docker container information: {0}")]
    ContainerInspect(String),

    /// Filesystem changes of a running container could not be listed
    #[error("Unable to get docker container changes: {0}")]
    ContainerChanges(String),

    /// Error value reported by the daemon inside a progress stream
    #[error("{0}")]
    Daemon(String),

    /// Malformed JSON in a progress stream
    #[error("Error decoding json: {0}")]
    StreamDecode(String),

    /// Engine API answered with a non-success status
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Explicitly requested password file could not be read
    #[error("Unable to read password file {}: {source}", path.display())]
    PasswordFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Destination directory could not be prepared
    #[error("Unable to create output directory {}: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Archive framing or decompression failure
    #[error("reading tar: {0}")]
    TarRead(String),

    /// Failure materializing a single archive entry
    #[error("{action} {}: {source}", path.display())]
    Extract {
        action: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for InspectorError {
    fn from(err: serde_json::Error) -> Self {
        InspectorError::SerializationError(err.to_string())
    }
}

/// Result type alias for image inspector operations
pub type Result<T> = std::result::Result<T, InspectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_failed_display() {
        let error = InspectorError::PullFailed("connection reset".to_string());
        assert_eq!(
            error.to_string(),
            "Unable to pull docker image: connection reset"
        );
    }

    #[test]
    fn test_pull_forbidden_display() {
        let error = InspectorError::PullForbidden {
            image: "busybox:latest".to_string(),
            policy: "never".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Image busybox:latest is not available and pull-policy never doesn't allow pulling"
        );
    }

    #[test]
    fn test_container_errors_display() {
        let inspect = InspectorError::ContainerInspect("no such container".to_string());
        assert_eq!(
            inspect.to_string(),
            "Unable to get docker container information: no such container"
        );

        let changes = InspectorError::ContainerChanges("no such container".to_string());
        assert_eq!(
            changes.to_string(),
            "Unable to get docker container changes: no such container"
        );
    }

    #[test]
    fn test_daemon_error_is_bare_text() {
        let error = InspectorError::Daemon("Oops".to_string());
        assert_eq!(error.to_string(), "Oops");
    }

    #[test]
    fn test_stream_decode_display() {
        let error = InspectorError::StreamDecode("expected value".to_string());
        assert_eq!(error.to_string(), "Error decoding json: expected value");
    }

    #[test]
    fn test_daemon_connect_display() {
        let error = InspectorError::DaemonConnect("invalid endpoint".to_string());
        assert_eq!(
            error.to_string(),
            "Unable to connect to docker daemon: invalid endpoint"
        );
    }

    #[test]
    fn test_password_file_display() {
        let error = InspectorError::PasswordFile {
            path: PathBuf::from("/secrets/pass"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert_eq!(
            error.to_string(),
            "Unable to read password file /secrets/pass: not found"
        );
    }

    #[test]
    fn test_extract_display() {
        let error = InspectorError::Extract {
            action: "creating file",
            path: PathBuf::from("/dst/etc/passwd"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(error.to_string(), "creating file /dst/etc/passwd: denied");
    }

    #[test]
    fn test_tar_read_display() {
        let error = InspectorError::TarRead("unexpected EOF".to_string());
        assert_eq!(error.to_string(), "reading tar: unexpected EOF");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: InspectorError = io_error.into();
        assert!(matches!(error, InspectorError::IoError(_)));
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ invalid json }");
        let error: InspectorError = result.unwrap_err().into();
        assert!(matches!(error, InspectorError::SerializationError(_)));
    }
}
