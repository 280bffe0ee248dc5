//! Error types for reconciliation runs.

use std::io;
use std::path::PathBuf;

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, ordering, or applying interface graphs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A logical network references a conduit with no interface mapping.
    #[error("no conduit to interface map for {conduit} (network {network})")]
    UnresolvedConduit {
        /// The network that referenced the conduit.
        network: String,
        /// The conduit that could not be resolved.
        conduit: String,
    },

    /// The child-reference relation contains a cycle.
    #[error("dependency cycle between interfaces: {}", interfaces.join(", "))]
    CycleDetected {
        /// Interfaces lying on a cycle, sorted by name.
        interfaces: Vec<String>,
    },

    /// The desired topology would tear down every interface.
    #[error("not enough active network interfaces")]
    EmptyTopology,

    /// A snapshot or settings file could not be parsed.
    #[error("{}:{line}: {message}", path.display())]
    Parse {
        /// The file being parsed.
        path: PathBuf,
        /// 1-based line number, 0 when not line-specific.
        line: usize,
        /// What was wrong.
        message: String,
    },

    /// I/O error reading or writing persisted configuration.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// YAML (de)serialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An external command could not be spawned.
    #[error("failed to execute '{command}': {source}")]
    Spawn {
        /// The command line.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// An external command exited non-zero.
    #[error("'{command}' failed (exit code {exit_code}): {output}")]
    Command {
        /// The command line.
        command: String,
        /// The exit code, -1 if killed by a signal.
        exit_code: i32,
        /// Combined stdout/stderr.
        output: String,
    },
}

impl Error {
    /// Create a parse error for a specific line of a file.
    pub fn parse(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    /// Check if this error must abort the run before any action executes.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnresolvedConduit { .. }
                | Self::CycleDetected { .. }
                | Self::EmptyTopology
                | Self::Parse { .. }
                | Self::Yaml(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_names_interfaces() {
        let err = Error::CycleDetected {
            interfaces: vec!["br0".into(), "eth0".into()],
        };
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "dependency cycle between interfaces: br0, eth0");
    }

    #[test]
    fn test_empty_topology_message() {
        assert_eq!(
            Error::EmptyTopology.to_string(),
            "not enough active network interfaces"
        );
    }

    #[test]
    fn test_command_errors_are_not_fatal() {
        let err = Error::Command {
            command: "ifdown eth0".into(),
            exit_code: 1,
            output: "interface eth0 not configured".into(),
        };
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("exit code 1"));
    }

    #[test]
    fn test_parse_error_location() {
        let err = Error::parse("/etc/network/interfaces", 7, "invalid address");
        assert_eq!(err.to_string(), "/etc/network/interfaces:7: invalid address");
    }
}
