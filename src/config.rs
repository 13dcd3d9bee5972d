//! Transport configuration.
//!
//! Both sides only need to agree on the socket path. It defaults to
//! [`DEFAULT_SOCKET_PATH`] and can be overridden with the
//! `SMARTPIANO_SOCKET` environment variable.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_SOCKET_PATH, MAX_SOCKET_PATH, SOCKET_PATH_ENV};

/// Settings shared by the client and server transports.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TransportConfig {
    /// Filesystem path of the Unix domain socket.
    pub socket_path: PathBuf,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
        }
    }
}

impl TransportConfig {
    /// Configuration for an explicit socket path.
    pub fn with_socket_path(path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: path.into(),
        }
    }

    /// Default configuration with `SMARTPIANO_SOCKET` applied.
    ///
    /// An empty variable is treated as unset.
    pub fn from_env() -> Self {
        match std::env::var_os(SOCKET_PATH_ENV) {
            Some(path) if !path.is_empty() => Self::with_socket_path(path),
            _ => Self::default(),
        }
    }

    /// Check that the socket path fits in `sockaddr_un`.
    pub fn validate(&self) -> Result<()> {
        validate_socket_path(&self.socket_path)
    }
}

/// Reject socket paths too long for `sun_path` (104 bytes on macOS, 108 on
/// Linux; the conservative limit is used everywhere).
pub fn validate_socket_path(path: &Path) -> Result<()> {
    let path_len = path.as_os_str().len();
    if path_len == 0 {
        bail!("Socket path is empty");
    }
    if path_len >= MAX_SOCKET_PATH {
        bail!(
            "Socket path too long ({path_len} bytes, max {}): {}",
            MAX_SOCKET_PATH - 1,
            path.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_path() {
        let config = TransportConfig::default();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/smartpiano.sock"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_path_length_validation() {
        let long = PathBuf::from(format!("/tmp/{}.sock", "a".repeat(200)));
        let err = validate_socket_path(&long).unwrap_err().to_string();
        assert!(err.contains("too long"), "unexpected error: {err}");

        let limit = PathBuf::from("a".repeat(MAX_SOCKET_PATH - 1));
        assert!(validate_socket_path(&limit).is_ok());
        let over = PathBuf::from("a".repeat(MAX_SOCKET_PATH));
        assert!(validate_socket_path(&over).is_err());
    }

    #[test]
    fn test_empty_path_rejected() {
        assert!(TransportConfig::with_socket_path("").validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let config = TransportConfig::with_socket_path("/run/user/1000/piano.sock");
        let json = serde_json::to_string(&config).unwrap();
        let parsed: TransportConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
