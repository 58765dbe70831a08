//! Crate-level error type.

use std::io;

use thiserror::Error;

use crate::link::LinkError;
use crate::protocol::ProtocolError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Capture source failed: {0}")]
    Capture(String),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Failed to load settings from '{path}': {reason}")]
    Settings { path: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_errors_are_transparent() {
        let err: Error = LinkError::NoDeviceFound.into();
        assert_eq!(err.to_string(), LinkError::NoDeviceFound.to_string());
    }

    #[test]
    fn invalid_frame_message() {
        let err = Error::InvalidFrame("stride too small".to_string());
        assert_eq!(err.to_string(), "Invalid frame: stride too small");
    }
}
