//! Error taxonomy shared across the capture, storage and HTTP paths.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CamError {
    /// Sensor frame not obtainable, or the resource lock was not acquired
    /// within the allowed wait. A normal "busy" outcome, never fatal.
    #[error("sensor resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Medium absent and every mount attempt failed.
    #[error("storage medium not mounted")]
    StorageUnmounted,

    /// Open or write failed even after the single remount retry.
    #[error("storage write failed: {0}")]
    StorageWriteFailed(String),

    /// Conversion of a raw frame to JPEG failed.
    #[error("JPEG encoding failed: {0}")]
    EncodingFailed(String),

    /// Unknown device model or sensor initialization failure.
    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// Unparseable or invalid prompt query.
    #[error("bad command: {0}")]
    BadCommand(String),

    /// Settings store could not be read or written.
    #[error("settings persistence failed: {0}")]
    PersistFailed(String),
}

impl CamError {
    /// Short stable code used as the body of prompt failure responses.
    pub fn code(&self) -> &'static str {
        match self {
            CamError::ResourceUnavailable(_) => "resource_unavailable",
            CamError::StorageUnmounted => "storage_unmounted",
            CamError::StorageWriteFailed(_) => "storage_write_failed",
            CamError::EncodingFailed(_) => "encoding_failed",
            CamError::UnsupportedConfiguration(_) => "unsupported_configuration",
            CamError::BadCommand(_) => "bad_command",
            CamError::PersistFailed(_) => "persist_failed",
        }
    }
}
