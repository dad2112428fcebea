//! Core type definitions for the Filehaven sync engine.
//!
//! This crate defines the fundamental, transport-agnostic types used
//! throughout the device-side core:
//! - Device and operation identifiers
//! - The pending-operation record and its status state machine
//!
//! Anything that talks to the network or the database belongs in the
//! engine and store crates, not here.

mod ids;
mod operation;

pub use ids::{DeviceId, OperationId};
pub use operation::{OperationStatus, OperationType, PendingOperation};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid device id: {0}")]
    InvalidDeviceId(String),
}
