//! Error types for host-bridge
//!
//! Decodes the status codes the host returns across the boundary.

use thiserror::Error;

use crate::{
    OR_ERR_INVALID_ARGUMENT, OR_ERR_INVALID_CALLER, OR_ERR_LOGGING_CAP, OR_ERR_REGISTER_CAP,
    OR_ERR_REGISTER_WILDCARD_CAP, OR_ERR_UNREGISTER_CAP, OR_SUCCESS,
};

/// Bridge error type
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeError {
    #[error("caller identity is not known to the host")]
    InvalidCaller,

    #[error("missing HTTP register capability")]
    MissingRegisterCapability,

    #[error("missing wildcard HTTP register capability")]
    MissingWildcardCapability,

    #[error("missing HTTP unregister capability")]
    MissingUnregisterCapability,

    #[error("missing logging capability")]
    MissingLoggingCapability,

    #[error("invalid argument")]
    InvalidArgument,

    #[error("unknown status code {0}")]
    Unknown(u64),
}

impl BridgeError {
    /// Decode a raw status code. `OR_SUCCESS` maps to `Ok(())`.
    pub fn check(status: u64) -> BridgeResult<()> {
        match status {
            OR_SUCCESS => Ok(()),
            OR_ERR_INVALID_CALLER => Err(Self::InvalidCaller),
            OR_ERR_REGISTER_CAP => Err(Self::MissingRegisterCapability),
            OR_ERR_REGISTER_WILDCARD_CAP => Err(Self::MissingWildcardCapability),
            OR_ERR_UNREGISTER_CAP => Err(Self::MissingUnregisterCapability),
            OR_ERR_LOGGING_CAP => Err(Self::MissingLoggingCapability),
            OR_ERR_INVALID_ARGUMENT => Err(Self::InvalidArgument),
            other => Err(Self::Unknown(other)),
        }
    }

    /// Raw status code for this error.
    pub fn code(&self) -> u64 {
        match self {
            Self::InvalidCaller => OR_ERR_INVALID_CALLER,
            Self::MissingRegisterCapability => OR_ERR_REGISTER_CAP,
            Self::MissingWildcardCapability => OR_ERR_REGISTER_WILDCARD_CAP,
            Self::MissingUnregisterCapability => OR_ERR_UNREGISTER_CAP,
            Self::MissingLoggingCapability => OR_ERR_LOGGING_CAP,
            Self::InvalidArgument => OR_ERR_INVALID_ARGUMENT,
            Self::Unknown(code) => *code,
        }
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
