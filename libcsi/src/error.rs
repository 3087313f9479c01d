//! CSI error types.
//!
//! All errors in the `libcsi` crate are represented by the [`CsiError`] enum,
//! which derives [`thiserror::Error`] for ergonomic error handling and also
//! implements [`Serialize`]/[`Deserialize`] so errors can travel across the
//! QUIC transport layer.
//!
//! Callers that need to branch on the failure class (retry, give up, fall
//! back) should match on [`CsiError::code`] rather than on the variant.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse failure class of a [`CsiError`], mirroring the status codes the
/// orchestrator understands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    /// A required field is missing or malformed.
    InvalidArgument,
    /// The object exists with incompatible parameters.
    AlreadyExists,
    /// The operation is not implemented by this plugin.
    Unsupported,
    /// Unexpected backend, filesystem, mount, or transport failure.
    Internal,
}

/// Unified error type for CSI operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone)]
pub enum CsiError {
    /// A different object already occupies the requested volume path.
    #[error("volume {0} already exists")]
    VolumeAlreadyExists(String),

    /// The target path is already mounted in a way that conflicts with the
    /// request.
    #[error("target {path} already published: {reason}")]
    PublishConflict {
        /// Target path of the existing mount.
        path: String,
        /// Human-readable description of the mismatch.
        reason: String,
    },

    /// A mount operation failed.
    #[error("mount failed at {path}: {reason}")]
    MountFailed {
        /// Filesystem path where the mount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// An unmount operation failed.
    #[error("unmount failed at {path}: {reason}")]
    UnmountFailed {
        /// Filesystem path where the unmount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// The storage backend (the NFS export) returned an error.
    #[error("backend error: {0}")]
    BackendError(String),

    /// A QUIC / transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The named operation is not supported by this plugin.
    #[error("{0} is not supported")]
    Unsupported(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CsiError {
    /// Create a [`CsiError::TransportError`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::TransportError(e.to_string())
    }

    /// Create a [`CsiError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Create a [`CsiError::Unsupported`] naming the rejected operation.
    pub fn unsupported(op: &str) -> Self {
        Self::Unsupported(op.to_owned())
    }

    /// The failure class of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::VolumeAlreadyExists(_) | Self::PublishConflict { .. } => {
                ErrorCode::AlreadyExists
            }
            Self::Unsupported(_) => ErrorCode::Unsupported,
            Self::MountFailed { .. }
            | Self::UnmountFailed { .. }
            | Self::BackendError(_)
            | Self::TransportError(_)
            | Self::Internal(_) => ErrorCode::Internal,
        }
    }
}
