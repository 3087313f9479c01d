//! # libcsi: Simplified CSI over QUIC for RK8s
//!
//! `libcsi` implements a lightweight [Container Storage Interface][csi] layer
//! that uses QUIC (via [`quinn`]) instead of gRPC for transport, with an NFS
//! export as the storage backend.  It follows the RK8s architecture
//! conventions (Tokio async runtime, `tracing` for observability, `thiserror`
//! for structured errors).
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `Volume`, `VolumeId`, capabilities, requests. |
//! | [`error`] | [`CsiError`] enum and its [`ErrorCode`] classes. |
//! | [`message`] | [`CsiMessage`] protocol envelope for QUIC transport. |
//! | [`identity`] | [`CsiIdentity`] trait: plugin discovery & health. |
//! | [`controller`] | [`CsiController`] trait: volume create/delete. |
//! | [`node`] | [`CsiNode`] trait: publish, unpublish. |
//! | [`capability`] | Static capability sets advertised to the orchestrator. |
//! | [`config`] | [`NfsDriverConfig`], assembled once at startup. |
//! | [`paths`] | Volume id → export path / mount source. |
//! | [`mount`] | Mount primitives and mount-table inspection. |
//! | [`lock`] | Per-key mutual exclusion for lifecycle transitions. |
//! | [`transport`] | QUIC client/server built on `quinn`. |
//! | [`backend`] | Storage backends (NFS). |
//!
//! [csi]: https://github.com/container-storage-interface/spec

pub mod backend;
pub mod capability;
pub mod config;
pub mod controller;
pub mod error;
pub mod identity;
pub mod lock;
pub mod message;
pub mod mount;
pub mod node;
pub mod paths;
pub mod transport;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use backend::nfs::NfsBackend;
pub use capability::{CapabilityRegistry, ControllerCapability, NodeCapability, PluginCapability};
pub use config::NfsDriverConfig;
pub use controller::CsiController;
pub use error::{CsiError, ErrorCode};
pub use identity::CsiIdentity;
pub use message::CsiMessage;
pub use node::CsiNode;
pub use types::*;
