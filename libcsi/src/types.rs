//! Core CSI types: volumes, capabilities, requests, and node info.
//!
//! These types form the data model shared by the CSI traits, transport layer,
//! and backend implementations.  They are all [`Serialize`]/[`Deserialize`] so
//! they can be transmitted over QUIC as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// Opaque, unique identifier for a volume.
///
/// For the NFS backend this is the name of the volume directory on the
/// export, see [`crate::paths::validate_volume_id`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Access mode & capabilities
// ---------------------------------------------------------------------------

/// Describes how a volume may be accessed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessMode {
    /// Single-node read-write.
    ReadWriteOnce,
    /// Multi-node read-only.
    ReadOnlyMany,
    /// Multi-node read-write.
    ReadWriteMany,
}

/// Filesystem access parameters for a mounted volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountVolume {
    /// Requested filesystem type; empty means the backend default.
    #[serde(default)]
    pub fs_type: String,
    /// Additional mount flags (e.g. `"nfsvers=4.1"`, `"noatime"`).
    #[serde(default)]
    pub mount_flags: Vec<String>,
}

/// Whether the volume is consumed as a filesystem or a raw block device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessType {
    /// Mounted filesystem.
    Mount(MountVolume),
    /// Raw block device.
    Block,
}

/// Describes the capabilities required from a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeCapability {
    /// Requested access mode.
    pub access_mode: AccessMode,
    /// Requested access type.
    pub access_type: AccessType,
}

impl VolumeCapability {
    /// Mount parameters, or `None` for block access.
    pub fn mount(&self) -> Option<&MountVolume> {
        match &self.access_type {
            AccessType::Mount(m) => Some(m),
            AccessType::Block => None,
        }
    }
}

impl Default for VolumeCapability {
    fn default() -> Self {
        Self {
            access_mode: AccessMode::ReadWriteMany,
            access_type: AccessType::Mount(MountVolume::default()),
        }
    }
}

// ---------------------------------------------------------------------------
// Volume metadata
// ---------------------------------------------------------------------------

/// Metadata for a provisioned volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    /// Unique volume identifier.
    pub volume_id: VolumeId,
    /// Provisioned capacity in bytes; `0` means unconstrained.
    pub capacity_bytes: u64,
    /// Opaque context passed from Controller to Node operations.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Attachment state
// ---------------------------------------------------------------------------

/// Lifecycle state of a `(volume, target_path)` attachment on this node.
///
/// Never stored; always derived from the mount table at the start of a
/// transition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AttachmentState {
    /// The target path does not exist.
    Absent,
    /// The target directory exists but nothing is mounted on it.
    Staged,
    /// The export is mounted at the target path.
    Attached,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Request to create a new volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    /// Name for the volume; becomes the volume id.
    pub name: String,
    /// Desired capacity in bytes.  Recorded in logs, never enforced.
    pub capacity_bytes: u64,
    /// Required capabilities.
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    /// Arbitrary parameters forwarded to the backend.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// Request to stage (globally mount) a volume on a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStageVolumeRequest {
    /// Volume to stage.
    pub volume_id: VolumeId,
    /// Global staging mount point.
    pub staging_target_path: String,
    /// Requested capability.
    pub volume_capability: VolumeCapability,
    /// Opaque context carried from `CreateVolume`.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
}

/// Request to publish (mount) a volume at a workload-visible path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodePublishVolumeRequest {
    /// Volume to publish.
    pub volume_id: VolumeId,
    /// Target path on the node,
    /// e.g. `/var/lib/rkl/pods/<pod-uid>/volumes/<vol-name>`.
    pub target_path: String,
    /// Requested capability.  Publishing requires the mount access type.
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    /// Whether the mount should be read-only.
    #[serde(default)]
    pub read_only: bool,
    /// Opaque context carried from `CreateVolume`.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Plugin & node info
// ---------------------------------------------------------------------------

/// Information about the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name, e.g. `"rk8s.nfs.csi"`.
    pub name: String,
    /// Vendor-provided version string.
    pub vendor_version: String,
}

/// Information about the node on which the CSI Node service runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Unique node identifier.
    pub node_id: String,
    /// Maximum number of volumes the node can host; `0` means no limit.
    pub max_volumes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_id_display() {
        let id = VolumeId("vol-abc".into());
        assert_eq!(id.to_string(), "vol-abc");
    }

    #[test]
    fn create_volume_request_default() {
        let req = CreateVolumeRequest::default();
        assert!(req.name.is_empty());
        assert_eq!(req.capacity_bytes, 0);
    }

    #[test]
    fn volume_capability_default_is_mount() {
        let cap = VolumeCapability::default();
        assert_eq!(cap.access_mode, AccessMode::ReadWriteMany);
        assert!(cap.mount().is_some_and(|m| m.mount_flags.is_empty()));
    }

    #[test]
    fn block_capability_has_no_mount() {
        let cap = VolumeCapability {
            access_mode: AccessMode::ReadWriteOnce,
            access_type: AccessType::Block,
        };
        assert!(cap.mount().is_none());
    }

    #[test]
    fn publish_request_capability_is_optional() {
        let json = r#"{"volume_id":"pvc-1","target_path":"/mnt/pvc-1"}"#;
        let req: NodePublishVolumeRequest = serde_json::from_str(json).expect("deserialize");
        assert!(req.volume_capability.is_none());
        assert!(!req.read_only);
    }
}
