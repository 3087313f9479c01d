//! CSI protocol messages transmitted over QUIC.
//!
//! [`CsiMessage`] is the top-level envelope for all request and response
//! variants exchanged between the CSI client (RKS side) and the CSI server
//! (Node side) via QUIC bi-directional streams.

use serde::{Deserialize, Serialize};

use crate::capability::{ControllerCapability, NodeCapability, PluginCapability};
use crate::error::CsiError;
use crate::types::*;

/// Top-level message envelope for CSI over QUIC.
///
/// Each QUIC bi-stream carries exactly one request followed by one response.
/// The client sends a *request* variant and the server replies with the
/// corresponding *response* variant (or [`CsiMessage::Error`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CsiMessage {
    // ----- Requests --------------------------------------------------------
    /// Create a new volume (Controller).
    CreateVolume(CreateVolumeRequest),
    /// Delete a volume (Controller).
    DeleteVolume(VolumeId),
    /// Query the operations the controller implements (Controller).
    ControllerGetCapabilities,
    /// List all known volumes (Controller).
    ListVolumes,
    /// Query remaining capacity (Controller).
    GetCapacity,
    /// Validate volume capabilities (Controller).
    ValidateVolumeCapabilities {
        volume_id: VolumeId,
        capabilities: Vec<VolumeCapability>,
    },
    /// Attach a volume to a node (Controller).
    ControllerPublishVolume { volume_id: VolumeId, node_id: String },
    /// Detach a volume from a node (Controller).
    ControllerUnpublishVolume { volume_id: VolumeId, node_id: String },
    /// Describe a single volume (Controller).
    ControllerGetVolume(VolumeId),
    /// Grow a volume on the backend (Controller).
    ControllerExpandVolume {
        volume_id: VolumeId,
        capacity_bytes: u64,
    },
    /// Snapshot a volume (Controller).
    CreateSnapshot {
        source_volume_id: VolumeId,
        name: String,
    },
    /// Delete a snapshot (Controller).
    DeleteSnapshot { snapshot_id: String },
    /// List snapshots (Controller).
    ListSnapshots,

    /// Stage a volume at a global path (Node).
    StageVolume(NodeStageVolumeRequest),
    /// Unstage a previously staged volume (Node).
    UnstageVolume {
        volume_id: VolumeId,
        staging_target_path: String,
    },
    /// Mount a volume at a workload target path (Node).
    PublishVolume(NodePublishVolumeRequest),
    /// Unmount a previously published volume (Node).
    UnpublishVolume {
        volume_id: VolumeId,
        target_path: String,
    },
    /// Query the optional operations the node service implements (Node).
    NodeGetCapabilities,
    /// Grow the filesystem of a published volume (Node).
    NodeExpandVolume {
        volume_id: VolumeId,
        volume_path: String,
        capacity_bytes: u64,
    },
    /// Usage statistics of a published volume (Node).
    NodeGetVolumeStats {
        volume_id: VolumeId,
        volume_path: String,
    },

    /// Health probe (Identity).
    Probe,
    /// Query plugin info (Identity).
    GetPluginInfo,
    /// Query plugin capabilities (Identity).
    GetPluginCapabilities,
    /// Query node info (Node).
    GetNodeInfo,

    // ----- Responses -------------------------------------------------------
    /// A volume was successfully created.
    VolumeCreated(Volume),
    /// A list of volumes.
    VolumeList(Vec<Volume>),
    /// Available capacity in bytes.
    Capacity(u64),
    /// Whether the requested capabilities are valid.
    CapabilitiesValid(bool),
    /// Plugin information.
    PluginInfoResponse(PluginInfo),
    /// Plugin capabilities.
    PluginCapabilitiesResponse(Vec<PluginCapability>),
    /// Controller capabilities.
    ControllerCapabilitiesResponse(Vec<ControllerCapability>),
    /// Node capabilities.
    NodeCapabilitiesResponse(Vec<NodeCapability>),
    /// Node information.
    NodeInfoResponse(NodeInfo),

    /// Generic success acknowledgement (no payload).
    Ok,
    /// Probe result.
    ProbeResult(bool),
    /// An error occurred.
    Error(CsiError),
}

impl CsiMessage {
    /// Operation name for requests that no backend in this crate serves.
    ///
    /// The server answers these with [`CsiError::Unsupported`] without
    /// consulting the handler.
    pub fn unsupported_operation(&self) -> Option<&'static str> {
        match self {
            Self::ControllerPublishVolume { .. } => Some("ControllerPublishVolume"),
            Self::ControllerUnpublishVolume { .. } => Some("ControllerUnpublishVolume"),
            Self::ControllerGetVolume(_) => Some("ControllerGetVolume"),
            Self::ControllerExpandVolume { .. } => Some("ControllerExpandVolume"),
            Self::CreateSnapshot { .. } => Some("CreateSnapshot"),
            Self::DeleteSnapshot { .. } => Some("DeleteSnapshot"),
            Self::ListSnapshots => Some("ListSnapshots"),
            Self::NodeExpandVolume { .. } => Some("NodeExpandVolume"),
            Self::NodeGetVolumeStats { .. } => Some("NodeGetVolumeStats"),
            _ => None,
        }
    }
}

impl std::fmt::Display for CsiMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateVolume(req) => write!(f, "CreateVolume(name={})", req.name),
            Self::DeleteVolume(id) => write!(f, "DeleteVolume({})", id),
            Self::ControllerGetCapabilities => f.write_str("ControllerGetCapabilities"),
            Self::ListVolumes => f.write_str("ListVolumes"),
            Self::GetCapacity => f.write_str("GetCapacity"),
            Self::ValidateVolumeCapabilities { volume_id, .. } => {
                write!(f, "ValidateVolumeCapabilities({})", volume_id)
            }
            Self::ControllerPublishVolume { volume_id, node_id } => {
                write!(f, "ControllerPublishVolume({volume_id}, node={node_id})")
            }
            Self::ControllerUnpublishVolume { volume_id, node_id } => {
                write!(f, "ControllerUnpublishVolume({volume_id}, node={node_id})")
            }
            Self::ControllerGetVolume(id) => write!(f, "ControllerGetVolume({})", id),
            Self::ControllerExpandVolume { volume_id, .. } => {
                write!(f, "ControllerExpandVolume({})", volume_id)
            }
            Self::CreateSnapshot { name, .. } => write!(f, "CreateSnapshot(name={})", name),
            Self::DeleteSnapshot { snapshot_id } => write!(f, "DeleteSnapshot({})", snapshot_id),
            Self::ListSnapshots => f.write_str("ListSnapshots"),
            Self::StageVolume(req) => write!(f, "StageVolume({})", req.volume_id),
            Self::UnstageVolume { volume_id, .. } => write!(f, "UnstageVolume({})", volume_id),
            Self::PublishVolume(req) => {
                write!(f, "PublishVolume({}, target={})", req.volume_id, req.target_path)
            }
            Self::UnpublishVolume {
                volume_id,
                target_path,
            } => write!(f, "UnpublishVolume({volume_id}, target={target_path})"),
            Self::NodeGetCapabilities => f.write_str("NodeGetCapabilities"),
            Self::NodeExpandVolume { volume_id, .. } => {
                write!(f, "NodeExpandVolume({})", volume_id)
            }
            Self::NodeGetVolumeStats { volume_id, .. } => {
                write!(f, "NodeGetVolumeStats({})", volume_id)
            }
            Self::Probe => f.write_str("Probe"),
            Self::GetPluginInfo => f.write_str("GetPluginInfo"),
            Self::GetPluginCapabilities => f.write_str("GetPluginCapabilities"),
            Self::GetNodeInfo => f.write_str("GetNodeInfo"),
            Self::VolumeCreated(v) => write!(f, "VolumeCreated({})", v.volume_id),
            Self::VolumeList(vs) => write!(f, "VolumeList(count={})", vs.len()),
            Self::Capacity(c) => write!(f, "Capacity({})", c),
            Self::CapabilitiesValid(v) => write!(f, "CapabilitiesValid({})", v),
            Self::PluginInfoResponse(info) => {
                write!(f, "PluginInfo(name={})", info.name)
            }
            Self::PluginCapabilitiesResponse(caps) => {
                write!(f, "PluginCapabilities(count={})", caps.len())
            }
            Self::ControllerCapabilitiesResponse(caps) => {
                write!(f, "ControllerCapabilities(count={})", caps.len())
            }
            Self::NodeCapabilitiesResponse(caps) => {
                write!(f, "NodeCapabilities(count={})", caps.len())
            }
            Self::NodeInfoResponse(info) => write!(f, "NodeInfo({})", info.node_id),
            Self::Ok => f.write_str("Ok"),
            Self::ProbeResult(ok) => write!(f, "ProbeResult({})", ok),
            Self::Error(e) => write!(f, "Error({})", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_request_roundtrip() {
        let msg = CsiMessage::PublishVolume(NodePublishVolumeRequest {
            volume_id: "pvc-1".into(),
            target_path: "/mnt/pvc-1".into(),
            volume_capability: Some(VolumeCapability::default()),
            read_only: true,
            volume_context: Default::default(),
        });
        let json = serde_json::to_string(&msg).expect("serialize");
        let de: CsiMessage = serde_json::from_str(&json).expect("deserialize");
        let CsiMessage::PublishVolume(req) = de else {
            panic!("wrong variant: {de}");
        };
        assert!(req.read_only);
        assert_eq!(req.volume_capability, Some(VolumeCapability::default()));
    }

    #[test]
    fn error_message_roundtrip() {
        let msg = CsiMessage::Error(CsiError::unsupported("CreateSnapshot"));
        let json = serde_json::to_string(&msg).expect("serialize");
        let de: CsiMessage = serde_json::from_str(&json).expect("deserialize");
        assert!(matches!(de, CsiMessage::Error(CsiError::Unsupported(op)) if op == "CreateSnapshot"));
    }

    #[test]
    fn unsupported_operations_are_named() {
        let msg = CsiMessage::CreateSnapshot {
            source_volume_id: "pvc-1".into(),
            name: "snap".into(),
        };
        assert_eq!(msg.unsupported_operation(), Some("CreateSnapshot"));
        assert_eq!(CsiMessage::Probe.unsupported_operation(), None);
        assert_eq!(
            CsiMessage::DeleteVolume("pvc-1".into()).unsupported_operation(),
            None
        );
    }

    #[test]
    fn display_formatting() {
        let msg = CsiMessage::Ok;
        assert_eq!(msg.to_string(), "Ok");

        let msg = CsiMessage::UnpublishVolume {
            volume_id: "pvc-1".into(),
            target_path: "/mnt/pvc-1".into(),
        };
        assert_eq!(msg.to_string(), "UnpublishVolume(pvc-1, target=/mnt/pvc-1)");
    }
}
