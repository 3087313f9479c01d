//! CSI Node service trait.
//!
//! The Node service runs on each worker node and handles the local filesystem
//! operations required to make a volume available to Pod containers:
//!
//! 1. **Publish**: mount the volume at the Pod's target path.
//! 2. **Unpublish**: unmount it and remove the target directory.
//!
//! Stage/unstage (a node-global mount shared by several publishes) is
//! optional and defaults to [`CsiError::Unsupported`].

use async_trait::async_trait;

use crate::capability::NodeCapability;
use crate::error::CsiError;
use crate::types::{NodeInfo, NodePublishVolumeRequest, NodeStageVolumeRequest, VolumeId};

/// Node service: local mount / unmount operations.
#[async_trait]
pub trait CsiNode: Send + Sync {
    /// Stage a volume at a node-global path.
    async fn stage_volume(&self, _req: NodeStageVolumeRequest) -> Result<(), CsiError> {
        Err(CsiError::unsupported("NodeStageVolume"))
    }

    /// Undo [`Self::stage_volume`].
    async fn unstage_volume(
        &self,
        _volume_id: &VolumeId,
        _staging_target_path: &str,
    ) -> Result<(), CsiError> {
        Err(CsiError::unsupported("NodeUnstageVolume"))
    }

    /// Publish a volume: mount it at `req.target_path`.
    ///
    /// This is idempotent: calling it again for the same `target_path` should
    /// succeed without error.
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError>;

    /// Unpublish a volume: unmount `target_path` and remove the directory.
    ///
    /// This is idempotent.
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError>;

    /// Operations this node service implements beyond publish/unpublish.
    async fn get_node_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError>;

    /// Return information about the node on which this service is running.
    async fn get_info(&self) -> Result<NodeInfo, CsiError>;
}
