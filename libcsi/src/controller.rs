//! CSI Controller service trait.
//!
//! The Controller service manages the centralized volume lifecycle: creation,
//! deletion, capability validation, listing, and capacity queries.  It is
//! typically invoked by the RKS control plane during scheduling decisions.
//!
//! Only creation, deletion and the capability query are mandatory.  The
//! remaining operations default to [`CsiError::Unsupported`] so the caller
//! can tell "not implemented" apart from a transient failure.

use async_trait::async_trait;

use crate::capability::ControllerCapability;
use crate::error::CsiError;
use crate::types::{CreateVolumeRequest, Volume, VolumeCapability, VolumeId};

/// Controller service: centralized volume management.
///
/// Operations in this trait run on the control plane (RKS) and coordinate
/// with the storage backend to provision / deprovision volumes.
#[async_trait]
pub trait CsiController: Send + Sync {
    /// Provision a new volume.
    ///
    /// Idempotent by name: repeating the call with the same name returns the
    /// same volume.
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError>;

    /// Delete a previously provisioned volume.  Deleting a volume that does
    /// not exist succeeds.
    async fn delete_volume(&self, volume_id: &VolumeId) -> Result<(), CsiError>;

    /// Operations this controller implements.
    async fn get_controller_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError>;

    /// Check whether the given capabilities are compatible with the volume.
    async fn validate_volume_capabilities(
        &self,
        _volume_id: &VolumeId,
        _capabilities: &[VolumeCapability],
    ) -> Result<bool, CsiError> {
        Err(CsiError::unsupported("ValidateVolumeCapabilities"))
    }

    /// List all volumes known to this controller.
    async fn list_volumes(&self) -> Result<Vec<Volume>, CsiError> {
        Err(CsiError::unsupported("ListVolumes"))
    }

    /// Return the total available capacity in bytes.
    async fn get_capacity(&self) -> Result<u64, CsiError> {
        Err(CsiError::unsupported("GetCapacity"))
    }
}
