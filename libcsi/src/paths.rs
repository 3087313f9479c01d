//! Mapping from volume ids to export paths and mount sources.
//!
//! Every function here is pure; the only failure is a volume id that could
//! escape its root directory.

use std::path::{Path, PathBuf};

use crate::error::CsiError;
use crate::types::VolumeId;

/// Reject ids that are empty or that would resolve outside the export root
/// once joined onto it.
pub fn validate_volume_id(volume_id: &VolumeId) -> Result<(), CsiError> {
    let id = volume_id.0.as_str();
    if id.is_empty() {
        return Err(CsiError::InvalidArgument("volume id is empty".into()));
    }
    if id == "." || id == ".." || id.contains('/') || id.contains('\0') {
        return Err(CsiError::InvalidArgument(format!(
            "volume id {id:?} is not a plain directory name"
        )));
    }
    Ok(())
}

/// Path of the volume directory on the NFS server, e.g. `/exports/pvc-1`.
pub fn export_path(server_root: &Path, volume_id: &VolumeId) -> Result<PathBuf, CsiError> {
    validate_volume_id(volume_id)?;
    Ok(server_root.join(&volume_id.0))
}

/// Path of the volume directory as seen through the controller's local mount
/// of the export root.
pub fn local_path(mount_root: &Path, volume_id: &VolumeId) -> Result<PathBuf, CsiError> {
    validate_volume_id(volume_id)?;
    Ok(mount_root.join(&volume_id.0))
}

/// NFS mount source in `server:/path` syntax.
pub fn mount_source(server: &str, export_path: &Path) -> String {
    format!("{server}:{}", export_path.display())
}
