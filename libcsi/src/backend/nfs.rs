//! NFS storage backend for CSI.
//!
//! [`NfsBackend`] implements [`CsiIdentity`], [`CsiController`], and
//! [`CsiNode`] on top of a single NFS export.  A volume is a directory
//! directly below the export root; publishing mounts that directory at the
//! workload's target path.
//!
//! # Layout
//!
//! ```text
//! <server>:<server_root>/          # the export, as seen by the NFS server
//!   <volume-id>/                   # one directory per volume
//!
//! <mount_root>/                    # the same export, mounted on the controller
//!   <volume-id>/                   # created / removed by Create/DeleteVolume
//! ```
//!
//! # State
//!
//! The backend keeps no record of volumes or attachments.  A volume exists
//! while its directory exists; an attachment exists while the mount table
//! lists its target path.  Every operation re-derives that state before
//! acting, so retries after a crash or a timeout converge.
//!
//! # Concurrency
//!
//! Publish/unpublish on the same target path and create/delete on the same
//! volume id are serialized through [`KeyedLock`]s.  The blocking part of each
//! transition runs on the blocking thread pool and owns the lock guard, so a
//! caller that gives up mid-mount cannot let a second transition start
//! before the first one has finished.

use std::collections::HashMap;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::capability::{
    CapabilityRegistry, ControllerCapability, NodeCapability, PluginCapability,
};
use crate::config::{DEFAULT_FS_TYPE, NfsDriverConfig};
use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::lock::KeyedLock;
use crate::mount::{
    MountEntry, MountState, Mounter, SystemMounter, cleanup_mount_point, mount_state,
};
use crate::node::CsiNode;
use crate::paths;
use crate::types::*;

/// Mode of volume and target directories created by the backend.
const DIR_MODE: u32 = 0o755;

/// Filesystem types accepted in a publish request's mount capability.
const NFS_FS_TYPES: [&str; 2] = ["nfs", "nfs4"];

/// Concrete CSI backend backed by one NFS export.
pub struct NfsBackend {
    config: NfsDriverConfig,
    mounter: Arc<dyn Mounter>,
    capabilities: CapabilityRegistry,
    /// Serializes publish/unpublish per target path.
    target_locks: KeyedLock,
    /// Serializes create/delete per volume id.
    volume_locks: KeyedLock,
}

/// Everything needed to mount one volume at one target path.
#[derive(Debug, Clone)]
struct Attachment {
    source: String,
    target: PathBuf,
    fs_type: String,
    options: Vec<String>,
    read_only: bool,
}

impl NfsBackend {
    /// Create a backend that mounts through `mounter`.
    ///
    /// Fails when `config` is incomplete.
    pub fn new(config: NfsDriverConfig, mounter: Arc<dyn Mounter>) -> Result<Self, CsiError> {
        config.validate()?;
        Ok(Self {
            config,
            mounter,
            capabilities: CapabilityRegistry::new(
                [PluginCapability::ControllerService],
                [ControllerCapability::CreateDeleteVolume],
                [],
            ),
            target_locks: KeyedLock::new(),
            volume_locks: KeyedLock::new(),
        })
    }

    /// Create a backend that mounts through the host's `mount` helper.
    pub fn with_system_mounter(config: NfsDriverConfig) -> Result<Self, CsiError> {
        Self::new(config, Arc::new(SystemMounter::default()))
    }

    /// Build the attachment for a publish request, rejecting malformed input
    /// before anything touches the filesystem.
    fn attachment(&self, req: &NodePublishVolumeRequest) -> Result<Attachment, CsiError> {
        if req.target_path.is_empty() {
            return Err(CsiError::InvalidArgument("target path is empty".into()));
        }
        let capability = req
            .volume_capability
            .as_ref()
            .ok_or_else(|| CsiError::InvalidArgument("volume capability is missing".into()))?;
        let mount = capability.mount().ok_or_else(|| {
            CsiError::InvalidArgument("block access type is not supported".into())
        })?;

        let fs_type = if mount.fs_type.is_empty() {
            DEFAULT_FS_TYPE.to_owned()
        } else if NFS_FS_TYPES.contains(&mount.fs_type.as_str()) {
            mount.fs_type.clone()
        } else {
            return Err(CsiError::InvalidArgument(format!(
                "filesystem type {} is not supported",
                mount.fs_type
            )));
        };

        let export = paths::export_path(&self.config.server_root, &req.volume_id)?;
        let mut options = mount.mount_flags.clone();
        if req.read_only && !options.iter().any(|o| o == "ro") {
            options.push("ro".to_owned());
        }
        // A "ro" mount flag makes the mount read-only whatever `read_only` says.
        let read_only = options.iter().any(|o| o == "ro");

        Ok(Attachment {
            source: paths::mount_source(&self.config.server, &export),
            target: PathBuf::from(&req.target_path),
            fs_type,
            options,
            read_only,
        })
    }
}

/// Run blocking filesystem / mount work on the blocking pool.
///
/// The closure always runs to completion, even when the awaiting request is
/// dropped.
async fn run_blocking<T, F>(op: &'static str, f: F) -> Result<T, CsiError>
where
    F: FnOnce() -> Result<T, CsiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CsiError::Internal(format!("{op}: blocking task failed: {e}")))?
}

/// Lock key for a target path: `/a//b/` and `/a/b` are the same target.
fn target_key(path: &str) -> String {
    Path::new(path)
        .components()
        .collect::<PathBuf>()
        .to_string_lossy()
        .into_owned()
}

// ---------------------------------------------------------------------------
// Volume directories
// ---------------------------------------------------------------------------

/// Create the volume directory.  Returns `false` when it already existed.
fn create_volume_dir(dir: &Path) -> Result<bool, CsiError> {
    match std::fs::DirBuilder::new().mode(DIR_MODE).create(dir) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            if dir.is_dir() {
                Ok(false)
            } else {
                Err(CsiError::VolumeAlreadyExists(format!(
                    "{} (not a directory)",
                    dir.display()
                )))
            }
        }
        Err(e) => Err(CsiError::BackendError(format!(
            "create dir {}: {e}",
            dir.display()
        ))),
    }
}

/// Remove the volume directory tree.  Returns `false` when it was already
/// gone.
fn remove_volume_dir(dir: &Path) -> Result<bool, CsiError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CsiError::BackendError(format!(
            "remove dir {}: {e}",
            dir.display()
        ))),
    }
}

// ---------------------------------------------------------------------------
// Attach / detach
// ---------------------------------------------------------------------------

/// Bring `att.target` to the attached state.
fn attach(mounter: &dyn Mounter, att: &Attachment) -> Result<(), CsiError> {
    let target = att.target.as_path();
    let state = mount_state(mounter, target)
        .map_err(|e| CsiError::Internal(format!("inspect {}: {e}", target.display())))?;

    match state {
        MountState::Mounted(existing) => return check_existing(&existing, att),
        MountState::PathMissing => {
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(DIR_MODE)
                .create(target)
                .map_err(|e| {
                    CsiError::Internal(format!("create target dir {}: {e}", target.display()))
                })?;
            debug!(
                target = %target.display(),
                state = ?AttachmentState::Staged,
                "created target directory",
            );
        }
        MountState::NotMounted => {
            debug!(
                target = %target.display(),
                state = ?AttachmentState::Staged,
                "target directory present",
            );
        }
    }

    mounter.mount(&att.source, target, &att.fs_type, &att.options)?;
    info!(
        source = %att.source,
        target = %target.display(),
        options = ?att.options,
        state = ?AttachmentState::Attached,
        "volume published",
    );
    Ok(())
}

/// Accept an existing mount as the result of an earlier identical publish,
/// unless its read-only state contradicts the request.
fn check_existing(existing: &MountEntry, att: &Attachment) -> Result<(), CsiError> {
    let mode = |ro: bool| if ro { "read-only" } else { "read-write" };
    if existing.is_read_only() != att.read_only {
        return Err(CsiError::PublishConflict {
            path: att.target.display().to_string(),
            reason: format!(
                "mounted {} from {}, requested {}",
                mode(existing.is_read_only()),
                existing.source,
                mode(att.read_only)
            ),
        });
    }
    if existing.source != att.source {
        // Server names are not canonical (host vs. IP, trailing slashes), so
        // a differing source is reported but not rejected.
        warn!(
            target = %att.target.display(),
            mounted = %existing.source,
            requested = %att.source,
            "target mounted from a different source",
        );
    }
    debug!(
        target = %att.target.display(),
        state = ?AttachmentState::Attached,
        "target already mounted, assuming idempotent retry",
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// CsiIdentity
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiIdentity for NfsBackend {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        Ok(PluginInfo {
            name: self.config.driver_name.clone(),
            vendor_version: self.config.vendor_version.clone(),
        })
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        // Nothing to warm up: every call talks to the export directly.
        Ok(true)
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        Ok(self.capabilities.plugin().to_vec())
    }
}

// ---------------------------------------------------------------------------
// CsiController
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiController for NfsBackend {
    #[instrument(skip(self, req), fields(name = %req.name))]
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError> {
        let volume_id = VolumeId(req.name);
        let dir = paths::local_path(&self.config.mount_root, &volume_id)?;

        let guard = self.volume_locks.lock(&volume_id.0).await;
        let created = run_blocking("CreateVolume", move || {
            let _guard = guard;
            create_volume_dir(&dir)
        })
        .await?;

        if created {
            info!(%volume_id, requested_bytes = req.capacity_bytes, "volume created");
        } else {
            debug!(%volume_id, "volume directory already exists, idempotent create");
        }

        Ok(Volume {
            volume_id,
            capacity_bytes: 0,
            volume_context: HashMap::new(),
        })
    }

    #[instrument(skip(self))]
    async fn delete_volume(&self, volume_id: &VolumeId) -> Result<(), CsiError> {
        let dir = paths::local_path(&self.config.mount_root, volume_id)?;

        let guard = self.volume_locks.lock(&volume_id.0).await;
        let removed = run_blocking("DeleteVolume", move || {
            let _guard = guard;
            remove_volume_dir(&dir)
        })
        .await?;

        if removed {
            info!(%volume_id, "volume deleted");
        } else {
            debug!(%volume_id, "volume directory gone, nothing to delete");
        }
        Ok(())
    }

    async fn get_controller_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError> {
        Ok(self.capabilities.controller().to_vec())
    }
}

// ---------------------------------------------------------------------------
// CsiNode
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiNode for NfsBackend {
    #[instrument(
        skip(self, req),
        fields(volume_id = %req.volume_id, target_path = %req.target_path)
    )]
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError> {
        let attachment = self.attachment(&req)?;

        let guard = self.target_locks.lock(&target_key(&req.target_path)).await;
        let mounter = Arc::clone(&self.mounter);
        run_blocking("NodePublishVolume", move || {
            let _guard = guard;
            attach(mounter.as_ref(), &attachment)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError> {
        if target_path.is_empty() {
            return Err(CsiError::InvalidArgument("target path is empty".into()));
        }

        let target = PathBuf::from(target_path);
        let guard = self.target_locks.lock(&target_key(target_path)).await;
        let mounter = Arc::clone(&self.mounter);
        run_blocking("NodeUnpublishVolume", move || {
            let _guard = guard;
            cleanup_mount_point(mounter.as_ref(), &target)
        })
        .await?;

        info!(%volume_id, %target_path, state = ?AttachmentState::Absent, "volume unpublished");
        Ok(())
    }

    async fn get_node_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError> {
        Ok(self.capabilities.node().to_vec())
    }

    async fn get_info(&self) -> Result<NodeInfo, CsiError> {
        Ok(NodeInfo {
            node_id: self.config.node_id.clone(),
            max_volumes: 0,
        })
    }
}
