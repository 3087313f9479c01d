//! Driver configuration.
//!
//! Assembled once at process start (see the `rkcsi` binary) and handed to
//! [`NfsBackend::new`](crate::backend::nfs::NfsBackend::new).  Nothing reads
//! configuration from globals after that.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CsiError;

/// Default plugin name reported by `GetPluginInfo`.
pub const DEFAULT_DRIVER_NAME: &str = "rk8s.nfs.csi";
/// Default node id reported by `NodeGetInfo`.
pub const DEFAULT_NODE_ID: &str = "nfs-csi-node";
/// Default controller-local mount of the export root.
pub const DEFAULT_MOUNT_PATH: &str = "/mount";
/// Filesystem type passed to the mounter when the capability names none.
pub const DEFAULT_FS_TYPE: &str = "nfs";

/// Configuration for an NFS-backed CSI driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NfsDriverConfig {
    /// Plugin name, e.g. `"rk8s.nfs.csi"`.
    pub driver_name: String,
    /// Vendor version string.
    pub vendor_version: String,
    /// Identifier of the node this process runs on.
    pub node_id: String,
    /// NFS server address (host name or IP).
    pub server: String,
    /// Root of the export on the server; volume directories live below it.
    pub server_root: PathBuf,
    /// Where the controller sees the export root locally.
    pub mount_root: PathBuf,
}

impl NfsDriverConfig {
    /// Check the fields that would otherwise only fail on first use.
    pub fn validate(&self) -> Result<(), CsiError> {
        if self.driver_name.is_empty() {
            return Err(CsiError::InvalidArgument("driver name is empty".into()));
        }
        if self.node_id.is_empty() {
            return Err(CsiError::InvalidArgument("node id is empty".into()));
        }
        if self.server.is_empty() {
            return Err(CsiError::InvalidArgument("NFS server is empty".into()));
        }
        if !self.server_root.is_absolute() {
            return Err(CsiError::InvalidArgument(format!(
                "server root {} is not absolute",
                self.server_root.display()
            )));
        }
        if self.mount_root.as_os_str().is_empty() {
            return Err(CsiError::InvalidArgument("mount root is empty".into()));
        }
        Ok(())
    }
}

impl Default for NfsDriverConfig {
    fn default() -> Self {
        Self {
            driver_name: DEFAULT_DRIVER_NAME.to_owned(),
            vendor_version: env!("CARGO_PKG_VERSION").to_owned(),
            node_id: DEFAULT_NODE_ID.to_owned(),
            server: String::new(),
            server_root: PathBuf::from("/"),
            mount_root: PathBuf::from(DEFAULT_MOUNT_PATH),
        }
    }
}
