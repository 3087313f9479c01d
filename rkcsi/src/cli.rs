//! Command-line arguments of the plugin.
//!
//! Every flag can also be set through an environment variable so the plugin
//! can be configured from a Pod spec without a wrapper script.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use libcsi::NfsDriverConfig;
use libcsi::config::{DEFAULT_DRIVER_NAME, DEFAULT_MOUNT_PATH, DEFAULT_NODE_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "rkcsi", about = "NFS-backed CSI plugin for RK8s", version)]
pub struct Args {
    /// Address the QUIC endpoint listens on.
    #[arg(long, env = "CSI_LISTEN", default_value = "0.0.0.0:7443")]
    pub listen: SocketAddr,
    /// PEM file with the server certificate chain.
    #[arg(long, env = "CSI_TLS_CERT")]
    pub tls_cert: PathBuf,
    /// PEM file with the server private key.
    #[arg(long, env = "CSI_TLS_KEY")]
    pub tls_key: PathBuf,
    /// Name reported by GetPluginInfo.
    #[arg(long, env = "CSI_DRIVER_NAME", default_value = DEFAULT_DRIVER_NAME)]
    pub driver_name: String,
    /// Version reported by GetPluginInfo.
    #[arg(long, env = "CSI_VENDOR_VERSION", default_value = env!("CARGO_PKG_VERSION"))]
    pub vendor_version: String,
    /// Node id reported by NodeGetInfo.
    #[arg(long, env = "CSI_NODE_ID", default_value = DEFAULT_NODE_ID)]
    pub node_id: String,
    /// NFS server address.
    #[arg(long, env = "CSI_NFS_SERVER")]
    pub server: String,
    /// Export root on the NFS server.
    #[arg(long, env = "CSI_NFS_SERVER_PATH")]
    pub server_path: PathBuf,
    /// Local mount of the export root used to create and delete volumes.
    #[arg(long, env = "CSI_NFS_MOUNT_PATH", default_value = DEFAULT_MOUNT_PATH)]
    pub mount_path: PathBuf,
    /// Log output format; the level comes from RUST_LOG.
    #[arg(long, env = "CSI_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Args {
    /// Driver configuration described by these arguments.
    pub fn driver_config(&self) -> NfsDriverConfig {
        NfsDriverConfig {
            driver_name: self.driver_name.clone(),
            vendor_version: self.vendor_version.clone(),
            node_id: self.node_id.clone(),
            server: self.server.clone(),
            server_root: self.server_path.clone(),
            mount_root: self.mount_path.clone(),
        }
    }
}
