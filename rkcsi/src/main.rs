//! `rkcsi`: NFS-backed CSI plugin served over QUIC.

mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use libcsi::transport::CsiServer;
use libcsi::NfsBackend;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{Args, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let config = args.driver_config();
    info!(
        driver = %config.driver_name,
        version = %config.vendor_version,
        node_id = %config.node_id,
        server = %config.server,
        "starting CSI plugin",
    );
    if !config.mount_root.is_dir() {
        warn!(
            mount_root = %config.mount_root.display(),
            "export root is not mounted here, CreateVolume/DeleteVolume will fail",
        );
    }

    let backend =
        Arc::new(NfsBackend::with_system_mounter(config).context("invalid driver configuration")?);
    let tls = server_tls(&args.tls_cert, &args.tls_key)?;
    let server = CsiServer::new(args.listen, tls, backend).context("failed to start CSI server")?;

    tokio::select! {
        res = server.serve() => res.context("CSI server stopped")?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            server.endpoint().close(0u32.into(), b"shutdown");
        }
    }
    server.endpoint().wait_idle().await;
    info!("CSI plugin exited");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// TLS 1.3 server configuration from PEM-encoded certificate chain and key.
fn server_tls(cert: &Path, key: &Path) -> Result<rustls::ServerConfig> {
    let certs = CertificateDer::pem_file_iter(cert)
        .with_context(|| format!("Failed to open certificate {}", cert.display()))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse certificate {}", cert.display()))?;
    let key = PrivateKeyDer::from_pem_file(key)
        .with_context(|| format!("Failed to read private key {}", key.display()))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .context("TLS 1.3 is not available")?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("Invalid certificate/key pair")?;
    Ok(config)
}
