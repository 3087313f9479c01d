//! QUIC server that runs on each worker node and dispatches incoming CSI
//! requests to the appropriate trait implementations.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::crypto::rustls::QuicServerConfig;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::message::CsiMessage;
use crate::node::CsiNode;

/// Upper bound on the size of a serialized request.
const MAX_REQUEST_BYTES: usize = 16 * 1024 * 1024;

/// A CSI server that accepts QUIC connections and dispatches
/// [`CsiMessage`] requests to an [`CsiIdentity`] + [`CsiController`] +
/// [`CsiNode`] implementation.
pub struct CsiServer<T> {
    endpoint: quinn::Endpoint,
    handler: Arc<T>,
}

impl<T> CsiServer<T>
where
    T: CsiIdentity + CsiController + CsiNode + 'static,
{
    /// Create a new server bound to `addr`.
    ///
    /// `tls_config` carries the server certificate and key; see the `rkcsi`
    /// binary for loading them from PEM files.
    pub fn new(
        addr: SocketAddr,
        tls_config: rustls::ServerConfig,
        handler: Arc<T>,
    ) -> Result<Self, CsiError> {
        let quic_server_config = QuicServerConfig::try_from(tls_config)
            .map_err(|e| CsiError::TransportError(format!("invalid TLS config: {e}")))?;
        let server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_server_config));
        let endpoint = quinn::Endpoint::server(server_config, addr).map_err(CsiError::transport)?;
        info!(%addr, "CSI QUIC server listening");
        Ok(Self { endpoint, handler })
    }

    /// Accept connections in a loop until the endpoint is closed.
    ///
    /// Each accepted connection spawns a Tokio task, and each bi-stream
    /// within a connection is handled concurrently.
    pub async fn serve(&self) -> Result<(), CsiError> {
        while let Some(incoming) = self.endpoint.accept().await {
            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                match incoming.await {
                    Ok(conn) => {
                        let remote = conn.remote_address();
                        debug!(%remote, "CSI connection accepted");
                        if let Err(e) = Self::handle_connection(conn, handler).await {
                            warn!(%remote, error = %e, "CSI connection error");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "CSI incoming connection failed");
                    }
                }
            });
        }
        Ok(())
    }

    /// Handle all bi-streams on a single connection.
    async fn handle_connection(conn: quinn::Connection, handler: Arc<T>) -> Result<(), CsiError> {
        loop {
            let (send, recv) = match conn.accept_bi().await {
                Ok(stream) => stream,
                Err(quinn::ConnectionError::ApplicationClosed(_)) => return Ok(()),
                Err(e) => return Err(CsiError::transport(e)),
            };

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_stream(send, recv, &handler).await {
                    error!(error = %e, "CSI stream handler error");
                }
            });
        }
    }

    /// Process a single bi-stream: read request → dispatch → write response.
    #[instrument(skip_all)]
    async fn handle_stream(
        mut send: quinn::SendStream,
        mut recv: quinn::RecvStream,
        handler: &T,
    ) -> Result<(), CsiError> {
        // Read the full request.
        let response = match recv.read_to_end(MAX_REQUEST_BYTES).await {
            Ok(buf) => Self::handle_request(handler, &buf).await,
            Err(quinn::ReadToEndError::TooLong) => CsiMessage::Error(CsiError::InvalidArgument(
                format!("request exceeds {MAX_REQUEST_BYTES} bytes"),
            )),
            Err(e) => return Err(CsiError::transport(e)),
        };
        if let CsiMessage::Error(e) = &response {
            warn!(code = ?e.code(), error = %e, "CSI request failed");
        }

        // Serialize and send the response.
        let payload = serde_json::to_vec(&response).map_err(CsiError::internal)?;
        send.write_all(&payload)
            .await
            .map_err(CsiError::transport)?;
        send.finish().map_err(CsiError::transport)?;
        Ok(())
    }

    /// Decode one request and dispatch it.  Undecodable input is answered
    /// with [`CsiError::InvalidArgument`] so the client is not left waiting.
    async fn handle_request(handler: &T, buf: &[u8]) -> CsiMessage {
        match serde_json::from_slice::<CsiMessage>(buf) {
            Ok(request) => {
                debug!(%request, "CSI request received");
                Self::dispatch(handler, request).await
            }
            Err(e) => CsiMessage::Error(CsiError::InvalidArgument(format!(
                "malformed request: {e}"
            ))),
        }
    }

    /// Map a [`CsiMessage`] request to the correct trait method call and
    /// wrap the result in a response [`CsiMessage`].
    async fn dispatch(handler: &T, request: CsiMessage) -> CsiMessage {
        if let Some(op) = request.unsupported_operation() {
            debug!(%op, "rejecting unsupported operation");
            return CsiMessage::Error(CsiError::unsupported(op));
        }

        match request {
            // --- Identity ---------------------------------------------------
            CsiMessage::Probe => match handler.probe().await {
                Ok(ok) => CsiMessage::ProbeResult(ok),
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::GetPluginInfo => match handler.get_plugin_info().await {
                Ok(info) => CsiMessage::PluginInfoResponse(info),
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::GetPluginCapabilities => match handler.get_plugin_capabilities().await {
                Ok(caps) => CsiMessage::PluginCapabilitiesResponse(caps),
                Err(e) => CsiMessage::Error(e),
            },

            // --- Controller -------------------------------------------------
            CsiMessage::CreateVolume(req) => match handler.create_volume(req).await {
                Ok(vol) => CsiMessage::VolumeCreated(vol),
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::DeleteVolume(id) => match handler.delete_volume(&id).await {
                Ok(()) => CsiMessage::Ok,
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::ControllerGetCapabilities => {
                match handler.get_controller_capabilities().await {
                    Ok(caps) => CsiMessage::ControllerCapabilitiesResponse(caps),
                    Err(e) => CsiMessage::Error(e),
                }
            }
            CsiMessage::ListVolumes => match handler.list_volumes().await {
                Ok(vols) => CsiMessage::VolumeList(vols),
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::GetCapacity => match handler.get_capacity().await {
                Ok(cap) => CsiMessage::Capacity(cap),
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::ValidateVolumeCapabilities {
                volume_id,
                capabilities,
            } => match handler
                .validate_volume_capabilities(&volume_id, &capabilities)
                .await
            {
                Ok(valid) => CsiMessage::CapabilitiesValid(valid),
                Err(e) => CsiMessage::Error(e),
            },

            // --- Node -------------------------------------------------------
            CsiMessage::StageVolume(req) => match handler.stage_volume(req).await {
                Ok(()) => CsiMessage::Ok,
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::UnstageVolume {
                volume_id,
                staging_target_path,
            } => match handler
                .unstage_volume(&volume_id, &staging_target_path)
                .await
            {
                Ok(()) => CsiMessage::Ok,
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::PublishVolume(req) => match handler.publish_volume(req).await {
                Ok(()) => CsiMessage::Ok,
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::UnpublishVolume {
                volume_id,
                target_path,
            } => match handler.unpublish_volume(&volume_id, &target_path).await {
                Ok(()) => CsiMessage::Ok,
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::NodeGetCapabilities => match handler.get_node_capabilities().await {
                Ok(caps) => CsiMessage::NodeCapabilitiesResponse(caps),
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::GetNodeInfo => match handler.get_info().await {
                Ok(info) => CsiMessage::NodeInfoResponse(info),
                Err(e) => CsiMessage::Error(e),
            },

            // --- Response variants should never arrive as requests ----------
            other => {
                warn!(msg = %other, "unexpected message variant received as request");
                CsiMessage::Error(CsiError::InvalidArgument(format!(
                    "unexpected message: {other}"
                )))
            }
        }
    }

    /// Return a reference to the underlying QUIC endpoint, useful for
    /// obtaining the local address or shutting down.
    pub fn endpoint(&self) -> &quinn::Endpoint {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;
    use crate::backend::nfs::NfsBackend;
    use crate::capability::ControllerCapability;
    use crate::config::NfsDriverConfig;
    use crate::error::ErrorCode;
    use crate::mount::fake::FakeMounter;
    use crate::types::*;

    fn backend(mount_root: PathBuf) -> NfsBackend {
        let config = NfsDriverConfig {
            server: "nfs.example".into(),
            server_root: PathBuf::from("/exports"),
            mount_root,
            ..Default::default()
        };
        NfsBackend::new(config, Arc::new(FakeMounter::default())).unwrap()
    }

    async fn dispatch(handler: &NfsBackend, msg: CsiMessage) -> CsiMessage {
        CsiServer::<NfsBackend>::dispatch(handler, msg).await
    }

    fn error_code(msg: &CsiMessage) -> Option<ErrorCode> {
        match msg {
            CsiMessage::Error(e) => Some(e.code()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn unsupported_surface() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = backend(tmp.path().to_path_buf());

        let requests = vec![
            CsiMessage::StageVolume(NodeStageVolumeRequest {
                volume_id: "pvc-1".into(),
                staging_target_path: "/staging/pvc-1".into(),
                volume_capability: VolumeCapability::default(),
                volume_context: Default::default(),
            }),
            CsiMessage::UnstageVolume {
                volume_id: "pvc-1".into(),
                staging_target_path: "/staging/pvc-1".into(),
            },
            CsiMessage::ControllerPublishVolume {
                volume_id: "pvc-1".into(),
                node_id: "node-a".into(),
            },
            CsiMessage::CreateSnapshot {
                source_volume_id: "pvc-1".into(),
                name: "snap-1".into(),
            },
            CsiMessage::ListSnapshots,
            CsiMessage::ControllerExpandVolume {
                volume_id: "pvc-1".into(),
                capacity_bytes: 1 << 30,
            },
            CsiMessage::NodeGetVolumeStats {
                volume_id: "pvc-1".into(),
                volume_path: "/mnt/pvc-1".into(),
            },
            CsiMessage::ValidateVolumeCapabilities {
                volume_id: "pvc-1".into(),
                capabilities: vec![],
            },
            CsiMessage::ListVolumes,
            CsiMessage::GetCapacity,
        ];
        for req in requests {
            let name = req.to_string();
            let resp = dispatch(&handler, req).await;
            assert_eq!(error_code(&resp), Some(ErrorCode::Unsupported), "{name}");
        }
    }

    #[tokio::test]
    async fn lifecycle_through_dispatch() {
        let tmp = tempfile::tempdir().unwrap();
        let export = tmp.path().join("export");
        std::fs::create_dir(&export).unwrap();
        let handler = backend(export.clone());

        let resp = dispatch(
            &handler,
            CsiMessage::CreateVolume(CreateVolumeRequest {
                name: "pvc-1".into(),
                ..Default::default()
            }),
        )
        .await;
        let CsiMessage::VolumeCreated(vol) = resp else {
            panic!("unexpected response: {resp}");
        };
        assert_eq!(vol.capacity_bytes, 0);

        let target = tmp.path().join("mnt/pvc-1").display().to_string();
        let resp = dispatch(
            &handler,
            CsiMessage::PublishVolume(NodePublishVolumeRequest {
                volume_id: vol.volume_id.clone(),
                target_path: target.clone(),
                volume_capability: Some(VolumeCapability::default()),
                read_only: false,
                volume_context: Default::default(),
            }),
        )
        .await;
        assert!(matches!(resp, CsiMessage::Ok), "{resp}");

        let resp = dispatch(
            &handler,
            CsiMessage::UnpublishVolume {
                volume_id: vol.volume_id.clone(),
                target_path: target,
            },
        )
        .await;
        assert!(matches!(resp, CsiMessage::Ok), "{resp}");

        let resp = dispatch(&handler, CsiMessage::DeleteVolume(vol.volume_id)).await;
        assert!(matches!(resp, CsiMessage::Ok), "{resp}");
        assert!(!export.join("pvc-1").exists());
    }

    #[tokio::test]
    async fn capability_queries() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = backend(tmp.path().to_path_buf());

        let resp = dispatch(&handler, CsiMessage::ControllerGetCapabilities).await;
        assert!(matches!(
            resp,
            CsiMessage::ControllerCapabilitiesResponse(ref caps)
                if caps == &[ControllerCapability::CreateDeleteVolume]
        ));

        let resp = dispatch(&handler, CsiMessage::NodeGetCapabilities).await;
        assert!(matches!(resp, CsiMessage::NodeCapabilitiesResponse(ref caps) if caps.is_empty()));

        let resp = dispatch(&handler, CsiMessage::Probe).await;
        assert!(matches!(resp, CsiMessage::ProbeResult(true)));
    }

    #[tokio::test]
    async fn invalid_publish_maps_to_invalid_argument() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = backend(tmp.path().to_path_buf());

        let resp = dispatch(
            &handler,
            CsiMessage::PublishVolume(NodePublishVolumeRequest {
                volume_id: "pvc-1".into(),
                target_path: String::new(),
                volume_capability: Some(VolumeCapability::default()),
                read_only: false,
                volume_context: Default::default(),
            }),
        )
        .await;
        assert_eq!(error_code(&resp), Some(ErrorCode::InvalidArgument));
    }

    #[tokio::test]
    async fn response_variant_as_request_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = backend(tmp.path().to_path_buf());

        let resp = dispatch(&handler, CsiMessage::Ok).await;
        assert_eq!(error_code(&resp), Some(ErrorCode::InvalidArgument));
    }

    #[tokio::test]
    async fn malformed_request_gets_an_error_reply() {
        let tmp = tempfile::tempdir().unwrap();
        let handler = backend(tmp.path().to_path_buf());

        for buf in [&b"not json"[..], b"", br#"{"PublishVolume":{}}"#] {
            let resp = CsiServer::<NfsBackend>::handle_request(&handler, buf).await;
            assert_eq!(error_code(&resp), Some(ErrorCode::InvalidArgument), "{resp}");
        }

        let resp = CsiServer::<NfsBackend>::handle_request(&handler, br#""Probe""#).await;
        assert!(matches!(resp, CsiMessage::ProbeResult(true)), "{resp}");
    }
}
