//! QUIC client used by the control plane (and tests) to issue CSI requests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quinn::crypto::rustls::QuicClientConfig;
use tracing::{debug, instrument};

use crate::error::CsiError;
use crate::message::CsiMessage;

/// Default upper bound for one request/response exchange.
///
/// Mounting an unreachable NFS server can block for minutes; the orchestrator
/// is expected to retry, and the server finishes the interrupted transition
/// on its own.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Upper bound on the size of a serialized response.
const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

/// A lightweight CSI client that sends [`CsiMessage`] requests over a single
/// QUIC connection and returns the server's response.
pub struct CsiClient {
    connection: quinn::Connection,
    request_timeout: Duration,
}

impl CsiClient {
    /// Establish a new QUIC connection to the CSI server at `addr`.
    ///
    /// * `addr`: socket address of the remote CSI server
    /// * `server_name`: TLS SNI name that must match a SAN in the server's
    ///   certificate (typically the hostname or a fixed name agreed upon when
    ///   certificates are issued by `libvault`)
    /// * `tls_config`: client TLS configuration trusting the server's
    ///   certificate
    pub async fn connect(
        addr: SocketAddr,
        server_name: &str,
        tls_config: rustls::ClientConfig,
    ) -> Result<Self, CsiError> {
        let quic_client_config = QuicClientConfig::try_from(tls_config)
            .map_err(|e| CsiError::TransportError(format!("invalid TLS config: {e}")))?;
        let client_config = quinn::ClientConfig::new(Arc::new(quic_client_config));

        let mut endpoint = quinn::Endpoint::client(SocketAddr::from(([0, 0, 0, 0], 0)))
            .map_err(CsiError::transport)?;
        endpoint.set_default_client_config(client_config);

        let connection = endpoint
            .connect(addr, server_name)
            .map_err(CsiError::transport)?
            .await
            .map_err(CsiError::transport)?;

        debug!(%addr, %server_name, "CSI QUIC connection established");
        Ok(Self {
            connection,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Replace the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Send a request and wait for the corresponding response.
    ///
    /// Fails with [`CsiError::TransportError`] when no response arrives within
    /// the request timeout.  The server keeps working on a timed-out request;
    /// repeating it is safe because every lifecycle call is idempotent.
    #[instrument(skip(self), fields(msg = %msg))]
    pub async fn request(&self, msg: &CsiMessage) -> Result<CsiMessage, CsiError> {
        tokio::time::timeout(self.request_timeout, self.exchange(msg))
            .await
            .map_err(|_| {
                CsiError::TransportError(format!(
                    "{msg} timed out after {:?}",
                    self.request_timeout
                ))
            })?
    }

    /// Open a bi-directional stream, write the JSON-serialized request,
    /// finish the send side, then read and deserialize the full response.
    async fn exchange(&self, msg: &CsiMessage) -> Result<CsiMessage, CsiError> {
        let (mut send, mut recv) = self
            .connection
            .open_bi()
            .await
            .map_err(CsiError::transport)?;

        // Serialize and send.
        let payload = serde_json::to_vec(msg).map_err(CsiError::internal)?;
        send.write_all(&payload)
            .await
            .map_err(CsiError::transport)?;
        send.finish().map_err(CsiError::transport)?;

        // Read the full response.
        let buf = recv
            .read_to_end(MAX_RESPONSE_BYTES)
            .await
            .map_err(CsiError::transport)?;

        let response: CsiMessage = serde_json::from_slice(&buf).map_err(CsiError::transport)?;
        debug!(%response, "CSI response received");
        Ok(response)
    }

    /// Close the underlying QUIC connection gracefully.
    pub fn close(&self) {
        self.connection
            .close(quinn::VarInt::from_u32(0), b"client shutdown");
    }
}
