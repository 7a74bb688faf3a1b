//! RTMP server listener
//!
//! Accept loop for the RTMP port; every accepted socket gets its own task
//! driving an [`RtmpSession`](crate::session::rtmp::RtmpSession).

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::error::Result;
use crate::server::Server;
use crate::session::rtmp::RtmpSession;

/// Bind the configured address and accept RTMP connections until the task
/// is dropped.
pub async fn run_rtmp_listener(server: Arc<Server>) -> Result<()> {
    let listener = TcpListener::bind(server.config().bind_addr).await?;
    tracing::info!(addr = %server.config().bind_addr, "RTMP server listening");

    loop {
        match listener.accept().await {
            Ok((socket, peer_addr)) => {
                if server.config().tcp_nodelay {
                    let _ = socket.set_nodelay(true);
                }
                let server = Arc::clone(&server);
                tokio::spawn(async move {
                    let session = RtmpSession::new(server, peer_addr.to_string());
                    let session_id = session.id();
                    if let Err(e) = session.run(socket).await {
                        tracing::debug!(session_id, error = %e, "RTMP session ended with error");
                    }
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to accept connection");
            }
        }
    }
}
