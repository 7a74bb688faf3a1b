//! FLV-over-HTTP transport adapter
//!
//! Progressive-HTTP and WebSocket transports carry raw FLV tag bytes for
//! streams addressed as `/{app}/{name}.flv`. The HTTP server owning the
//! request/response is an external collaborator; this adapter only converts
//! between its byte stream and the broadcast layer.
//!
//! A publishing session feeds request bytes into [`FlvSession::feed`]; a
//! playing session takes the receiver returned by [`FlvSession::play`] and
//! writes everything it yields to the response.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::broadcast::BroadcastHub;
use crate::error::Result;
use crate::media::FlvParser;
use crate::server::Server;
use crate::session::{Protocol, SessionInfo};

/// One FLV session, publisher or subscriber.
pub struct FlvSession {
    server: Arc<Server>,
    info: SessionInfo,
    parser: FlvParser,
    hub: Option<Arc<Mutex<BroadcastHub>>>,
    is_publisher: bool,
}

impl FlvSession {
    /// Create a session for `/{app}/{name}` with the request's query
    /// parameters (`sign`, ...). `ip` is empty for internal sessions, which
    /// skip play auth and lifecycle events.
    pub fn new(
        server: Arc<Server>,
        ip: impl Into<String>,
        app: impl Into<String>,
        name: impl Into<String>,
        query: HashMap<String, String>,
    ) -> Self {
        let mut info = SessionInfo::new(Protocol::Flv, ip);
        info.set_stream(app, name, query);
        server.register_session(&info);
        Self {
            server,
            info,
            parser: FlvParser::new(),
            hub: None,
            is_publisher: false,
        }
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Attach as a subscriber. The returned receiver yields pre-muxed FLV
    /// bytes starting with the container header and cached pre-roll; the
    /// transport writes each item to the response as-is.
    pub fn play(&mut self) -> Result<mpsc::UnboundedReceiver<Bytes>> {
        let hub = self.server.hub(&self.info.stream_path);
        let (tx, rx) = mpsc::unbounded_channel();
        if let Err(e) = hub.lock().post_play(&self.info, tx) {
            tracing::error!(
                session_id = self.info.id,
                ip = %self.info.ip,
                stream = %self.info.stream_path,
                error = %e,
                "FLV play rejected"
            );
            return Err(e.into());
        }
        self.hub = Some(hub);
        tracing::info!(
            session_id = self.info.id,
            ip = %self.info.ip,
            stream = %self.info.stream_path,
            "FLV play started"
        );
        Ok(rx)
    }

    /// Attach as the publisher; request bytes then go through [`feed`].
    ///
    /// [`feed`]: FlvSession::feed
    pub fn publish(&mut self) -> Result<()> {
        let hub = self.server.hub(&self.info.stream_path);
        if let Err(e) = hub.lock().post_publish(&self.info) {
            tracing::error!(
                session_id = self.info.id,
                ip = %self.info.ip,
                stream = %self.info.stream_path,
                error = %e,
                "FLV publish rejected"
            );
            return Err(e.into());
        }
        self.hub = Some(hub);
        self.is_publisher = true;
        tracing::info!(
            session_id = self.info.id,
            ip = %self.info.ip,
            stream = %self.info.stream_path,
            "FLV publish started"
        );
        Ok(())
    }

    /// Feed published FLV bytes; completed tags are broadcast immediately.
    /// An error means the stream is desynchronized and the transport should
    /// close the connection.
    pub fn feed(&mut self, data: &[u8]) -> Result<()> {
        self.info.in_bytes += data.len() as u64;
        let packets = self.parser.parse(data)?;
        if let Some(hub) = &self.hub {
            let mut hub = hub.lock();
            for packet in &packets {
                hub.broadcast_message(packet);
            }
        }
        Ok(())
    }

    /// Account bytes the transport wrote to the peer.
    pub fn add_out_bytes(&mut self, n: u64) {
        self.info.out_bytes += n;
    }

    /// Synchronously deregister from the hub and the server.
    pub fn close(&mut self) {
        if let Some(hub) = self.hub.take() {
            let mut hub = hub.lock();
            if self.is_publisher {
                hub.done_publish(&self.info);
            } else {
                hub.done_play(&self.info);
            }
        }
        self.server.unregister_session(self.info.id);
        tracing::info!(session_id = self.info.id, "FLV session closed");
    }
}

impl Drop for FlvSession {
    fn drop(&mut self) {
        self.close();
    }
}
