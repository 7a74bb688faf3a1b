//! RTMP transport adapter
//!
//! Owns one TCP connection and bridges the pure [`RtmpEngine`] to the
//! broadcast layer: socket bytes go into the engine, engine output goes back
//! to the socket, publisher packets go to the hub, and subscriber bytes
//! arrive over an unbounded channel so the publisher never waits on this
//! socket.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::broadcast::BroadcastHub;
use crate::error::Result;
use crate::media::AvPacket;
use crate::protocol::engine::{ConnectRequest, RtmpEngine, SessionHandler};
use crate::server::Server;
use crate::session::{Protocol, SessionInfo};

/// Collects engine callbacks during one parse call; the session applies them
/// afterwards, outside the engine's borrow.
#[derive(Default)]
struct EngineBridge {
    outputs: Vec<Bytes>,
    packets: Vec<AvPacket>,
    connect: Option<ConnectRequest>,
    play: bool,
    push: bool,
}

impl SessionHandler for EngineBridge {
    fn on_output(&mut self, data: Bytes) {
        self.outputs.push(data);
    }
    fn on_packet(&mut self, packet: AvPacket) {
        self.packets.push(packet);
    }
    fn on_connect(&mut self, request: ConnectRequest) {
        self.connect = Some(request);
    }
    fn on_play(&mut self) {
        self.play = true;
    }
    fn on_push(&mut self) {
        self.push = true;
    }
}

/// One RTMP connection.
pub struct RtmpSession {
    server: Arc<Server>,
    info: SessionInfo,
    engine: RtmpEngine,
    hub: Option<Arc<Mutex<BroadcastHub>>>,
    is_publisher: bool,
}

impl RtmpSession {
    pub fn new(server: Arc<Server>, ip: impl Into<String>) -> Self {
        let info = SessionInfo::new(Protocol::Rtmp, ip);
        server.register_session(&info);
        Self {
            server,
            info,
            engine: RtmpEngine::new(),
            hub: None,
            is_publisher: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.info.id
    }

    /// Drive the connection to completion. Deregisters from the hub and the
    /// server before returning, whatever the outcome.
    pub async fn run(mut self, socket: TcpStream) -> Result<()> {
        let (media_tx, media_rx) = mpsc::unbounded_channel();
        let result = self.drive(socket, &media_tx, media_rx).await;
        self.close();
        result
    }

    async fn drive(
        &mut self,
        socket: TcpStream,
        media_tx: &mpsc::UnboundedSender<Bytes>,
        mut media_rx: mpsc::UnboundedReceiver<Bytes>,
    ) -> Result<()> {
        let (mut reader, mut writer) = socket.into_split();
        let mut scratch = vec![0u8; 8192];
        loop {
            tokio::select! {
                read = reader.read(&mut scratch) => {
                    let n = read?;
                    if n == 0 {
                        return Ok(());
                    }
                    self.info.in_bytes += n as u64;

                    let mut bridge = EngineBridge::default();
                    let parsed = self.engine.parse(&scratch[..n], &mut bridge);
                    // Flush whatever the engine produced before the error, as
                    // a real peer would have received it
                    for out in bridge.outputs.drain(..) {
                        self.info.out_bytes += out.len() as u64;
                        writer.write_all(&out).await?;
                    }
                    if let Err(e) = parsed {
                        tracing::error!(
                            session_id = self.info.id,
                            ip = %self.info.ip,
                            error = %e,
                            "RTMP parse error"
                        );
                        return Err(e);
                    }

                    if let Some(request) = bridge.connect.take() {
                        self.on_connect(request);
                    }
                    if bridge.push {
                        self.start_publish()?;
                    }
                    if bridge.play {
                        self.start_play(media_tx)?;
                    }
                    if self.is_publisher && !bridge.packets.is_empty() {
                        if let Some(hub) = &self.hub {
                            let mut hub = hub.lock();
                            for packet in bridge.packets.drain(..) {
                                hub.broadcast_message(&packet);
                            }
                        }
                    }
                }
                media = media_rx.recv() => {
                    if let Some(bytes) = media {
                        self.info.out_bytes += bytes.len() as u64;
                        writer.write_all(&bytes).await?;
                    }
                }
            }
        }
    }

    /// Stream addressing arrived with publish/play: resolve the hub.
    fn on_connect(&mut self, request: ConnectRequest) {
        self.info.set_stream(request.app, request.name, request.query);
        self.hub = Some(self.server.hub(&self.info.stream_path));
        self.server.register_session(&self.info);
    }

    fn start_publish(&mut self) -> Result<()> {
        if let Some(hub) = &self.hub {
            if let Err(e) = hub.lock().post_publish(&self.info) {
                tracing::error!(
                    session_id = self.info.id,
                    ip = %self.info.ip,
                    stream = %self.info.stream_path,
                    error = %e,
                    "publish rejected"
                );
                return Err(e.into());
            }
        }
        self.is_publisher = true;
        tracing::info!(
            session_id = self.info.id,
            ip = %self.info.ip,
            stream = %self.info.stream_path,
            "RTMP publish started"
        );
        Ok(())
    }

    fn start_play(&mut self, media_tx: &mpsc::UnboundedSender<Bytes>) -> Result<()> {
        if let Some(hub) = &self.hub {
            if let Err(e) = hub.lock().post_play(&self.info, media_tx.clone()) {
                tracing::error!(
                    session_id = self.info.id,
                    ip = %self.info.ip,
                    stream = %self.info.stream_path,
                    error = %e,
                    "play rejected"
                );
                return Err(e.into());
            }
        }
        tracing::info!(
            session_id = self.info.id,
            ip = %self.info.ip,
            stream = %self.info.stream_path,
            "RTMP play started"
        );
        Ok(())
    }

    /// Synchronous deregistration: no hub callback can fire for this session
    /// afterwards.
    fn close(&mut self) {
        if let Some(hub) = &self.hub {
            let mut hub = hub.lock();
            if self.is_publisher {
                hub.done_publish(&self.info);
            } else {
                hub.done_play(&self.info);
            }
        }
        self.server.unregister_session(self.info.id);
        tracing::info!(session_id = self.info.id, "RTMP session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf::{self, Amf0Value};
    use crate::protocol::chunk::{chunks_create, OutboundMessage};
    use crate::protocol::constants::*;
    use crate::server::ServerConfig;
    use tokio::net::TcpListener;

    async fn spawn_server() -> (Arc<Server>, std::net::SocketAddr) {
        let server = Arc::new(Server::new(ServerConfig::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept_server = Arc::clone(&server);
        tokio::spawn(async move {
            loop {
                let Ok((socket, peer)) = listener.accept().await else {
                    break;
                };
                let server = Arc::clone(&accept_server);
                tokio::spawn(async move {
                    let session = RtmpSession::new(server, peer.to_string());
                    let _ = session.run(socket).await;
                });
            }
        });
        (server, addr)
    }

    fn invoke(name: &str, args: &[(&str, Amf0Value)], stream_id: u32) -> Bytes {
        chunks_create(&OutboundMessage {
            cid: CHANNEL_INVOKE,
            type_id: TYPE_INVOKE,
            stream_id,
            timestamp: 0,
            payload: amf::encode_command(name, args).unwrap(),
        })
    }

    async fn client_publish(addr: std::net::SocketAddr, stream: &str) -> TcpStream {
        let mut socket = TcpStream::connect(addr).await.unwrap();

        // Simple handshake: C0 + zeroed C1, read S0S1S2, send C2
        socket.write_all(&[RTMP_VERSION]).await.unwrap();
        socket.write_all(&[0u8; HANDSHAKE_SIZE]).await.unwrap();
        let mut response = vec![0u8; 1 + HANDSHAKE_SIZE * 2];
        socket.read_exact(&mut response).await.unwrap();
        socket.write_all(&[0u8; HANDSHAKE_SIZE]).await.unwrap();

        let connect = invoke(
            "connect",
            &[
                ("transId", Amf0Value::Number(1.0)),
                (
                    "cmdObj",
                    Amf0Value::Object(vec![
                        ("app".to_string(), Amf0Value::String("live".into())),
                        (
                            "tcUrl".to_string(),
                            Amf0Value::String("rtmp://127.0.0.1/live".into()),
                        ),
                    ]),
                ),
            ],
            0,
        );
        socket.write_all(&connect).await.unwrap();

        let publish = invoke(
            "publish",
            &[
                ("transId", Amf0Value::Number(2.0)),
                ("cmdObj", Amf0Value::Null),
                ("streamName", Amf0Value::String(stream.into())),
                ("type", Amf0Value::String("live".into())),
            ],
            1,
        );
        socket.write_all(&publish).await.unwrap();
        socket
    }

    #[tokio::test]
    async fn test_publish_creates_hub_and_close_releases_it() {
        let (server, addr) = spawn_server().await;
        let mut events = server.subscribe_events();

        let socket = client_publish(addr, "demo").await;

        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, crate::session::EventKind::PrePublish);
        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, crate::session::EventKind::PostPublish);
        assert_eq!(event.session.stream_path, "/live/demo");

        let hub = server.find_hub("/live/demo").unwrap();
        assert!(hub.lock().has_publisher());

        drop(socket);
        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, crate::session::EventKind::DonePublish);

        // Hub persists without its publisher
        assert!(server.find_hub("/live/demo").is_some());
        assert!(!server.find_hub("/live/demo").unwrap().lock().has_publisher());
    }

    #[tokio::test]
    async fn test_second_publisher_rejected() {
        let (server, addr) = spawn_server().await;
        let mut events = server.subscribe_events();

        let _first = client_publish(addr, "demo").await;
        events.recv().await.unwrap(); // prePublish
        events.recv().await.unwrap(); // postPublish

        let mut second = client_publish(addr, "demo").await;
        // The conflicting session is closed by the server; reads drain the
        // replies and then hit EOF
        let mut sink = Vec::new();
        let _ = second.read_to_end(&mut sink).await;

        let hub = server.find_hub("/live/demo").unwrap();
        assert!(hub.lock().has_publisher());
        assert_eq!(hub.lock().subscriber_count(), 0);
    }
}
