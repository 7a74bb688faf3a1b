//! RTMP connection engine
//!
//! Two nested state machines drive one connection: the handshake stage
//! consumes C0/C1/C2 and emits S0S1S2, then the chunk layer takes over and
//! every completed message is dispatched here: control messages mutate
//! connection-local parameters, invoke messages route by command name, and
//! media messages are classified into [`AvPacket`]s.
//!
//! The engine performs no I/O. Everything it produces goes through the
//! [`SessionHandler`] capability trait implemented by the transport adapter:
//! bytes to write, demultiplexed packets, and lifecycle notifications.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use url::Url;

use crate::amf::{self, Amf0Value, CommandMessage};
use crate::error::Error;
use crate::media::{flv, AvPacket};
use crate::protocol::chunk::{chunks_create, ChunkParser, OutboundMessage, RtmpMessage};
use crate::protocol::constants::*;
use crate::protocol::handshake;

/// Callbacks implemented by the session adapter that owns the transport.
///
/// Calls are synchronous and must not block; a slow transport queues or
/// drops on its own side.
pub trait SessionHandler {
    /// Bytes to write to the peer.
    fn on_output(&mut self, data: Bytes);
    /// A demultiplexed media packet from the publisher.
    fn on_packet(&mut self, packet: AvPacket);
    /// Stream addressing is known (follows publish/play, precedes the
    /// lifecycle callback).
    fn on_connect(&mut self, request: ConnectRequest);
    /// The peer asked to play the connected stream.
    fn on_play(&mut self);
    /// The peer asked to publish the connected stream.
    fn on_push(&mut self);
}

/// Stream addressing extracted from connect + publish/play.
#[derive(Debug, Clone, Default)]
pub struct ConnectRequest {
    pub app: String,
    pub name: String,
    pub host: String,
    pub query: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeStage {
    /// Nothing consumed yet; the version byte is next.
    Uninit,
    /// Accumulating the 1536-byte C1.
    ReadC1,
    /// Accumulating the 1536-byte C2 (not verified).
    ReadC2,
    /// Handshake complete, chunk parsing active.
    Done,
}

/// RTMP protocol engine for one connection.
pub struct RtmpEngine {
    handshake_stage: HandshakeStage,
    handshake_payload: Box<[u8; HANDSHAKE_SIZE]>,
    handshake_bytes: usize,

    parser: ChunkParser,
    out_chunk_size: u32,

    /// Count of streams handed out by createStream.
    streams: u32,
    /// Window acknowledgement size announced by the peer.
    ack_size: Option<u32>,

    object_encoding: f64,
    stream_app: String,
    stream_host: String,
    stream_name: String,
    stream_query: HashMap<String, String>,
    stream_id: u32,
}

impl RtmpEngine {
    pub fn new() -> Self {
        Self {
            handshake_stage: HandshakeStage::Uninit,
            handshake_payload: Box::new([0u8; HANDSHAKE_SIZE]),
            handshake_bytes: 0,
            parser: ChunkParser::new(),
            out_chunk_size: OUT_CHUNK_SIZE,
            streams: 0,
            ack_size: None,
            object_encoding: 0.0,
            stream_app: String::new(),
            stream_host: String::new(),
            stream_name: String::new(),
            stream_query: HashMap::new(),
            stream_id: 0,
        }
    }

    /// Window acknowledgement size the peer announced, if any.
    pub fn ack_size(&self) -> Option<u32> {
        self.ack_size
    }

    /// Feed connection bytes into the engine.
    ///
    /// Restartable at any byte boundary. Errors are fatal to the connection;
    /// the caller should close the transport.
    pub fn parse(&mut self, data: &[u8], handler: &mut dyn SessionHandler) -> Result<(), Error> {
        let mut p = 0;
        while p < data.len() {
            match self.handshake_stage {
                HandshakeStage::Uninit => {
                    // The version byte is consumed without inspection
                    self.handshake_stage = HandshakeStage::ReadC1;
                    self.handshake_bytes = 0;
                    p += 1;
                }
                HandshakeStage::ReadC1 => {
                    let n = (HANDSHAKE_SIZE - self.handshake_bytes).min(data.len() - p);
                    self.handshake_payload[self.handshake_bytes..self.handshake_bytes + n]
                        .copy_from_slice(&data[p..p + n]);
                    self.handshake_bytes += n;
                    p += n;
                    if self.handshake_bytes == HANDSHAKE_SIZE {
                        self.handshake_stage = HandshakeStage::ReadC2;
                        self.handshake_bytes = 0;
                        let response = handshake::generate_s0s1s2(&self.handshake_payload[..]);
                        handler.on_output(Bytes::from(response));
                    }
                }
                HandshakeStage::ReadC2 => {
                    let n = (HANDSHAKE_SIZE - self.handshake_bytes).min(data.len() - p);
                    self.handshake_bytes += n;
                    p += n;
                    if self.handshake_bytes == HANDSHAKE_SIZE {
                        self.handshake_stage = HandshakeStage::Done;
                        self.handshake_bytes = 0;
                    }
                }
                HandshakeStage::Done => {
                    return self.chunk_read(&data[p..], handler);
                }
            }
        }
        Ok(())
    }

    fn chunk_read(&mut self, data: &[u8], handler: &mut dyn SessionHandler) -> Result<(), Error> {
        let messages = self.parser.parse(data)?;
        for message in messages {
            self.handle_message(&message, handler)?;
        }
        Ok(())
    }

    fn handle_message(
        &mut self,
        message: &RtmpMessage,
        handler: &mut dyn SessionHandler,
    ) -> Result<(), Error> {
        match message.type_id {
            TYPE_SET_CHUNK_SIZE
            | TYPE_ABORT
            | TYPE_ACKNOWLEDGEMENT
            | TYPE_WINDOW_ACK_SIZE
            | TYPE_SET_PEER_BANDWIDTH => {
                self.control_handler(message);
                Ok(())
            }
            // User control events are accepted but not interpreted
            TYPE_EVENT => Ok(()),
            TYPE_FLEX_MESSAGE | TYPE_INVOKE => self.invoke_handler(message, handler),
            TYPE_AUDIO | TYPE_VIDEO | TYPE_FLEX_STREAM | TYPE_DATA => {
                self.data_handler(message, handler)
            }
            other => {
                tracing::trace!(type_id = other, "ignoring unknown message type");
                Ok(())
            }
        }
    }

    /// Control messages update connection-local parameters only.
    fn control_handler(&mut self, message: &RtmpMessage) {
        let value = message
            .payload
            .get(..4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]));
        match (message.type_id, value) {
            (TYPE_SET_CHUNK_SIZE, Some(size)) => {
                self.parser.in_chunk_size = size.max(1) as usize;
                tracing::debug!(size, "peer set chunk size");
            }
            (TYPE_WINDOW_ACK_SIZE, Some(size)) => {
                self.ack_size = Some(size);
            }
            _ => {}
        }
    }

    fn invoke_handler(
        &mut self,
        message: &RtmpMessage,
        handler: &mut dyn SessionHandler,
    ) -> Result<(), Error> {
        // Type 17 wraps the AMF0 body behind a one-byte AMF3 marker
        let offset = if message.type_id == TYPE_FLEX_MESSAGE { 1 } else { 0 };
        let payload = message.payload.get(offset..).unwrap_or(&[]);
        let command = amf::decode_command(payload)?;
        match command.name.as_str() {
            "connect" => self.on_connect(&command, handler)?,
            "createStream" => self.on_create_stream(&command, handler)?,
            "publish" => self.on_publish(&command, message, handler)?,
            "play" => self.on_play(&command, message, handler)?,
            "deleteStream" => {}
            other => {
                tracing::trace!(command = %other, "unhandled invoke message");
            }
        }
        Ok(())
    }

    /// Media and script messages: the chunk layer already delimited the tag,
    /// so they go straight to the classifier with the accumulated clock as
    /// the tag timestamp. Flex-stream payloads are treated as script data.
    fn data_handler(
        &mut self,
        message: &RtmpMessage,
        handler: &mut dyn SessionHandler,
    ) -> Result<(), Error> {
        let tag_type = if message.type_id == TYPE_FLEX_STREAM {
            TYPE_DATA
        } else {
            message.type_id
        };
        let packet = flv::parse_tag(tag_type, message.timestamp, message.payload.clone())?;
        handler.on_packet(packet);
        Ok(())
    }

    fn on_connect(
        &mut self,
        command: &CommandMessage,
        handler: &mut dyn SessionHandler,
    ) -> Result<(), Error> {
        if let Some(cmd_obj) = command.get("cmdObj") {
            self.stream_app = cmd_obj.get_str("app").unwrap_or_default().to_string();
            self.stream_host = cmd_obj
                .get_str("tcUrl")
                .and_then(|tc_url| Url::parse(tc_url).ok())
                .and_then(|url| url.host_str().map(|h| h.to_string()))
                .unwrap_or_default();
            self.object_encoding = cmd_obj.get_number("objectEncoding").unwrap_or(0.0);
        }
        self.send_window_ack(DEFAULT_WINDOW_ACK_SIZE, handler);
        self.set_peer_bandwidth(DEFAULT_PEER_BANDWIDTH, BANDWIDTH_LIMIT_DYNAMIC, handler);
        self.set_chunk_size(self.out_chunk_size, handler);
        self.respond_connect(command.transaction_id(), handler)
    }

    fn on_create_stream(
        &mut self,
        command: &CommandMessage,
        handler: &mut dyn SessionHandler,
    ) -> Result<(), Error> {
        self.streams += 1;
        self.send_invoke_message(
            0,
            "_result",
            &[
                ("transId", Amf0Value::Number(command.transaction_id())),
                ("cmdObj", Amf0Value::Null),
                ("info", Amf0Value::Integer(self.streams as i64)),
            ],
            handler,
        )
    }

    fn on_publish(
        &mut self,
        command: &CommandMessage,
        message: &RtmpMessage,
        handler: &mut dyn SessionHandler,
    ) -> Result<(), Error> {
        self.read_stream_name(command, message);
        self.respond_publish(handler)?;
        handler.on_connect(self.connect_request());
        handler.on_push();
        Ok(())
    }

    fn on_play(
        &mut self,
        command: &CommandMessage,
        message: &RtmpMessage,
        handler: &mut dyn SessionHandler,
    ) -> Result<(), Error> {
        self.read_stream_name(command, message);
        self.respond_play(handler)?;
        handler.on_connect(self.connect_request());
        handler.on_play();
        Ok(())
    }

    /// Split `streamName` into name and query string, keep the message's
    /// stream id for replies.
    fn read_stream_name(&mut self, command: &CommandMessage, message: &RtmpMessage) {
        let full = command.get_str("streamName").unwrap_or_default();
        let (name, query) = match full.split_once('?') {
            Some((name, query)) => (name, query),
            None => (full, ""),
        };
        self.stream_name = name.to_string();
        self.stream_query = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        self.stream_id = message.stream_id;
    }

    fn connect_request(&self) -> ConnectRequest {
        ConnectRequest {
            app: self.stream_app.clone(),
            name: self.stream_name.clone(),
            host: self.stream_host.clone(),
            query: self.stream_query.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Outbound messages
    // ------------------------------------------------------------------

    /// Protocol control message on cid 2, stream 0, timestamp 0.
    fn send_control(&self, type_id: u8, payload: &[u8], handler: &mut dyn SessionHandler) {
        let mut buf = BytesMut::with_capacity(12 + payload.len());
        buf.put_u8(CHANNEL_PROTOCOL as u8); // fmt 0, cid 2
        buf.put_slice(&[0, 0, 0]); // timestamp
        buf.put_u8(0);
        buf.put_u8(0);
        buf.put_u8(payload.len() as u8);
        buf.put_u8(type_id);
        buf.put_u32_le(0); // stream id
        buf.put_slice(payload);
        handler.on_output(buf.freeze());
    }

    /// Acknowledge received bytes.
    pub fn send_ack(&self, sequence: u32, handler: &mut dyn SessionHandler) {
        self.send_control(TYPE_ACKNOWLEDGEMENT, &sequence.to_be_bytes(), handler);
    }

    fn send_window_ack(&self, size: u32, handler: &mut dyn SessionHandler) {
        self.send_control(TYPE_WINDOW_ACK_SIZE, &size.to_be_bytes(), handler);
    }

    fn set_peer_bandwidth(&self, size: u32, limit_type: u8, handler: &mut dyn SessionHandler) {
        let mut payload = [0u8; 5];
        payload[..4].copy_from_slice(&size.to_be_bytes());
        payload[4] = limit_type;
        self.send_control(TYPE_SET_PEER_BANDWIDTH, &payload, handler);
    }

    fn set_chunk_size(&self, size: u32, handler: &mut dyn SessionHandler) {
        self.send_control(TYPE_SET_CHUNK_SIZE, &size.to_be_bytes(), handler);
    }

    /// User control event: 16-bit event type plus 32-bit stream id.
    fn send_stream_status(&self, event: u16, stream_id: u32, handler: &mut dyn SessionHandler) {
        let mut payload = [0u8; 6];
        payload[..2].copy_from_slice(&event.to_be_bytes());
        payload[2..].copy_from_slice(&stream_id.to_be_bytes());
        self.send_control(TYPE_EVENT, &payload, handler);
    }

    fn send_invoke_message(
        &self,
        stream_id: u32,
        name: &str,
        args: &[(&str, Amf0Value)],
        handler: &mut dyn SessionHandler,
    ) -> Result<(), Error> {
        let payload = amf::encode_command(name, args)?;
        let chunks = chunks_create(&OutboundMessage {
            cid: CHANNEL_INVOKE,
            type_id: TYPE_INVOKE,
            stream_id,
            timestamp: 0,
            payload,
        });
        handler.on_output(chunks);
        Ok(())
    }

    fn send_data_message(
        &self,
        stream_id: u32,
        name: &str,
        args: &[(&str, Amf0Value)],
        handler: &mut dyn SessionHandler,
    ) -> Result<(), Error> {
        let payload = amf::encode_data(name, args)?;
        let chunks = chunks_create(&OutboundMessage {
            cid: CHANNEL_DATA,
            type_id: TYPE_DATA,
            stream_id,
            timestamp: 0,
            payload,
        });
        handler.on_output(chunks);
        Ok(())
    }

    fn send_status_message(
        &self,
        stream_id: u32,
        level: &str,
        code: &str,
        description: &str,
        handler: &mut dyn SessionHandler,
    ) -> Result<(), Error> {
        self.send_invoke_message(
            stream_id,
            "onStatus",
            &[
                ("transId", Amf0Value::Number(0.0)),
                ("cmdObj", Amf0Value::Null),
                (
                    "info",
                    Amf0Value::Object(vec![
                        ("level".to_string(), Amf0Value::String(level.to_string())),
                        ("code".to_string(), Amf0Value::String(code.to_string())),
                        (
                            "description".to_string(),
                            Amf0Value::String(description.to_string()),
                        ),
                    ]),
                ),
            ],
            handler,
        )
    }

    fn respond_connect(&self, tid: f64, handler: &mut dyn SessionHandler) -> Result<(), Error> {
        self.send_invoke_message(
            0,
            "_result",
            &[
                ("transId", Amf0Value::Number(tid)),
                (
                    "cmdObj",
                    Amf0Value::Object(vec![
                        (
                            "fmsVer".to_string(),
                            Amf0Value::String("FMS/3,0,1,123".to_string()),
                        ),
                        ("capabilities".to_string(), Amf0Value::Integer(31)),
                    ]),
                ),
                (
                    "info",
                    Amf0Value::Object(vec![
                        ("level".to_string(), Amf0Value::String("status".to_string())),
                        (
                            "code".to_string(),
                            Amf0Value::String(NC_CONNECT_SUCCESS.to_string()),
                        ),
                        (
                            "description".to_string(),
                            Amf0Value::String("Connection succeeded.".to_string()),
                        ),
                        (
                            "objectEncoding".to_string(),
                            Amf0Value::Number(self.object_encoding),
                        ),
                    ]),
                ),
            ],
            handler,
        )
    }

    fn respond_publish(&self, handler: &mut dyn SessionHandler) -> Result<(), Error> {
        self.send_status_message(
            self.stream_id,
            "status",
            NS_PUBLISH_START,
            &format!("/{}/{} is now published.", self.stream_app, self.stream_name),
            handler,
        )
    }

    fn respond_play(&self, handler: &mut dyn SessionHandler) -> Result<(), Error> {
        self.send_stream_status(STREAM_BEGIN, self.stream_id, handler);
        self.send_status_message(
            self.stream_id,
            "status",
            NS_PLAY_RESET,
            "Playing and resetting stream.",
            handler,
        )?;
        self.send_status_message(
            self.stream_id,
            "status",
            NS_PLAY_START,
            "Started playing stream.",
            handler,
        )?;
        self.send_data_message(
            self.stream_id,
            "|RtmpSampleAccess",
            &[
                ("bool1", Amf0Value::Boolean(false)),
                ("bool2", Amf0Value::Boolean(false)),
            ],
            handler,
        )
    }
}

impl Default for RtmpEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Mux a packet into RTMP chunk wire form for subscriber delivery.
pub fn create_message(packet: &AvPacket) -> Bytes {
    let cid = match packet.codec_type {
        TYPE_AUDIO => CHANNEL_AUDIO,
        TYPE_VIDEO => CHANNEL_VIDEO,
        _ => CHANNEL_DATA,
    };
    chunks_create(&OutboundMessage {
        cid,
        type_id: packet.codec_type,
        stream_id: 0,
        timestamp: packet.dts,
        payload: packet.data.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::PacketFlags;

    #[derive(Default)]
    struct MockHandler {
        outputs: Vec<Bytes>,
        packets: Vec<AvPacket>,
        connects: Vec<ConnectRequest>,
        plays: usize,
        pushes: usize,
    }

    impl SessionHandler for MockHandler {
        fn on_output(&mut self, data: Bytes) {
            self.outputs.push(data);
        }
        fn on_packet(&mut self, packet: AvPacket) {
            self.packets.push(packet);
        }
        fn on_connect(&mut self, request: ConnectRequest) {
            self.connects.push(request);
        }
        fn on_play(&mut self) {
            self.plays += 1;
        }
        fn on_push(&mut self) {
            self.pushes += 1;
        }
    }

    /// C0 + a digest-free C1: the engine answers with a 3073-byte echo.
    fn run_handshake(engine: &mut RtmpEngine, handler: &mut MockHandler) {
        let mut hello = vec![RTMP_VERSION];
        hello.extend_from_slice(&[0u8; HANDSHAKE_SIZE]);
        engine.parse(&hello, handler).unwrap();
        assert_eq!(handler.outputs.len(), 1);
        assert_eq!(handler.outputs[0].len(), 1 + HANDSHAKE_SIZE * 2);
        handler.outputs.clear();
        // C2 echo back
        engine.parse(&[0u8; HANDSHAKE_SIZE], handler).unwrap();
    }

    /// Raw Set Chunk Size so client messages can exceed 128 bytes.
    fn set_client_chunk_size(engine: &mut RtmpEngine, handler: &mut MockHandler, size: u32) {
        let mut msg = vec![0x02, 0, 0, 0, 0, 0, 4, TYPE_SET_CHUNK_SIZE, 0, 0, 0, 0];
        msg.extend_from_slice(&size.to_be_bytes());
        engine.parse(&msg, handler).unwrap();
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

    fn connect_cmd() -> Bytes {
        invoke(
            "connect",
            &[
                ("transId", Amf0Value::Number(1.0)),
                (
                    "cmdObj",
                    Amf0Value::Object(vec![
                        ("app".to_string(), Amf0Value::String("live".into())),
                        (
                            "tcUrl".to_string(),
                            Amf0Value::String("rtmp://media.example.com/live".into()),
                        ),
                    ]),
                ),
            ],
            0,
        )
    }

    #[test]
    fn test_connect_replies() {
        let mut engine = RtmpEngine::new();
        let mut handler = MockHandler::default();
        run_handshake(&mut engine, &mut handler);
        set_client_chunk_size(&mut engine, &mut handler, 0xFFFF);

        engine.parse(&connect_cmd(), &mut handler).unwrap();

        // window ack, peer bandwidth, chunk size, _result
        assert_eq!(handler.outputs.len(), 4);
        assert_eq!(handler.outputs[0][7], TYPE_WINDOW_ACK_SIZE);
        assert_eq!(handler.outputs[1][7], TYPE_SET_PEER_BANDWIDTH);
        assert_eq!(handler.outputs[1][16], BANDWIDTH_LIMIT_DYNAMIC);
        assert_eq!(handler.outputs[2][7], TYPE_SET_CHUNK_SIZE);

        // The _result decodes back to NetConnection.Connect.Success
        let mut parser = ChunkParser::new();
        parser.in_chunk_size = OUT_CHUNK_SIZE as usize;
        let replies = parser.parse(&handler.outputs[3]).unwrap();
        assert_eq!(replies.len(), 1);
        let result = amf::decode_command(&replies[0].payload).unwrap();
        assert_eq!(result.name, "_result");
        assert_eq!(
            result.get("info").unwrap().get_str("code"),
            Some(NC_CONNECT_SUCCESS)
        );
    }

    #[test]
    fn test_create_stream_increments_ids() {
        let mut engine = RtmpEngine::new();
        let mut handler = MockHandler::default();
        run_handshake(&mut engine, &mut handler);
        set_client_chunk_size(&mut engine, &mut handler, 0xFFFF);
        engine.parse(&connect_cmd(), &mut handler).unwrap();
        handler.outputs.clear();

        for expected in 1..=2u32 {
            let cmd = invoke(
                "createStream",
                &[
                    ("transId", Amf0Value::Number(2.0)),
                    ("cmdObj", Amf0Value::Null),
                ],
                0,
            );
            engine.parse(&cmd, &mut handler).unwrap();

            let mut parser = ChunkParser::new();
            parser.in_chunk_size = OUT_CHUNK_SIZE as usize;
            let replies = parser.parse(handler.outputs.last().unwrap()).unwrap();
            let result = amf::decode_command(&replies[0].payload).unwrap();
            assert_eq!(result.name, "_result");
            assert_eq!(
                result.get("info").and_then(|v| v.as_number()),
                Some(expected as f64)
            );
        }
    }

    #[test]
    fn test_publish_flow() {
        let mut engine = RtmpEngine::new();
        let mut handler = MockHandler::default();
        run_handshake(&mut engine, &mut handler);
        set_client_chunk_size(&mut engine, &mut handler, 0xFFFF);
        engine.parse(&connect_cmd(), &mut handler).unwrap();
        handler.outputs.clear();

        let cmd = invoke(
            "publish",
            &[
                ("transId", Amf0Value::Number(5.0)),
                ("cmdObj", Amf0Value::Null),
                (
                    "streamName",
                    Amf0Value::String("stream1?sign=123-abcdef".into()),
                ),
                ("type", Amf0Value::String("live".into())),
            ],
            1,
        );
        engine.parse(&cmd, &mut handler).unwrap();

        assert_eq!(handler.pushes, 1);
        assert_eq!(handler.plays, 0);
        assert_eq!(handler.connects.len(), 1);
        let request = &handler.connects[0];
        assert_eq!(request.app, "live");
        assert_eq!(request.name, "stream1");
        assert_eq!(request.host, "media.example.com");
        assert_eq!(request.query.get("sign").map(String::as_str), Some("123-abcdef"));

        // NetStream.Publish.Start went out
        let mut parser = ChunkParser::new();
        parser.in_chunk_size = OUT_CHUNK_SIZE as usize;
        let replies = parser.parse(&handler.outputs[0]).unwrap();
        let status = amf::decode_command(&replies[0].payload).unwrap();
        assert_eq!(status.name, "onStatus");
        assert_eq!(
            status.get("info").unwrap().get_str("code"),
            Some(NS_PUBLISH_START)
        );
    }

    #[test]
    fn test_play_flow() {
        let mut engine = RtmpEngine::new();
        let mut handler = MockHandler::default();
        run_handshake(&mut engine, &mut handler);
        set_client_chunk_size(&mut engine, &mut handler, 0xFFFF);
        engine.parse(&connect_cmd(), &mut handler).unwrap();
        handler.outputs.clear();

        let cmd = invoke(
            "play",
            &[
                ("transId", Amf0Value::Number(4.0)),
                ("cmdObj", Amf0Value::Null),
                ("streamName", Amf0Value::String("stream1".into())),
            ],
            1,
        );
        engine.parse(&cmd, &mut handler).unwrap();

        assert_eq!(handler.plays, 1);
        assert_eq!(handler.pushes, 0);
        // stream-begin event, two onStatus, one sample-access data message
        assert_eq!(handler.outputs.len(), 4);
        assert_eq!(handler.outputs[0][7], TYPE_EVENT);
        assert_eq!(&handler.outputs[0][12..14], &STREAM_BEGIN.to_be_bytes());

        let mut parser = ChunkParser::new();
        parser.in_chunk_size = OUT_CHUNK_SIZE as usize;
        let replies = parser.parse(&handler.outputs[1]).unwrap();
        let status = amf::decode_command(&replies[0].payload).unwrap();
        assert_eq!(
            status.get("info").unwrap().get_str("code"),
            Some(NS_PLAY_RESET)
        );
    }

    #[test]
    fn test_media_message_dispatch() {
        let mut engine = RtmpEngine::new();
        let mut handler = MockHandler::default();
        run_handshake(&mut engine, &mut handler);

        // AVC keyframe on the video channel, timestamp 1000
        let media = chunks_create(&OutboundMessage {
            cid: CHANNEL_VIDEO,
            type_id: TYPE_VIDEO,
            stream_id: 1,
            timestamp: 1000,
            payload: Bytes::from_static(&[0x17, 0x01, 0x00, 0x00, 0x00, 0xAB]),
        });
        engine.parse(&media, &mut handler).unwrap();

        assert_eq!(handler.packets.len(), 1);
        let packet = &handler.packets[0];
        assert_eq!(packet.flags, PacketFlags::Keyframe);
        assert_eq!(packet.dts, 1000);
        assert_eq!(packet.codec_type, TYPE_VIDEO);
    }

    #[test]
    fn test_unknown_command_is_not_fatal() {
        let mut engine = RtmpEngine::new();
        let mut handler = MockHandler::default();
        run_handshake(&mut engine, &mut handler);

        let payload = amf::encode_all(&[
            Amf0Value::String("FCUnpublishAll".into()),
            Amf0Value::Number(3.0),
        ])
        .unwrap();
        let cmd = chunks_create(&OutboundMessage {
            cid: CHANNEL_INVOKE,
            type_id: TYPE_INVOKE,
            stream_id: 0,
            timestamp: 0,
            payload,
        });
        engine.parse(&cmd, &mut handler).unwrap();
    }

    #[test]
    fn test_fragmented_session_matches_whole() {
        let mut stream = Vec::new();
        stream.push(RTMP_VERSION);
        stream.extend_from_slice(&[0u8; HANDSHAKE_SIZE]); // C1
        stream.extend_from_slice(&[0u8; HANDSHAKE_SIZE]); // C2
        stream.extend_from_slice(&connect_cmd());
        stream.extend_from_slice(&chunks_create(&OutboundMessage {
            cid: CHANNEL_AUDIO,
            type_id: TYPE_AUDIO,
            stream_id: 1,
            timestamp: 20,
            payload: Bytes::from_static(&[0xAF, 0x01, 0x21]),
        }));

        let mut whole_engine = RtmpEngine::new();
        let mut whole = MockHandler::default();
        whole_engine.parse(&stream, &mut whole).unwrap();

        let mut frag_engine = RtmpEngine::new();
        let mut frag = MockHandler::default();
        for byte in &stream {
            frag_engine.parse(std::slice::from_ref(byte), &mut frag).unwrap();
        }

        assert_eq!(whole.packets.len(), frag.packets.len());
        assert_eq!(whole.packets[0].data, frag.packets[0].data);
        let whole_bytes: usize = whole.outputs.iter().map(|b| b.len()).sum();
        let frag_bytes: usize = frag.outputs.iter().map(|b| b.len()).sum();
        assert_eq!(whole_bytes, frag_bytes);
    }

    #[test]
    fn test_create_message_roundtrip() {
        let packet = AvPacket {
            codec_id: 7,
            codec_type: TYPE_VIDEO,
            flags: PacketFlags::Keyframe,
            pts: 500,
            dts: 500,
            data: Bytes::from_static(&[0x17, 0x01, 0, 0, 0, 0xCD]),
        };
        let wire = create_message(&packet);

        let mut parser = ChunkParser::new();
        parser.in_chunk_size = OUT_CHUNK_SIZE as usize;
        let messages = parser.parse(&wire).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].cid, CHANNEL_VIDEO);
        assert_eq!(messages[0].type_id, TYPE_VIDEO);
        assert_eq!(messages[0].timestamp, 500);
        assert_eq!(messages[0].payload, packet.data);
    }
}
