//! Per-stream broadcast hub
//!
//! One [`BroadcastHub`] exists per stream path (`/app/name`). It holds at
//! most one publisher and any number of subscribers, caches the latest
//! metadata and codec headers in both wire forms, and keeps a GOP cache of
//! pre-muxed frames so a late joiner starts with a decodable picture.
//!
//! Delivery is fire-and-forget over unbounded channels: a slow or dead
//! subscriber can fall behind or drop, but can never stall the publisher or
//! other subscribers. For a given subscriber, bytes arrive in exactly the
//! order [`BroadcastHub::broadcast_message`] was called.
//!
//! The GOP cache is cleared and reseeded on every keyframe. As a safety
//! valve it is also cleared entirely when it exceeds 4096 entries; this is a
//! crude overflow guard, not a sliding window.

use std::collections::HashMap;

use bytes::Bytes;
use md5::{Digest, Md5};
use tokio::sync::{broadcast, mpsc};

use crate::error::BroadcastError;
use crate::media::{flv, AvPacket, PacketFlags};
use crate::protocol::engine;
use crate::server::AuthConfig;
use crate::session::{now_millis, now_secs, Event, EventKind, Protocol, SessionInfo};

/// GOP cache entry limit; exceeding it clears the whole cache.
const GOP_CACHE_LIMIT: usize = 4096;

struct Subscriber {
    protocol: Protocol,
    sender: mpsc::UnboundedSender<Bytes>,
}

/// Broadcast hub for one stream path.
pub struct BroadcastHub {
    auth: AuthConfig,
    events: broadcast::Sender<Event>,

    /// Session id of the current publisher, if any.
    publisher: Option<u64>,
    subscribers: HashMap<u64, Subscriber>,

    flv_header: Bytes,
    flv_metadata: Option<Bytes>,
    flv_audio_header: Option<Bytes>,
    flv_video_header: Option<Bytes>,
    rtmp_metadata: Option<Bytes>,
    rtmp_audio_header: Option<Bytes>,
    rtmp_video_header: Option<Bytes>,

    /// Absent until the first keyframe arrives; frames seen before that are
    /// not cached.
    flv_gop_cache: Option<Vec<Bytes>>,
    rtmp_gop_cache: Option<Vec<Bytes>>,
}

impl BroadcastHub {
    pub fn new(auth: AuthConfig, events: broadcast::Sender<Event>) -> Self {
        Self {
            auth,
            events,
            publisher: None,
            subscribers: HashMap::new(),
            flv_header: flv::create_header(true, true),
            flv_metadata: None,
            flv_audio_header: None,
            flv_video_header: None,
            rtmp_metadata: None,
            rtmp_audio_header: None,
            rtmp_video_header: None,
            flv_gop_cache: None,
            rtmp_gop_cache: None,
        }
    }

    /// Whether a publisher is currently attached.
    pub fn has_publisher(&self) -> bool {
        self.publisher.is_some()
    }

    /// Number of attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn emit(&self, kind: EventKind, session: &SessionInfo) {
        let _ = self.events.send(Event {
            kind,
            session: session.clone(),
        });
    }

    /// Verify the signed-expiry token `{expiry}-{hex_md5(path-expiry-secret)}`.
    ///
    /// An empty secret disables the check entirely. A token that is not
    /// exactly two hyphen-separated fields is rejected outright, not treated
    /// as missing.
    fn verify_auth(&self, session: &SessionInfo) -> bool {
        if self.auth.secret.is_empty() {
            return true;
        }
        let sign = match session.query.get("sign") {
            Some(sign) => sign,
            None => return false,
        };
        let mut fields = sign.split('-');
        let (expiry, signature) = match (fields.next(), fields.next(), fields.next()) {
            (Some(expiry), Some(signature), None) => (expiry, signature),
            _ => return false,
        };
        let expiry: i64 = match expiry.parse() {
            Ok(expiry) => expiry,
            Err(_) => return false,
        };
        if expiry < now_secs() {
            return false;
        }
        let mut hasher = Md5::new();
        hasher.update(format!("{}-{}-{}", session.stream_path, expiry, self.auth.secret));
        let expected = format!("{:x}", hasher.finalize());
        signature == expected
    }

    /// Attach a subscriber.
    ///
    /// On success the subscriber first receives, in order: the container
    /// header (FLV only), cached metadata, cached audio header, cached video
    /// header, then the whole GOP cache in insertion order. Registration for
    /// live delivery happens only after that replay, so nothing is delivered
    /// twice or out of order.
    pub fn post_play(
        &mut self,
        session: &SessionInfo,
        sender: mpsc::UnboundedSender<Bytes>,
    ) -> Result<(), BroadcastError> {
        // Internal sessions (empty ip) skip events and play auth
        let external = !session.ip.is_empty();
        if external {
            self.emit(EventKind::PrePlay, session);
        }
        if self.auth.play && external && !self.verify_auth(session) {
            return Err(BroadcastError::AuthFailed {
                path: session.stream_path.clone(),
            });
        }
        if external {
            self.emit(EventKind::PostPlay, session);
        }

        match session.protocol {
            Protocol::Flv => {
                let _ = sender.send(self.flv_header.clone());
                for cached in [
                    &self.flv_metadata,
                    &self.flv_audio_header,
                    &self.flv_video_header,
                ]
                .into_iter()
                .flatten()
                {
                    let _ = sender.send(cached.clone());
                }
                if let Some(cache) = &self.flv_gop_cache {
                    for frame in cache {
                        let _ = sender.send(frame.clone());
                    }
                }
            }
            Protocol::Rtmp => {
                for cached in [
                    &self.rtmp_metadata,
                    &self.rtmp_audio_header,
                    &self.rtmp_video_header,
                ]
                .into_iter()
                .flatten()
                {
                    let _ = sender.send(cached.clone());
                }
                if let Some(cache) = &self.rtmp_gop_cache {
                    for frame in cache {
                        let _ = sender.send(frame.clone());
                    }
                }
            }
        }

        self.subscribers.insert(
            session.id,
            Subscriber {
                protocol: session.protocol,
                sender,
            },
        );
        tracing::info!(
            stream = %session.stream_path,
            session_id = session.id,
            subscribers = self.subscribers.len(),
            "subscriber joined"
        );
        Ok(())
    }

    /// Detach a subscriber. Safe to call for sessions that never attached.
    pub fn done_play(&mut self, session: &SessionInfo) {
        if !session.ip.is_empty() {
            let mut ended = session.clone();
            ended.end_time = now_millis();
            self.emit(EventKind::DonePlay, &ended);
        }
        self.subscribers.remove(&session.id);
    }

    /// Install a publisher.
    pub fn post_publish(&mut self, session: &SessionInfo) -> Result<(), BroadcastError> {
        self.emit(EventKind::PrePublish, session);
        if self.auth.publish && !self.verify_auth(session) {
            return Err(BroadcastError::AuthFailed {
                path: session.stream_path.clone(),
            });
        }
        if self.publisher.is_some() {
            return Err(BroadcastError::AlreadyPublishing {
                path: session.stream_path.clone(),
            });
        }
        self.publisher = Some(session.id);
        self.emit(EventKind::PostPublish, session);
        tracing::info!(
            stream = %session.stream_path,
            session_id = session.id,
            "publisher attached"
        );
        Ok(())
    }

    /// Remove the publisher and drop all cached state. No-op unless the
    /// session is the current publisher. The hub itself persists: subscribers
    /// may outlive the publisher and a new one can attach later.
    pub fn done_publish(&mut self, session: &SessionInfo) {
        if self.publisher != Some(session.id) {
            return;
        }
        let mut ended = session.clone();
        ended.end_time = now_millis();
        self.emit(EventKind::DonePublish, &ended);

        self.publisher = None;
        self.flv_metadata = None;
        self.flv_audio_header = None;
        self.flv_video_header = None;
        self.rtmp_metadata = None;
        self.rtmp_audio_header = None;
        self.rtmp_video_header = None;
        if let Some(cache) = &mut self.flv_gop_cache {
            cache.clear();
        }
        if let Some(cache) = &mut self.rtmp_gop_cache {
            cache.clear();
        }
        tracing::info!(
            stream = %session.stream_path,
            session_id = session.id,
            "publisher detached"
        );
    }

    /// Classify a publisher packet, update the caches, and fan both wire
    /// forms out to every subscriber by protocol.
    pub fn broadcast_message(&mut self, packet: &AvPacket) {
        let flv_message = flv::create_message(packet);
        let rtmp_message = engine::create_message(packet);

        match packet.flags {
            PacketFlags::AudioHeader => {
                self.flv_audio_header = Some(flv_message.clone());
                self.rtmp_audio_header = Some(rtmp_message.clone());
            }
            PacketFlags::VideoHeader => {
                self.flv_video_header = Some(flv_message.clone());
                self.rtmp_video_header = Some(rtmp_message.clone());
            }
            PacketFlags::Metadata => {
                self.flv_metadata = Some(flv_message.clone());
                self.rtmp_metadata = Some(rtmp_message.clone());
            }
            PacketFlags::Keyframe => {
                // Keyframe boundary: a fresh GOP starts here
                self.flv_gop_cache = Some(vec![flv_message.clone()]);
                self.rtmp_gop_cache = Some(vec![rtmp_message.clone()]);
            }
            PacketFlags::AudioFrame | PacketFlags::InterFrame => {
                if let Some(cache) = &mut self.flv_gop_cache {
                    cache.push(flv_message.clone());
                }
                if let Some(cache) = &mut self.rtmp_gop_cache {
                    cache.push(rtmp_message.clone());
                }
            }
            PacketFlags::VideoMetadata => {}
        }

        if let Some(cache) = &mut self.flv_gop_cache {
            if cache.len() > GOP_CACHE_LIMIT {
                cache.clear();
            }
        }
        if let Some(cache) = &mut self.rtmp_gop_cache {
            if cache.len() > GOP_CACHE_LIMIT {
                cache.clear();
            }
        }

        for subscriber in self.subscribers.values() {
            let message = match subscriber.protocol {
                Protocol::Flv => flv_message.clone(),
                Protocol::Rtmp => rtmp_message.clone(),
            };
            let _ = subscriber.sender.send(message);
        }
    }

    #[cfg(test)]
    fn gop_len(&self) -> usize {
        self.flv_gop_cache.as_ref().map(Vec::len).unwrap_or(0)
    }
}
