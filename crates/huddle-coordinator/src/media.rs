//! Contract between the coordinator and the real-time media stack.
//!
//! The coordinator never touches codecs or transports directly. It asks a
//! [`MediaDevices`] for capture streams, a [`SessionFactory`] for one
//! [`PeerSession`] per remote participant, and hears back from those sessions
//! through a [`SessionEventSink`]. The webrtc-rs implementation lives in
//! [`crate::rtc`]; tests plug in fakes.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use huddle_proto::negotiation::{IceCandidate, SessionDescription};
use huddle_proto::ConnectionId;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crate::error::{MediaAccessError, NegotiationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Video => f.write_str("video"),
        }
    }
}

/// A local capture track.
///
/// Disabling a track keeps it attached to every session but stops it from
/// carrying media; stopping it releases the device for good.
pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    fn enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool);
    fn stop(&self);
    /// Lets a session implementation recover its own concrete track type.
    fn as_any(&self) -> &dyn Any;
}

pub type TrackHandle = Arc<dyn MediaTrack>;

/// A set of tracks captured together, e.g. camera plus microphone.
#[derive(Debug, Clone)]
pub struct LocalStream {
    id: String,
    tracks: Vec<TrackHandle>,
}

impl LocalStream {
    pub fn new(id: impl Into<String>, tracks: Vec<TrackHandle>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[TrackHandle] {
        &self.tracks
    }

    pub fn audio_track(&self) -> Option<&TrackHandle> {
        self.track_of(TrackKind::Audio)
    }

    pub fn video_track(&self) -> Option<&TrackHandle> {
        self.track_of(TrackKind::Video)
    }

    fn track_of(&self, kind: TrackKind) -> Option<&TrackHandle> {
        self.tracks.iter().find(|track| track.kind() == kind)
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// A screen capture. `ended` resolves when the capture is stopped outside the
/// application, e.g. through the operating system's stop-sharing control. A
/// dropped sender counts as ended too.
#[derive(Debug)]
pub struct DisplayCapture {
    pub stream: LocalStream,
    pub ended: oneshot::Receiver<()>,
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Camera and microphone.
    async fn user_media(&self) -> Result<LocalStream, MediaAccessError>;

    /// Screen, with optional system audio.
    async fn display_media(&self) -> Result<DisplayCapture, MediaAccessError>;
}

/// Connectivity of a single peer session as reported by the media stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectivityState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectivityState::New => "new",
            ConnectivityState::Connecting => "connecting",
            ConnectivityState::Connected => "connected",
            ConnectivityState::Disconnected => "disconnected",
            ConnectivityState::Failed => "failed",
            ConnectivityState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Description of a track received from a remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
    pub stream_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    RemoteTrack(RemoteTrack),
    StateChanged(ConnectivityState),
    LocalCandidate(IceCandidate),
}

/// A session event tagged with the link it came from.
#[derive(Debug)]
pub(crate) struct SessionNotice {
    pub peer: ConnectionId,
    pub generation: u64,
    pub event: SessionEvent,
}

/// Where a [`PeerSession`] reports asynchronous notifications. Each sink is
/// bound to one link; events emitted after that link is torn down are
/// discarded by the coordinator.
#[derive(Debug, Clone)]
pub struct SessionEventSink {
    peer: ConnectionId,
    generation: u64,
    tx: mpsc::UnboundedSender<SessionNotice>,
}

impl SessionEventSink {
    pub(crate) fn new(
        peer: ConnectionId,
        generation: u64,
        tx: mpsc::UnboundedSender<SessionNotice>,
    ) -> Self {
        Self {
            peer,
            generation,
            tx,
        }
    }

    pub fn peer(&self) -> &ConnectionId {
        &self.peer
    }

    pub fn emit(&self, event: SessionEvent) {
        let notice = SessionNotice {
            peer: self.peer.clone(),
            generation: self.generation,
            event,
        };
        if self.tx.send(notice).is_err() {
            trace!(peer_id = %self.peer, "session event after coordinator shutdown");
        }
    }
}

/// One negotiated media session with a remote participant.
///
/// Calls on a single session are never issued concurrently.
#[async_trait]
pub trait PeerSession: Send + Sync {
    async fn add_track(&self, track: TrackHandle, stream_id: &str) -> Result<(), NegotiationError>;

    /// Swap the outgoing track of `kind` without renegotiating. Returns
    /// `false` when no sender of that kind exists.
    async fn replace_track(
        &self,
        kind: TrackKind,
        track: TrackHandle,
    ) -> Result<bool, NegotiationError>;

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError>;

    async fn close(&self);
}

#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(
        &self,
        peer: &ConnectionId,
        events: SessionEventSink,
    ) -> Result<Arc<dyn PeerSession>, NegotiationError>;
}
