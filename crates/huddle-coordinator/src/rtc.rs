//! webrtc-rs backed media collaborators.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use huddle_proto::negotiation::{IceCandidate, SdpKind, SessionDescription};
use huddle_proto::ConnectionId;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::config::CoordinatorConfig;
use crate::coordinator::Collaborators;
use crate::error::{CoordinatorError, MediaAccessError, NegotiationError};
use crate::media::{
    ConnectivityState, DisplayCapture, LocalStream, MediaDevices, MediaTrack, PeerSession,
    RemoteTrack, SessionEvent, SessionEventSink, SessionFactory, TrackHandle, TrackKind,
};
use crate::signaling::WsConnector;

/// Wire up webrtc sessions and websocket signaling from `config`.
pub fn collaborators(
    config: &CoordinatorConfig,
    devices: Arc<dyn MediaDevices>,
) -> Result<Collaborators, CoordinatorError> {
    Ok(Collaborators {
        devices,
        sessions: Arc::new(RtcSessionFactory::new(config.ice_servers.clone())?),
        signaling: Arc::new(WsConnector::new(config)?),
    })
}

/// Local sample track with an `enabled` gate. Samples written while the
/// track is disabled or stopped are dropped.
pub struct RtcTrack {
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    local: Arc<TrackLocalStaticSample>,
}

impl RtcTrack {
    pub fn new(kind: TrackKind, stream_id: &str) -> Self {
        let codec = match kind {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48_000,
                channels: 2,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90_000,
                ..Default::default()
            },
        };
        let local = TrackLocalStaticSample::new(
            codec,
            format!("{kind}-{}", Uuid::new_v4()),
            stream_id.to_string(),
        );
        Self {
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            local: Arc::new(local),
        }
    }

    pub fn local(&self) -> Arc<TrackLocalStaticSample> {
        self.local.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub async fn write_sample(&self, sample: &Sample) -> Result<(), NegotiationError> {
        if !self.enabled() || self.is_stopped() {
            return Ok(());
        }
        self.local.write_sample(sample).await?;
        Ok(())
    }
}

impl fmt::Debug for RtcTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtcTrack")
            .field("id", &self.local.id())
            .field("kind", &self.kind)
            .field("enabled", &self.enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl MediaTrack for RtcTrack {
    fn id(&self) -> &str {
        self.local.id()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Capture provider handing out [`RtcTrack`]s. The embedding application
/// feeds encoded samples into the tracks; this type only owns their
/// lifecycle.
#[derive(Default)]
pub struct RtcMediaDevices {
    display_stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl RtcMediaDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal that the active screen capture was stopped by the system.
    pub fn end_display_capture(&self) -> bool {
        match self.display_stop.lock().take() {
            Some(stop) => stop.send(()).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl MediaDevices for RtcMediaDevices {
    async fn user_media(&self) -> Result<LocalStream, MediaAccessError> {
        let stream_id = Uuid::new_v4().to_string();
        let audio: TrackHandle = Arc::new(RtcTrack::new(TrackKind::Audio, &stream_id));
        let video: TrackHandle = Arc::new(RtcTrack::new(TrackKind::Video, &stream_id));
        Ok(LocalStream::new(stream_id, vec![audio, video]))
    }

    async fn display_media(&self) -> Result<DisplayCapture, MediaAccessError> {
        let stream_id = Uuid::new_v4().to_string();
        let video: TrackHandle = Arc::new(RtcTrack::new(TrackKind::Video, &stream_id));
        let (stop, ended) = oneshot::channel();
        *self.display_stop.lock() = Some(stop);
        Ok(DisplayCapture {
            stream: LocalStream::new(stream_id, vec![video]),
            ended,
        })
    }
}

pub struct RtcSessionFactory {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl RtcSessionFactory {
    pub fn new(ice_servers: Vec<RTCIceServer>) -> Result<Self, NegotiationError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self { api, ice_servers })
    }
}

#[async_trait]
impl SessionFactory for RtcSessionFactory {
    async fn create(
        &self,
        peer: &ConnectionId,
        events: SessionEventSink,
    ) -> Result<Arc<dyn PeerSession>, NegotiationError> {
        let rtc_config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        let peer_connection = Arc::new(self.api.new_peer_connection(rtc_config).await?);

        let sink = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let sink = sink.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => sink.emit(SessionEvent::LocalCandidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_m_line_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    })),
                    Err(err) => warn!(peer_id = %sink.peer(), error = %err, "unserializable local candidate"),
                }
            })
        }));

        let sink = events.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let sink = sink.clone();
                Box::pin(async move {
                    if let Some(state) = connectivity(state) {
                        sink.emit(SessionEvent::StateChanged(state));
                    }
                })
            },
        ));

        let sink = events;
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let sink = sink.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Audio => TrackKind::Audio,
                        _ => TrackKind::Video,
                    };
                    sink.emit(SessionEvent::RemoteTrack(RemoteTrack {
                        id: track.id(),
                        kind,
                        stream_id: track.stream_id(),
                    }));
                })
            },
        ));

        debug!(peer_id = %peer, "peer connection created");
        Ok(Arc::new(RtcPeerSession {
            peer: peer.clone(),
            peer_connection,
        }))
    }
}

pub struct RtcPeerSession {
    peer: ConnectionId,
    peer_connection: Arc<RTCPeerConnection>,
}

fn local_track(track: &TrackHandle) -> Result<Arc<dyn TrackLocal + Send + Sync>, NegotiationError> {
    track
        .as_any()
        .downcast_ref::<RtcTrack>()
        .map(|rtc| rtc.local() as Arc<dyn TrackLocal + Send + Sync>)
        .ok_or_else(|| NegotiationError::Unsupported(format!("track {} is not an RtcTrack", track.id())))
}

fn codec_type(kind: TrackKind) -> RTPCodecType {
    match kind {
        TrackKind::Audio => RTPCodecType::Audio,
        TrackKind::Video => RTPCodecType::Video,
    }
}

fn connectivity(state: RTCPeerConnectionState) -> Option<ConnectivityState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectivityState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectivityState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectivityState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectivityState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectivityState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectivityState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

fn rtc_description(description: SessionDescription) -> Result<RTCSessionDescription, NegotiationError> {
    let SessionDescription { kind, sdp } = description;
    Ok(match kind {
        SdpKind::Offer => RTCSessionDescription::offer(sdp)?,
        SdpKind::Answer => RTCSessionDescription::answer(sdp)?,
        SdpKind::Pranswer => RTCSessionDescription::pranswer(sdp)?,
        SdpKind::Rollback => return Err(NegotiationError::Unsupported("rollback".into())),
    })
}

#[async_trait]
impl PeerSession for RtcPeerSession {
    async fn add_track(&self, track: TrackHandle, _stream_id: &str) -> Result<(), NegotiationError> {
        let sender = self.peer_connection.add_track(local_track(&track)?).await?;
        // RTCP has to be drained for the interceptors to keep running.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn replace_track(&self, kind: TrackKind, track: TrackHandle) -> Result<bool, NegotiationError> {
        let replacement = local_track(&track)?;
        for sender in self.peer_connection.get_senders().await {
            let Some(current) = sender.track().await else {
                continue;
            };
            if current.kind() == codec_type(kind) {
                sender.replace_track(Some(replacement)).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let offer = self.peer_connection.create_offer(None).await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let answer = self.peer_connection.create_answer(None).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), NegotiationError> {
        self.peer_connection
            .set_local_description(rtc_description(description)?)
            .await?;
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), NegotiationError> {
        self.peer_connection
            .set_remote_description(rtc_description(description)?)
            .await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        };
        self.peer_connection.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(err) = self.peer_connection.close().await {
            debug!(peer_id = %self.peer, error = %err, "peer connection close failed");
        }
    }
}
