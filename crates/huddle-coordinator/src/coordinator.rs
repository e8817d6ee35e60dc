//! The session coordinator actor.
//!
//! [`Coordinator`] owns the local capture, every [`PeerLink`] and the current
//! signaling link. It runs as a single task and takes one input at a time:
//! a command from a [`CoordinatorHandle`], an event from the relay, a
//! notification from a peer session, or the end of a screen capture. Each
//! negotiation step is awaited before the next input is read, so calls on a
//! given session never overlap.

use std::collections::HashMap;
use std::future::pending;
use std::sync::Arc;

use huddle_proto::negotiation::{IceCandidate, SdpKind, SessionDescription};
use huddle_proto::{
    AnswerRequest, AudioToggle, AudioToggleNotice, CandidateRequest, ClientEvent, ConnectionId,
    JoinRoom, OfferRequest, Participant, RelayedAnswer, RelayedCandidate, RelayedOffer,
    ServerEvent, UserData, VideoToggle, VideoToggleNotice, DEFAULT_DISPLAY_NAME,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{CoordinatorError, MediaAccessError, NegotiationError, SignalingError};
use crate::media::{
    ConnectivityState, LocalStream, MediaDevices, RemoteTrack, SessionEvent, SessionEventSink,
    SessionFactory, SessionNotice, TrackHandle, TrackKind,
};
use crate::peer::{status_label, NegotiationRole, PeerLink, PeerSummary};
use crate::signaling::{SignalingConnector, SignalingLink};

const COMMAND_BUFFER: usize = 32;

/// Which local capture the UI should preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewSource {
    Camera,
    Screen,
}

/// Notifications for the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    /// The relay assigned this coordinator a connection id.
    Connected { connection_id: ConnectionId },
    Joined { room_id: String, display_name: String },
    PeerAdded { peer: ConnectionId, name: String },
    PeerRemoved { peer: ConnectionId },
    RemoteTrack { peer: ConnectionId, track: RemoteTrack },
    PeerStateChanged {
        peer: ConnectionId,
        state: ConnectivityState,
        label: &'static str,
    },
    RemoteAudio { peer: ConnectionId, muted: bool },
    RemoteVideo { peer: ConnectionId, video_off: bool },
    ParticipantCount(usize),
    LocalPreview(PreviewSource),
    HungUp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorSnapshot {
    pub connection_id: Option<ConnectionId>,
    pub room_id: Option<String>,
    pub display_name: Option<String>,
    pub audio_muted: bool,
    pub video_off: bool,
    pub screen_sharing: bool,
    pub participant_count: usize,
    /// Sorted by peer id.
    pub peers: Vec<PeerSummary>,
}

/// Everything the coordinator needs from the outside world.
#[derive(Clone)]
pub struct Collaborators {
    pub devices: Arc<dyn MediaDevices>,
    pub sessions: Arc<dyn SessionFactory>,
    pub signaling: Arc<dyn SignalingConnector>,
}

enum ScreenShareRequest {
    Start,
    Stop,
    Toggle,
}

enum Command {
    Join {
        room_id: String,
        display_name: String,
        reply: oneshot::Sender<Result<(), CoordinatorError>>,
    },
    ToggleAudio {
        reply: oneshot::Sender<Result<bool, CoordinatorError>>,
    },
    ToggleVideo {
        reply: oneshot::Sender<Result<bool, CoordinatorError>>,
    },
    ScreenShare {
        request: ScreenShareRequest,
        reply: oneshot::Sender<Result<bool, CoordinatorError>>,
    },
    HangUp {
        reply: oneshot::Sender<Result<(), CoordinatorError>>,
    },
    Snapshot {
        reply: oneshot::Sender<CoordinatorSnapshot>,
    },
}

/// Cloneable front door to a running [`Coordinator`]. The actor stops once
/// every handle is dropped.
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
}

impl CoordinatorHandle {
    pub async fn join_room(
        &self,
        room_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Result<(), CoordinatorError> {
        let room_id = room_id.into();
        let display_name = display_name.into();
        self.request(|reply| Command::Join {
            room_id,
            display_name,
            reply,
        })
        .await?
    }

    /// Returns the new muted flag.
    pub async fn toggle_audio(&self) -> Result<bool, CoordinatorError> {
        self.request(|reply| Command::ToggleAudio { reply }).await?
    }

    /// Returns the new video-off flag.
    pub async fn toggle_video(&self) -> Result<bool, CoordinatorError> {
        self.request(|reply| Command::ToggleVideo { reply }).await?
    }

    /// Returns whether a screen share is active afterwards.
    pub async fn toggle_screen_share(&self) -> Result<bool, CoordinatorError> {
        self.screen_share(ScreenShareRequest::Toggle).await
    }

    pub async fn start_screen_share(&self) -> Result<bool, CoordinatorError> {
        self.screen_share(ScreenShareRequest::Start).await
    }

    pub async fn stop_screen_share(&self) -> Result<bool, CoordinatorError> {
        self.screen_share(ScreenShareRequest::Stop).await
    }

    async fn screen_share(&self, request: ScreenShareRequest) -> Result<bool, CoordinatorError> {
        self.request(|reply| Command::ScreenShare { request, reply })
            .await?
    }

    pub async fn hang_up(&self) -> Result<(), CoordinatorError> {
        self.request(|reply| Command::HangUp { reply }).await?
    }

    pub async fn snapshot(&self) -> Result<CoordinatorSnapshot, CoordinatorError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, CoordinatorError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| CoordinatorError::Stopped)?;
        response.await.map_err(|_| CoordinatorError::Stopped)
    }
}

struct LocalSession {
    room_id: String,
    display_name: String,
    camera: LocalStream,
    audio_muted: bool,
    video_off: bool,
    screen: Option<LocalStream>,
}

impl LocalSession {
    /// Tracks a new link should carry: microphone plus whichever video
    /// source is currently active.
    fn outgoing_tracks(&self) -> Vec<TrackHandle> {
        let mut tracks = Vec::with_capacity(2);
        if let Some(audio) = self.camera.audio_track() {
            tracks.push(audio.clone());
        }
        if let Some(video) = self.outgoing_video() {
            tracks.push(video);
        }
        tracks
    }

    fn outgoing_video(&self) -> Option<TrackHandle> {
        self.screen
            .as_ref()
            .and_then(|screen| screen.video_track())
            .or_else(|| self.camera.video_track())
            .cloned()
    }
}

pub struct Coordinator {
    devices: Arc<dyn MediaDevices>,
    sessions: Arc<dyn SessionFactory>,
    connector: Arc<dyn SignalingConnector>,
    events: mpsc::UnboundedSender<CoordinatorEvent>,
    signaling: Option<SignalingLink>,
    connection_id: Option<ConnectionId>,
    local: Option<LocalSession>,
    screen_ended: Option<oneshot::Receiver<()>>,
    links: HashMap<ConnectionId, PeerLink>,
    names: HashMap<ConnectionId, String>,
    participant_count: usize,
    next_generation: u64,
    session_tx: mpsc::UnboundedSender<SessionNotice>,
    session_rx: mpsc::UnboundedReceiver<SessionNotice>,
}

impl Coordinator {
    /// Open the first signaling link and start the actor on the current
    /// tokio runtime.
    pub async fn spawn(
        collaborators: Collaborators,
    ) -> Result<(CoordinatorHandle, mpsc::UnboundedReceiver<CoordinatorEvent>), CoordinatorError>
    {
        let signaling = collaborators.signaling.connect().await?;
        let (events, event_rx) = mpsc::unbounded_channel();
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);

        let coordinator = Self {
            devices: collaborators.devices,
            sessions: collaborators.sessions,
            connector: collaborators.signaling,
            events,
            signaling: Some(signaling),
            connection_id: None,
            local: None,
            screen_ended: None,
            links: HashMap::new(),
            names: HashMap::new(),
            participant_count: 0,
            next_generation: 0,
            session_tx,
            session_rx,
        };
        tokio::spawn(coordinator.run(command_rx));

        Ok((CoordinatorHandle { commands }, event_rx))
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                inbound = next_inbound(&mut self.signaling) => match inbound {
                    Some(event) => self.dispatch(event).await,
                    None => {
                        warn!("signaling channel closed by relay");
                        self.signaling = None;
                    }
                },
                Some(notice) = self.session_rx.recv() => self.on_session_notice(notice),
                _ = capture_ended(&mut self.screen_ended) => {
                    self.screen_ended = None;
                    info!("screen capture ended outside the application");
                    self.stop_screen_share().await;
                }
            }
        }
        self.teardown().await;
        debug!("coordinator stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Join {
                room_id,
                display_name,
                reply,
            } => {
                let _ = reply.send(self.join_room(room_id, display_name).await);
            }
            Command::ToggleAudio { reply } => {
                let _ = reply.send(self.toggle_audio());
            }
            Command::ToggleVideo { reply } => {
                let _ = reply.send(self.toggle_video());
            }
            Command::ScreenShare { request, reply } => {
                let sharing = self.local.as_ref().map(|local| local.screen.is_some());
                let result = match (request, sharing) {
                    (_, None) => Err(CoordinatorError::NotInRoom),
                    (ScreenShareRequest::Start, Some(false))
                    | (ScreenShareRequest::Toggle, Some(false)) => {
                        self.start_screen_share().await.map(|_| true)
                    }
                    (ScreenShareRequest::Stop, Some(true))
                    | (ScreenShareRequest::Toggle, Some(true)) => {
                        self.stop_screen_share().await;
                        Ok(false)
                    }
                    (_, Some(sharing)) => Ok(sharing),
                };
                let _ = reply.send(result);
            }
            Command::HangUp { reply } => {
                let _ = reply.send(self.hang_up().await);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    async fn join_room(
        &mut self,
        room_id: String,
        display_name: String,
    ) -> Result<(), CoordinatorError> {
        if let Some(local) = &self.local {
            return Err(CoordinatorError::AlreadyInRoom(local.room_id.clone()));
        }
        let room_id = room_id.trim().to_string();
        if room_id.is_empty() {
            return Err(CoordinatorError::InvalidRoom);
        }
        let user_data = UserData::named(display_name);
        let display_name = user_data.display_name();
        if self.signaling.is_none() {
            return Err(SignalingError::Closed.into());
        }

        let camera = self.devices.user_media().await.map_err(|err| {
            warn!(room_id = %room_id, error = %err, "local capture unavailable, join aborted");
            err
        })?;

        let join = ClientEvent::JoinRoom(JoinRoom {
            room_id: room_id.clone(),
            user_data: UserData::named(display_name.clone()),
        });
        if let Err(err) = self.send(join) {
            camera.stop();
            return Err(err.into());
        }

        info!(room_id = %room_id, name = %display_name, "joined room");
        self.local = Some(LocalSession {
            room_id: room_id.clone(),
            display_name: display_name.clone(),
            camera,
            audio_muted: false,
            video_off: false,
            screen: None,
        });
        self.emit(CoordinatorEvent::LocalPreview(PreviewSource::Camera));
        self.emit(CoordinatorEvent::Joined {
            room_id,
            display_name,
        });
        Ok(())
    }

    /// Local state only changes once the notice is queued.
    fn toggle_audio(&mut self) -> Result<bool, CoordinatorError> {
        let local = self.local.as_ref().ok_or(CoordinatorError::NotInRoom)?;
        let Some(track) = local.camera.audio_track().cloned() else {
            return Ok(local.audio_muted);
        };
        let muted = !local.audio_muted;
        self.send(ClientEvent::UserToggleAudio(AudioToggle {
            room_id: local.room_id.clone(),
            muted,
        }))?;
        track.set_enabled(!muted);
        if let Some(local) = self.local.as_mut() {
            local.audio_muted = muted;
        }
        debug!(muted, "local audio toggled");
        Ok(muted)
    }

    fn toggle_video(&mut self) -> Result<bool, CoordinatorError> {
        let local = self.local.as_ref().ok_or(CoordinatorError::NotInRoom)?;
        let Some(track) = local.camera.video_track().cloned() else {
            return Ok(local.video_off);
        };
        let video_off = !local.video_off;
        self.send(ClientEvent::UserToggleVideo(VideoToggle {
            room_id: local.room_id.clone(),
            video_off,
        }))?;
        track.set_enabled(!video_off);
        if let Some(local) = self.local.as_mut() {
            local.video_off = video_off;
        }
        debug!(video_off, "local video toggled");
        Ok(video_off)
    }

    async fn start_screen_share(&mut self) -> Result<(), CoordinatorError> {
        let capture = self.devices.display_media().await?;
        let Some(screen_video) = capture.stream.video_track().cloned() else {
            capture.stream.stop();
            return Err(MediaAccessError::NotFound("display video".into()).into());
        };
        self.replace_outgoing_video(screen_video).await;

        if let Some(local) = self.local.as_mut() {
            local.screen = Some(capture.stream);
        }
        self.screen_ended = Some(capture.ended);
        info!(peers = self.links.len(), "screen share started");
        self.emit(CoordinatorEvent::LocalPreview(PreviewSource::Screen));
        Ok(())
    }

    /// Revert every link to the camera and release the screen capture.
    async fn stop_screen_share(&mut self) {
        self.screen_ended = None;
        let Some(local) = self.local.as_mut() else {
            return;
        };
        let Some(screen) = local.screen.take() else {
            return;
        };
        if let Some(camera_video) = local.camera.video_track().cloned() {
            self.replace_outgoing_video(camera_video).await;
        }
        screen.stop();
        info!(peers = self.links.len(), "screen share stopped");
        self.emit(CoordinatorEvent::LocalPreview(PreviewSource::Camera));
    }

    async fn replace_outgoing_video(&self, track: TrackHandle) {
        for (peer, link) in &self.links {
            match link.session().replace_track(TrackKind::Video, track.clone()).await {
                Ok(true) => {}
                Ok(false) => debug!(peer_id = %peer, "no outgoing video sender to replace"),
                Err(err) => warn!(peer_id = %peer, error = %err, "video track replacement failed"),
            }
        }
    }

    async fn hang_up(&mut self) -> Result<(), CoordinatorError> {
        self.teardown().await;

        // A fresh link means a fresh connection id and no stale relay state.
        self.signaling = None;
        self.connection_id = None;
        self.emit(CoordinatorEvent::HungUp);
        let link = self.connector.connect().await.map_err(|err| {
            warn!(error = %err, "signaling reconnect failed");
            err
        })?;
        self.signaling = Some(link);
        info!("hung up and reconnected signaling");
        Ok(())
    }

    async fn teardown(&mut self) {
        self.screen_ended = None;
        if let Some(local) = self.local.take() {
            if let Some(screen) = &local.screen {
                screen.stop();
            }
            local.camera.stop();
            info!(room_id = %local.room_id, "left room");
        }
        let links: Vec<PeerLink> = self.links.drain().map(|(_, link)| link).collect();
        for link in links {
            let peer = link.id().clone();
            link.close().await;
            self.emit(CoordinatorEvent::PeerRemoved { peer });
        }
        self.names.clear();
        self.participant_count = 0;
    }

    fn snapshot(&self) -> CoordinatorSnapshot {
        let mut peers: Vec<PeerSummary> = self.links.values().map(PeerLink::summary).collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        let local = self.local.as_ref();
        CoordinatorSnapshot {
            connection_id: self.connection_id.clone(),
            room_id: local.map(|local| local.room_id.clone()),
            display_name: local.map(|local| local.display_name.clone()),
            audio_muted: local.map_or(false, |local| local.audio_muted),
            video_off: local.map_or(false, |local| local.video_off),
            screen_sharing: local.map_or(false, |local| local.screen.is_some()),
            participant_count: self.participant_count,
            peers,
        }
    }

    async fn dispatch(&mut self, event: ServerEvent) {
        debug!(kind = event.kind(), "relay event");
        match event {
            ServerEvent::Connected(welcome) => {
                info!(connection_id = %welcome.connection_id, "relay assigned connection id");
                self.connection_id = Some(welcome.connection_id.clone());
                self.emit(CoordinatorEvent::Connected {
                    connection_id: welcome.connection_id,
                });
            }
            ServerEvent::ExistingUsers(participants) => self.on_existing_users(participants).await,
            ServerEvent::UserJoined(participant) => self.on_user_joined(participant).await,
            ServerEvent::RoomUsers(participants) => self.on_room_users(participants),
            ServerEvent::UserLeft(peer) => self.on_user_left(peer).await,
            ServerEvent::Offer(offer) => self.on_offer(offer).await,
            ServerEvent::Answer(answer) => self.on_answer(answer).await,
            ServerEvent::IceCandidate(candidate) => self.on_remote_candidate(candidate).await,
            ServerEvent::UserToggleAudio(notice) => self.on_audio_notice(notice),
            ServerEvent::UserToggleVideo(notice) => self.on_video_notice(notice),
        }
    }

    fn is_self(&self, peer: &ConnectionId) -> bool {
        self.connection_id.as_ref() == Some(peer)
    }

    /// Members already present answer our offers; they do not get one.
    async fn on_existing_users(&mut self, participants: Vec<Participant>) {
        for participant in participants {
            self.names
                .insert(participant.connection_id.clone(), participant.name.clone());
            if self.is_self(&participant.connection_id)
                || self.links.contains_key(&participant.connection_id)
            {
                continue;
            }
            if let Err(err) = self
                .open_link(
                    participant.connection_id.clone(),
                    participant.name,
                    NegotiationRole::Responder,
                )
                .await
            {
                warn!(peer_id = %participant.connection_id, error = %err, "failed to prepare link");
            }
        }
    }

    async fn on_user_joined(&mut self, participant: Participant) {
        let peer = participant.connection_id;
        self.names.insert(peer.clone(), participant.name.clone());
        if self.is_self(&peer) || self.links.contains_key(&peer) {
            return;
        }
        if let Err(err) = self
            .open_link(peer.clone(), participant.name, NegotiationRole::Initiator)
            .await
        {
            warn!(peer_id = %peer, error = %err, "failed to prepare link");
            return;
        }
        if let Err(err) = self.send_offer(&peer).await {
            warn!(peer_id = %peer, error = %err, "offer failed");
        }
    }

    fn on_room_users(&mut self, participants: Vec<Participant>) {
        self.participant_count = participants.len();
        for participant in participants {
            if let Some(link) = self.links.get_mut(&participant.connection_id) {
                link.rename(&participant.name);
            }
            self.names
                .insert(participant.connection_id, participant.name);
        }
        self.emit(CoordinatorEvent::ParticipantCount(self.participant_count));
    }

    async fn on_user_left(&mut self, peer: ConnectionId) {
        self.names.remove(&peer);
        let Some(link) = self.links.remove(&peer) else {
            debug!(peer_id = %peer, "departure for unknown peer");
            return;
        };
        info!(peer_id = %peer, phase = ?link.phase(), "peer left");
        link.close().await;
        self.emit(CoordinatorEvent::PeerRemoved { peer });
    }

    async fn on_offer(&mut self, offer: RelayedOffer) {
        let peer = offer.sender;
        let description = match SessionDescription::from_blob(&offer.offer) {
            Ok(description) => description,
            Err(err) => {
                warn!(peer_id = %peer, error = %err, "ignoring malformed offer");
                return;
            }
        };
        if !self.links.contains_key(&peer) {
            if self.local.is_none() {
                debug!(peer_id = %peer, "offer while not in a room");
                return;
            }
            let name = self
                .names
                .get(&peer)
                .cloned()
                .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string());
            if let Err(err) = self
                .open_link(peer.clone(), name, NegotiationRole::Responder)
                .await
            {
                warn!(peer_id = %peer, error = %err, "failed to prepare link");
                return;
            }
        }
        if let Err(err) = self.send_answer(&peer, description).await {
            warn!(peer_id = %peer, error = %err, "answer failed");
        }
    }

    async fn on_answer(&mut self, answer: RelayedAnswer) {
        let peer = answer.sender;
        let Some(session) = self.links.get(&peer).map(PeerLink::session) else {
            debug!(peer_id = %peer, "answer for unknown peer");
            return;
        };
        let result: Result<(), NegotiationError> = async {
            let description = SessionDescription::from_blob(&answer.answer)?;
            session.set_remote_description(description).await
        }
        .await;
        match result {
            Ok(()) => {
                if let Some(link) = self.links.get_mut(&peer) {
                    link.answer_applied();
                }
            }
            Err(err) => warn!(peer_id = %peer, error = %err, "failed to apply answer"),
        }
    }

    async fn on_remote_candidate(&mut self, candidate: RelayedCandidate) {
        let peer = candidate.sender;
        let Some(session) = self.links.get(&peer).map(PeerLink::session) else {
            debug!(peer_id = %peer, "candidate for unknown peer");
            return;
        };
        let result: Result<(), NegotiationError> = async {
            let candidate = IceCandidate::from_blob(&candidate.candidate)?;
            session.add_ice_candidate(candidate).await
        }
        .await;
        if let Err(err) = result {
            warn!(peer_id = %peer, error = %err, "failed to apply remote candidate");
        }
    }

    fn on_audio_notice(&mut self, notice: AudioToggleNotice) {
        if let Some(link) = self.links.get_mut(&notice.user_id) {
            link.set_muted(notice.muted);
        }
        self.emit(CoordinatorEvent::RemoteAudio {
            peer: notice.user_id,
            muted: notice.muted,
        });
    }

    fn on_video_notice(&mut self, notice: VideoToggleNotice) {
        if let Some(link) = self.links.get_mut(&notice.user_id) {
            link.set_video_off(notice.video_off);
        }
        self.emit(CoordinatorEvent::RemoteVideo {
            peer: notice.user_id,
            video_off: notice.video_off,
        });
    }

    fn on_session_notice(&mut self, notice: SessionNotice) {
        let peer = notice.peer;
        let Some(link) = self.links.get_mut(&peer) else {
            debug!(peer_id = %peer, "session event for removed peer");
            return;
        };
        if link.generation() != notice.generation {
            debug!(peer_id = %peer, "stale session event");
            return;
        }
        match notice.event {
            SessionEvent::RemoteTrack(track) => {
                debug!(peer_id = %peer, kind = %track.kind, "remote track arrived");
                link.attach_remote(track.clone());
                self.emit(CoordinatorEvent::RemoteTrack { peer, track });
            }
            SessionEvent::StateChanged(state) => {
                if link.apply_state(state) {
                    info!(peer_id = %peer, state = %state, "peer connectivity changed");
                    self.emit(CoordinatorEvent::PeerStateChanged {
                        peer,
                        state,
                        label: status_label(state),
                    });
                }
            }
            SessionEvent::LocalCandidate(candidate) => {
                let request = CandidateRequest {
                    candidate: candidate.to_blob(),
                    target: peer.clone(),
                };
                if let Err(err) = self.send(ClientEvent::IceCandidate(request)) {
                    debug!(peer_id = %peer, error = %err, "dropping local candidate");
                }
            }
        }
    }

    async fn open_link(
        &mut self,
        peer: ConnectionId,
        name: String,
        role: NegotiationRole,
    ) -> Result<(), NegotiationError> {
        let Some(local) = self.local.as_ref() else {
            return Err(NegotiationError::Session("no local media".into()));
        };
        let tracks = local.outgoing_tracks();
        let stream_id = local.camera.id().to_string();

        self.next_generation += 1;
        let generation = self.next_generation;
        let sink = SessionEventSink::new(peer.clone(), generation, self.session_tx.clone());
        let session = self.sessions.create(&peer, sink).await?;
        for track in tracks {
            if let Err(err) = session.add_track(track, &stream_id).await {
                session.close().await;
                return Err(err);
            }
        }

        info!(peer_id = %peer, name = %name, role = ?role, "peer link created");
        self.links.insert(
            peer.clone(),
            PeerLink::new(peer.clone(), name.clone(), session, generation, role),
        );
        self.emit(CoordinatorEvent::PeerAdded { peer, name });
        Ok(())
    }

    async fn send_offer(&mut self, peer: &ConnectionId) -> Result<(), CoordinatorError> {
        let session = self
            .links
            .get(peer)
            .map(PeerLink::session)
            .ok_or_else(|| NegotiationError::Session(format!("no link for {peer}")))?;
        let offer = session.create_offer().await?;
        session.set_local_description(offer.clone()).await?;
        self.send(ClientEvent::Offer(OfferRequest {
            offer: offer.to_blob(),
            target: peer.clone(),
        }))?;
        if let Some(link) = self.links.get_mut(peer) {
            link.offer_sent();
        }
        debug!(peer_id = %peer, "offer sent");
        Ok(())
    }

    async fn send_answer(
        &mut self,
        peer: &ConnectionId,
        offer: SessionDescription,
    ) -> Result<(), CoordinatorError> {
        if offer.kind != SdpKind::Offer {
            return Err(NegotiationError::Unsupported(format!(
                "expected an offer, got {:?}",
                offer.kind
            ))
            .into());
        }
        let session = self
            .links
            .get(peer)
            .map(PeerLink::session)
            .ok_or_else(|| NegotiationError::Session(format!("no link for {peer}")))?;
        session.set_remote_description(offer).await?;
        let answer = session.create_answer().await?;
        session.set_local_description(answer.clone()).await?;
        self.send(ClientEvent::Answer(AnswerRequest {
            answer: answer.to_blob(),
            target: peer.clone(),
        }))?;
        if let Some(link) = self.links.get_mut(peer) {
            link.answer_sent();
        }
        debug!(peer_id = %peer, "answer sent");
        Ok(())
    }

    fn send(&self, event: ClientEvent) -> Result<(), SignalingError> {
        let link = self.signaling.as_ref().ok_or(SignalingError::Closed)?;
        link.outbound
            .send(event)
            .map_err(|_| SignalingError::Closed)
    }

    fn emit(&self, event: CoordinatorEvent) {
        // The UI may have stopped listening; the call carries on regardless.
        let _ = self.events.send(event);
    }
}

async fn next_inbound(link: &mut Option<SignalingLink>) -> Option<ServerEvent> {
    match link {
        Some(link) => link.inbound.recv().await,
        None => pending().await,
    }
}

async fn capture_ended(ended: &mut Option<oneshot::Receiver<()>>) {
    match ended {
        Some(ended) => {
            let _ = ended.await;
        }
        None => pending().await,
    }
}
