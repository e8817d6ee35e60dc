#![allow(dead_code)]

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use huddle_coordinator::{
    Collaborators, ConnectivityState, Coordinator, CoordinatorEvent, CoordinatorHandle,
    CoordinatorSnapshot, DisplayCapture, LocalStream, MediaAccessError, MediaDevices, MediaTrack,
    NegotiationError, PeerSession, RemoteTrack, SessionEvent, SessionEventSink, SessionFactory,
    SignalingConnector, SignalingError, SignalingLink, TrackHandle, TrackKind,
};
use huddle_proto::negotiation::{IceCandidate, SdpKind, SessionDescription};
use huddle_proto::{ClientEvent, ConnectionId, ServerEvent};
use huddle_relay::server::{serve, AppState};
use huddle_relay::{InMemoryRoomStore, MessageRouter};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct FakeTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl FakeTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl MediaTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
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

#[derive(Default)]
pub struct FakeDevices {
    deny: bool,
    captures: AtomicUsize,
    cameras: Mutex<Vec<Arc<FakeTrack>>>,
    screens: Mutex<Vec<Arc<FakeTrack>>>,
    display_stops: Mutex<Vec<oneshot::Sender<()>>>,
}

impl FakeDevices {
    pub fn denying() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    /// Every camera and microphone track handed out so far.
    pub fn camera_tracks(&self) -> Vec<Arc<FakeTrack>> {
        self.cameras.lock().clone()
    }

    pub fn screen_tracks(&self) -> Vec<Arc<FakeTrack>> {
        self.screens.lock().clone()
    }

    pub fn current_camera_video(&self) -> Option<Arc<FakeTrack>> {
        self.cameras
            .lock()
            .iter()
            .rev()
            .find(|track| track.kind == TrackKind::Video)
            .cloned()
    }

    pub fn current_microphone(&self) -> Option<Arc<FakeTrack>> {
        self.cameras
            .lock()
            .iter()
            .rev()
            .find(|track| track.kind == TrackKind::Audio)
            .cloned()
    }

    /// Simulate the operating system's stop-sharing control.
    pub fn end_display_capture(&self) {
        for stop in self.display_stops.lock().drain(..) {
            let _ = stop.send(());
        }
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn user_media(&self) -> Result<LocalStream, MediaAccessError> {
        if self.deny {
            return Err(MediaAccessError::Denied);
        }
        let n = self.captures.fetch_add(1, Ordering::SeqCst);
        let audio = FakeTrack::new(format!("mic-{n}"), TrackKind::Audio);
        let video = FakeTrack::new(format!("cam-{n}"), TrackKind::Video);
        self.cameras.lock().extend([audio.clone(), video.clone()]);
        Ok(LocalStream::new(
            format!("camera-{n}"),
            vec![audio as TrackHandle, video as TrackHandle],
        ))
    }

    async fn display_media(&self) -> Result<DisplayCapture, MediaAccessError> {
        if self.deny {
            return Err(MediaAccessError::Denied);
        }
        let n = self.captures.fetch_add(1, Ordering::SeqCst);
        let video = FakeTrack::new(format!("screen-{n}"), TrackKind::Video);
        self.screens.lock().push(video.clone());
        let (stop, ended) = oneshot::channel();
        self.display_stops.lock().push(stop);
        Ok(DisplayCapture {
            stream: LocalStream::new(format!("display-{n}"), vec![video as TrackHandle]),
            ended,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AddTrack(String),
    ReplaceTrack(TrackKind, String),
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpKind),
    SetRemote(SdpKind),
    AddCandidate(String),
    Close,
}

/// Records every call and reports `connected` once both descriptions are in
/// place. Applying a local description yields one local candidate; applying
/// a remote one yields one remote video track.
pub struct FakeSession {
    peer: ConnectionId,
    sink: SessionEventSink,
    calls: Mutex<Vec<Call>>,
    senders: Mutex<Vec<(TrackKind, String)>>,
    local_set: AtomicBool,
    remote_set: AtomicBool,
    connected: AtomicBool,
}

impl FakeSession {
    pub fn peer(&self) -> &ConnectionId {
        &self.peer
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    pub fn offers(&self) -> usize {
        self.count(&Call::CreateOffer)
    }

    pub fn answers(&self) -> usize {
        self.count(&Call::CreateAnswer)
    }

    pub fn outgoing(&self, kind: TrackKind) -> Option<String> {
        self.senders
            .lock()
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, id)| id.clone())
    }

    /// Push a notification as the media stack would.
    pub fn emit(&self, event: SessionEvent) {
        self.sink.emit(event);
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn maybe_connect(&self) {
        if self.local_set.load(Ordering::SeqCst)
            && self.remote_set.load(Ordering::SeqCst)
            && !self.connected.swap(true, Ordering::SeqCst)
        {
            self.sink
                .emit(SessionEvent::StateChanged(ConnectivityState::Connecting));
            self.sink
                .emit(SessionEvent::StateChanged(ConnectivityState::Connected));
        }
    }
}

#[async_trait]
impl PeerSession for FakeSession {
    async fn add_track(&self, track: TrackHandle, _stream_id: &str) -> Result<(), NegotiationError> {
        self.record(Call::AddTrack(track.id().to_string()));
        self.senders
            .lock()
            .push((track.kind(), track.id().to_string()));
        Ok(())
    }

    async fn replace_track(
        &self,
        kind: TrackKind,
        track: TrackHandle,
    ) -> Result<bool, NegotiationError> {
        self.record(Call::ReplaceTrack(kind, track.id().to_string()));
        let mut senders = self.senders.lock();
        match senders.iter_mut().find(|(k, _)| *k == kind) {
            Some(sender) => {
                sender.1 = track.id().to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        self.record(Call::CreateOffer);
        Ok(SessionDescription::offer(format!("offer for {}", self.peer)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        self.record(Call::CreateAnswer);
        Ok(SessionDescription::answer(format!("answer for {}", self.peer)))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.record(Call::SetLocal(description.kind));
        self.local_set.store(true, Ordering::SeqCst);
        self.sink.emit(SessionEvent::LocalCandidate(IceCandidate::new(format!(
            "candidate:{}",
            description.sdp
        ))));
        self.maybe_connect();
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.record(Call::SetRemote(description.kind));
        self.remote_set.store(true, Ordering::SeqCst);
        self.sink.emit(SessionEvent::RemoteTrack(RemoteTrack {
            id: format!("remote-video-{}", self.peer),
            kind: TrackKind::Video,
            stream_id: self.peer.to_string(),
        }));
        self.maybe_connect();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        self.record(Call::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn close(&self) {
        self.record(Call::Close);
    }
}

#[derive(Default)]
pub struct FakeFactory {
    sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeFactory {
    pub fn sessions_for(&self, peer: &ConnectionId) -> Vec<Arc<FakeSession>> {
        self.sessions
            .lock()
            .iter()
            .filter(|session| &session.peer == peer)
            .cloned()
            .collect()
    }

    pub fn session_for(&self, peer: &ConnectionId) -> Arc<FakeSession> {
        let mut sessions = self.sessions_for(peer);
        assert_eq!(sessions.len(), 1, "expected exactly one session for {peer}");
        sessions.remove(0)
    }

    pub fn all(&self) -> Vec<Arc<FakeSession>> {
        self.sessions.lock().clone()
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn create(
        &self,
        peer: &ConnectionId,
        events: SessionEventSink,
    ) -> Result<Arc<dyn PeerSession>, NegotiationError> {
        let session = Arc::new(FakeSession {
            peer: peer.clone(),
            sink: events,
            calls: Mutex::new(Vec::new()),
            senders: Mutex::new(Vec::new()),
            local_set: AtomicBool::new(false),
            remote_set: AtomicBool::new(false),
            connected: AtomicBool::new(false),
        });
        self.sessions.lock().push(session.clone());
        Ok(session as Arc<dyn PeerSession>)
    }
}

/// Connects coordinators straight to an in-process relay router.
pub struct LoopbackConnector {
    router: MessageRouter,
}

impl LoopbackConnector {
    pub fn new(router: &MessageRouter) -> Self {
        Self {
            router: router.clone(),
        }
    }
}

#[async_trait]
impl SignalingConnector for LoopbackConnector {
    async fn connect(&self) -> Result<SignalingLink, SignalingError> {
        let (to_client, inbound) = mpsc::unbounded_channel::<ServerEvent>();
        let connection_id = self.router.connect(to_client);
        let (outbound, mut from_client) = mpsc::unbounded_channel::<ClientEvent>();
        let router = self.router.clone();
        tokio::spawn(async move {
            while let Some(event) = from_client.recv().await {
                router.dispatch(&connection_id, event);
            }
            router.disconnect(&connection_id);
        });
        Ok(SignalingLink { outbound, inbound })
    }
}

pub fn relay() -> MessageRouter {
    MessageRouter::new(Arc::new(InMemoryRoomStore::new()))
}

pub struct Client {
    pub handle: CoordinatorHandle,
    pub events: mpsc::UnboundedReceiver<CoordinatorEvent>,
    pub devices: Arc<FakeDevices>,
    pub sessions: Arc<FakeFactory>,
}

impl Client {
    pub async fn start(router: &MessageRouter) -> Self {
        Self::start_with(router, FakeDevices::default()).await
    }

    pub async fn start_with(router: &MessageRouter, devices: FakeDevices) -> Self {
        Self::start_over(Arc::new(LoopbackConnector::new(router)), devices).await
    }

    /// Fake media and sessions, real `signaling`.
    pub async fn start_over(signaling: Arc<dyn SignalingConnector>, devices: FakeDevices) -> Self {
        let devices = Arc::new(devices);
        let sessions = Arc::new(FakeFactory::default());
        let collaborators = Collaborators {
            devices: devices.clone(),
            sessions: sessions.clone(),
            signaling,
        };
        let (handle, events) = Coordinator::spawn(collaborators)
            .await
            .expect("coordinator starts");
        Self {
            handle,
            events,
            devices,
            sessions,
        }
    }

    pub async fn snapshot(&self) -> CoordinatorSnapshot {
        self.handle.snapshot().await.expect("coordinator running")
    }

    /// Poll snapshots until `check` holds.
    pub async fn wait_until(
        &self,
        what: &str,
        check: impl Fn(&CoordinatorSnapshot) -> bool,
    ) -> CoordinatorSnapshot {
        wait_for(&self.handle, what, WAIT, check).await
    }

    pub async fn connection_id(&self) -> ConnectionId {
        self.wait_until("connection id", |s| s.connection_id.is_some())
            .await
            .connection_id
            .expect("connection id present")
    }

    /// Wait until every given peer is linked and connected.
    pub async fn wait_connected_to(&self, peers: &[ConnectionId]) -> CoordinatorSnapshot {
        self.wait_until("connected peers", |s| {
            s.peers.len() == peers.len()
                && peers.iter().all(|id| {
                    s.peers
                        .iter()
                        .any(|p| &p.id == id && p.state == ConnectivityState::Connected)
                })
        })
        .await
    }

    pub async fn next_event(&mut self, check: impl Fn(&CoordinatorEvent) -> bool) -> CoordinatorEvent {
        let wait = async {
            while let Some(event) = self.events.recv().await {
                if check(&event) {
                    return event;
                }
            }
            panic!("event stream closed");
        };
        timeout(WAIT, wait).await.expect("timed out waiting for event")
    }

    /// Whether a matching event is already queued.
    pub fn drain_has(&mut self, check: impl Fn(&CoordinatorEvent) -> bool) -> bool {
        let mut found = false;
        while let Ok(event) = self.events.try_recv() {
            found |= check(&event);
        }
        found
    }
}

/// Poll `handle` snapshots until `check` holds or `limit` passes.
pub async fn wait_for(
    handle: &CoordinatorHandle,
    what: &str,
    limit: Duration,
    check: impl Fn(&CoordinatorSnapshot) -> bool,
) -> CoordinatorSnapshot {
    let snapshot = || async move { handle.snapshot().await.expect("coordinator running") };
    let poll = async {
        loop {
            let current = snapshot().await;
            if check(&current) {
                return current;
            }
            sleep(Duration::from_millis(10)).await;
        }
    };
    match timeout(limit, poll).await {
        Ok(current) => current,
        Err(_) => panic!("timed out waiting for {what}: {:?}", snapshot().await),
    }
}

/// A relay served over real websockets on an ephemeral port.
pub struct RelayServer {
    pub url: String,
    shutdown: Option<oneshot::Sender<()>>,
}

impl RelayServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind relay");
        let addr = listener.local_addr().expect("relay address");
        let state = Arc::new(AppState::in_memory(None));
        let (shutdown, stopped) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = serve(listener, state, async move {
                let _ = stopped.await;
            })
            .await;
        });
        Self {
            url: format!("ws://{addr}/ws"),
            shutdown: Some(shutdown),
        }
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// Poll `check` until it holds.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    let poll = async {
        while !check() {
            sleep(Duration::from_millis(10)).await;
        }
    };
    if timeout(WAIT, poll).await.is_err() {
        panic!("timed out waiting for {what}");
    }
}
