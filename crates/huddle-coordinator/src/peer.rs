//! Per-peer state held by the coordinator.

use std::sync::Arc;

use huddle_proto::ConnectionId;

use crate::media::{ConnectivityState, PeerSession, RemoteTrack};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    /// Sends the offer. Taken by the member that hears about a newcomer.
    Initiator,
    /// Waits for an offer and answers it.
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStep {
    Offering,
    AwaitingOffer,
    AwaitingAnswer,
    /// Both descriptions applied; waiting on connectivity.
    Exchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Negotiating {
        role: NegotiationRole,
        step: NegotiationStep,
    },
    Connected,
    /// Holds `Disconnected` or `Failed`. Links are never renegotiated from here.
    Interrupted(ConnectivityState),
    Closed,
}

/// Badges a remote participant broadcast about its own media.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteBadges {
    pub muted: bool,
    pub video_off: bool,
}

/// Read-only view of a link handed out in snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSummary {
    pub id: ConnectionId,
    pub name: String,
    pub state: ConnectivityState,
    pub phase: LinkPhase,
    pub badges: RemoteBadges,
    pub remote_tracks: Vec<RemoteTrack>,
}

pub struct PeerLink {
    id: ConnectionId,
    name: String,
    session: Arc<dyn PeerSession>,
    generation: u64,
    remote_tracks: Vec<RemoteTrack>,
    state: ConnectivityState,
    phase: LinkPhase,
    badges: RemoteBadges,
}

impl PeerLink {
    pub(crate) fn new(
        id: ConnectionId,
        name: String,
        session: Arc<dyn PeerSession>,
        generation: u64,
        role: NegotiationRole,
    ) -> Self {
        let step = match role {
            NegotiationRole::Initiator => NegotiationStep::Offering,
            NegotiationRole::Responder => NegotiationStep::AwaitingOffer,
        };
        Self {
            id,
            name,
            session,
            generation,
            remote_tracks: Vec::new(),
            state: ConnectivityState::New,
            phase: LinkPhase::Negotiating { role, step },
            badges: RemoteBadges::default(),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn rename(&mut self, name: &str) {
        if self.name != name {
            self.name = name.to_string();
        }
    }

    pub fn session(&self) -> Arc<dyn PeerSession> {
        self.session.clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    pub fn phase(&self) -> LinkPhase {
        self.phase
    }

    pub fn badges(&self) -> RemoteBadges {
        self.badges
    }

    pub fn remote_tracks(&self) -> &[RemoteTrack] {
        &self.remote_tracks
    }

    /// Label shown next to the peer's video tile.
    pub fn status_label(&self) -> &'static str {
        status_label(self.state)
    }

    pub(crate) fn set_muted(&mut self, muted: bool) {
        self.badges.muted = muted;
    }

    pub(crate) fn set_video_off(&mut self, video_off: bool) {
        self.badges.video_off = video_off;
    }

    pub(crate) fn attach_remote(&mut self, track: RemoteTrack) {
        if let Some(existing) = self.remote_tracks.iter_mut().find(|t| t.id == track.id) {
            *existing = track;
        } else {
            self.remote_tracks.push(track);
        }
    }

    pub(crate) fn offer_sent(&mut self) {
        self.advance(NegotiationRole::Initiator, NegotiationStep::AwaitingAnswer);
    }

    pub(crate) fn answer_sent(&mut self) {
        self.advance(NegotiationRole::Responder, NegotiationStep::Exchanged);
    }

    pub(crate) fn answer_applied(&mut self) {
        self.advance(NegotiationRole::Initiator, NegotiationStep::Exchanged);
    }

    // Connectivity reports outrank negotiation bookkeeping.
    fn advance(&mut self, role: NegotiationRole, step: NegotiationStep) {
        if matches!(self.phase, LinkPhase::Negotiating { .. }) {
            self.phase = LinkPhase::Negotiating { role, step };
        }
    }

    /// Mirror a connectivity report. Returns `false` when nothing changed.
    pub(crate) fn apply_state(&mut self, state: ConnectivityState) -> bool {
        if self.state == state {
            return false;
        }
        self.state = state;
        self.phase = match state {
            ConnectivityState::Connected => LinkPhase::Connected,
            ConnectivityState::Disconnected | ConnectivityState::Failed => {
                LinkPhase::Interrupted(state)
            }
            ConnectivityState::Closed => LinkPhase::Closed,
            ConnectivityState::New | ConnectivityState::Connecting => self.phase,
        };
        true
    }

    pub fn summary(&self) -> PeerSummary {
        PeerSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            state: self.state,
            phase: self.phase,
            badges: self.badges,
            remote_tracks: self.remote_tracks.clone(),
        }
    }

    /// Close the session. The link and its remote tracks go with it.
    pub(crate) async fn close(self) {
        self.session.close().await;
    }
}

pub fn status_label(state: ConnectivityState) -> &'static str {
    match state {
        ConnectivityState::Connected => "Connected",
        ConnectivityState::Disconnected | ConnectivityState::Failed => "Disconnected",
        _ => "Connecting...",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NegotiationError;
    use crate::media::{TrackHandle, TrackKind};
    use async_trait::async_trait;
    use huddle_proto::negotiation::{IceCandidate, SessionDescription};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct NullSession {
        closed: AtomicBool,
    }

    #[async_trait]
    impl PeerSession for NullSession {
        async fn add_track(&self, _: TrackHandle, _: &str) -> Result<(), NegotiationError> {
            Ok(())
        }
        async fn replace_track(&self, _: TrackKind, _: TrackHandle) -> Result<bool, NegotiationError> {
            Ok(false)
        }
        async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
            Ok(SessionDescription::offer(""))
        }
        async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
            Ok(SessionDescription::answer(""))
        }
        async fn set_local_description(&self, _: SessionDescription) -> Result<(), NegotiationError> {
            Ok(())
        }
        async fn set_remote_description(&self, _: SessionDescription) -> Result<(), NegotiationError> {
            Ok(())
        }
        async fn add_ice_candidate(&self, _: IceCandidate) -> Result<(), NegotiationError> {
            Ok(())
        }
        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn link(role: NegotiationRole) -> (PeerLink, Arc<NullSession>) {
        let session = Arc::new(NullSession::default());
        let link = PeerLink::new(ConnectionId::from("b"), "Bo".into(), session.clone(), 1, role);
        (link, session)
    }

    #[test]
    fn initiator_walks_offer_then_answer() {
        let (mut link, _) = link(NegotiationRole::Initiator);
        assert_eq!(
            link.phase(),
            LinkPhase::Negotiating {
                role: NegotiationRole::Initiator,
                step: NegotiationStep::Offering
            }
        );
        link.offer_sent();
        link.answer_applied();
        assert_eq!(
            link.phase(),
            LinkPhase::Negotiating {
                role: NegotiationRole::Initiator,
                step: NegotiationStep::Exchanged
            }
        );
        assert!(link.apply_state(ConnectivityState::Connected));
        assert_eq!(link.phase(), LinkPhase::Connected);
        assert_eq!(link.status_label(), "Connected");
    }

    #[test]
    fn failure_interrupts_without_renegotiating() {
        let (mut link, _) = link(NegotiationRole::Responder);
        link.answer_sent();
        link.apply_state(ConnectivityState::Connected);
        link.apply_state(ConnectivityState::Failed);
        assert_eq!(link.phase(), LinkPhase::Interrupted(ConnectivityState::Failed));
        assert_eq!(link.status_label(), "Disconnected");

        // Late bookkeeping does not pull the link back into negotiation.
        link.answer_sent();
        assert_eq!(link.phase(), LinkPhase::Interrupted(ConnectivityState::Failed));
        assert!(!link.apply_state(ConnectivityState::Failed));
    }

    #[test]
    fn labels_cover_every_state() {
        assert_eq!(status_label(ConnectivityState::New), "Connecting...");
        assert_eq!(status_label(ConnectivityState::Connecting), "Connecting...");
        assert_eq!(status_label(ConnectivityState::Disconnected), "Disconnected");
        assert_eq!(status_label(ConnectivityState::Closed), "Connecting...");
    }

    #[test]
    fn remote_tracks_are_keyed_by_id() {
        let (mut link, _) = link(NegotiationRole::Responder);
        let track = RemoteTrack {
            id: "t1".into(),
            kind: TrackKind::Video,
            stream_id: "s".into(),
        };
        link.attach_remote(track.clone());
        link.attach_remote(track);
        assert_eq!(link.remote_tracks().len(), 1);
    }

    #[tokio::test]
    async fn close_releases_session() {
        let (mut link, session) = link(NegotiationRole::Initiator);
        link.attach_remote(RemoteTrack {
            id: "t1".into(),
            kind: TrackKind::Audio,
            stream_id: "s".into(),
        });
        link.close().await;
        assert!(session.closed.load(Ordering::SeqCst));
    }
}
