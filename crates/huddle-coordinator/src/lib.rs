//! Client side of a Huddle call.
//!
//! A [`Coordinator`] joins one room at a time, keeps exactly one
//! [`PeerLink`] per remote participant and drives each link's offer/answer
//! exchange over the relay. Media capture and peer sessions come from the
//! collaborators in [`media`]; [`rtc`] provides the webrtc-rs ones.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod media;
pub mod peer;
pub mod rtc;
pub mod signaling;

pub use config::CoordinatorConfig;
pub use coordinator::{
    Collaborators, Coordinator, CoordinatorEvent, CoordinatorHandle, CoordinatorSnapshot,
    PreviewSource,
};
pub use error::{CoordinatorError, MediaAccessError, NegotiationError, SignalingError};
pub use media::{
    ConnectivityState, DisplayCapture, LocalStream, MediaDevices, MediaTrack, PeerSession,
    RemoteTrack, SessionEvent, SessionEventSink, SessionFactory, TrackHandle, TrackKind,
};
pub use peer::{LinkPhase, NegotiationRole, NegotiationStep, PeerLink, PeerSummary, RemoteBadges};
pub use signaling::{SignalingConnector, SignalingLink, WsConnector};
