use thiserror::Error;

/// Local capture could not be acquired. Fatal to a join.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaAccessError {
    #[error("capture permission denied")]
    Denied,
    #[error("no {0} device available")]
    NotFound(String),
    #[error("capture failed: {0}")]
    Capture(String),
}

/// A step of the offer/answer/candidate exchange failed for one peer.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("webrtc: {0}")]
    Rtc(#[from] webrtc::Error),
    #[error("malformed negotiation blob: {0}")]
    Blob(#[from] serde_json::Error),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("peer session error: {0}")]
    Session(String),
}

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("invalid signaling url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("signaling url must use ws or wss, got {0}")]
    UnsupportedScheme(String),
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("signaling channel closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("already in room {0}; hang up first")]
    AlreadyInRoom(String),
    #[error("room id must not be empty")]
    InvalidRoom,
    #[error("not in a room")]
    NotInRoom,
    #[error(transparent)]
    MediaAccess(#[from] MediaAccessError),
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error(transparent)]
    Signaling(#[from] SignalingError),
    #[error("coordinator stopped")]
    Stopped,
}
