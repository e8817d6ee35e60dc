//! Message shapes for the Huddle signaling channel. The relay and the
//! coordinator both depend on this crate so the JSON contract lives in one
//! place.
//!
//! Every frame is a JSON object `{"type": <kind>, "data": <payload>}`.
//! Negotiation blobs travel as opaque [`serde_json::Value`]s so the relay can
//! forward them untouched; [`negotiation`] holds the typed views the
//! coordinator uses.

mod ids;
mod messages;
pub mod negotiation;

pub use ids::ConnectionId;
pub use messages::{
    decode_client_event, decode_server_event, encode, AnswerRequest, AudioToggle,
    AudioToggleNotice, CandidateRequest, ClientEvent, JoinRoom, OfferRequest, Participant,
    ProtoError, RelayedAnswer, RelayedCandidate, RelayedOffer, ServerEvent, UserData,
    VideoToggle, VideoToggleNotice, Welcome, DEFAULT_DISPLAY_NAME,
};
