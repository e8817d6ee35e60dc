use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::ConnectionId;

/// Name used when a participant joins without one.
pub const DEFAULT_DISPLAY_NAME: &str = "Anonymous";

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("invalid signaling frame: {0}")]
    InvalidFrame(#[from] serde_json::Error),
}

/// A room member as seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub connection_id: ConnectionId,
    pub name: String,
}

impl Participant {
    pub fn new(connection_id: ConnectionId, name: impl Into<String>) -> Self {
        Self {
            connection_id,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl UserData {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    /// Trimmed name, falling back to [`DEFAULT_DISPLAY_NAME`] when blank.
    pub fn display_name(&self) -> String {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_DISPLAY_NAME)
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    pub room_id: String,
    #[serde(default)]
    pub user_data: UserData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferRequest {
    pub offer: Value,
    pub target: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub answer: Value,
    pub target: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRequest {
    pub candidate: Value,
    pub target: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioToggle {
    pub room_id: String,
    pub muted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoToggle {
    pub room_id: String,
    pub video_off: bool,
}

/// Messages sent from a coordinator to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinRoom(JoinRoom),
    Offer(OfferRequest),
    Answer(AnswerRequest),
    IceCandidate(CandidateRequest),
    UserToggleAudio(AudioToggle),
    UserToggleVideo(VideoToggle),
}

impl ClientEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom(_) => "join-room",
            ClientEvent::Offer(_) => "offer",
            ClientEvent::Answer(_) => "answer",
            ClientEvent::IceCandidate(_) => "ice-candidate",
            ClientEvent::UserToggleAudio(_) => "user-toggle-audio",
            ClientEvent::UserToggleVideo(_) => "user-toggle-video",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    pub connection_id: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayedOffer {
    pub offer: Value,
    pub sender: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayedAnswer {
    pub answer: Value,
    pub sender: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayedCandidate {
    pub candidate: Value,
    pub sender: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioToggleNotice {
    pub user_id: ConnectionId,
    pub muted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoToggleNotice {
    pub user_id: ConnectionId,
    pub video_off: bool,
}

/// Messages sent from the relay to a coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Greeting carrying the id the relay assigned to this connection.
    Connected(Welcome),
    /// Roster at join time, excluding the joiner.
    ExistingUsers(Vec<Participant>),
    UserJoined(Participant),
    /// Full roster, joiner included.
    RoomUsers(Vec<Participant>),
    UserLeft(ConnectionId),
    Offer(RelayedOffer),
    Answer(RelayedAnswer),
    IceCandidate(RelayedCandidate),
    UserToggleAudio(AudioToggleNotice),
    UserToggleVideo(VideoToggleNotice),
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Connected(_) => "connected",
            ServerEvent::ExistingUsers(_) => "existing-users",
            ServerEvent::UserJoined(_) => "user-joined",
            ServerEvent::RoomUsers(_) => "room-users",
            ServerEvent::UserLeft(_) => "user-left",
            ServerEvent::Offer(_) => "offer",
            ServerEvent::Answer(_) => "answer",
            ServerEvent::IceCandidate(_) => "ice-candidate",
            ServerEvent::UserToggleAudio(_) => "user-toggle-audio",
            ServerEvent::UserToggleVideo(_) => "user-toggle-video",
        }
    }
}

pub fn encode<T: Serialize>(event: &T) -> Result<String, ProtoError> {
    Ok(serde_json::to_string(event)?)
}

pub fn decode_client_event(text: &str) -> Result<ClientEvent, ProtoError> {
    Ok(serde_json::from_str(text)?)
}

pub fn decode_server_event(text: &str) -> Result<ServerEvent, ProtoError> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_room_uses_camel_case_fields() {
        let event = decode_client_event(
            r#"{"type":"join-room","data":{"roomId":"r1","userData":{"name":"Ada"}}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::JoinRoom(JoinRoom {
                room_id: "r1".into(),
                user_data: UserData::named("Ada"),
            })
        );
    }

    #[test]
    fn missing_user_data_defaults_to_anonymous() {
        let event = decode_client_event(r#"{"type":"join-room","data":{"roomId":"r1"}}"#).unwrap();
        let ClientEvent::JoinRoom(join) = event else {
            panic!("expected join-room");
        };
        assert_eq!(join.user_data.display_name(), DEFAULT_DISPLAY_NAME);
        assert_eq!(UserData::named("   ").display_name(), DEFAULT_DISPLAY_NAME);
        assert_eq!(UserData::named(" Bo ").display_name(), "Bo");
    }

    #[test]
    fn relayed_messages_match_wire_shapes() {
        let left = ServerEvent::UserLeft(ConnectionId::from("b"));
        assert_eq!(
            serde_json::to_value(&left).unwrap(),
            json!({"type": "user-left", "data": "b"})
        );

        let notice = ServerEvent::UserToggleVideo(VideoToggleNotice {
            user_id: ConnectionId::from("a"),
            video_off: true,
        });
        assert_eq!(
            serde_json::to_value(&notice).unwrap(),
            json!({"type": "user-toggle-video", "data": {"userId": "a", "videoOff": true}})
        );

        let roster = ServerEvent::ExistingUsers(vec![Participant::new("a".into(), "Ada")]);
        assert_eq!(
            serde_json::to_value(&roster).unwrap(),
            json!({"type": "existing-users", "data": [{"connectionId": "a", "name": "Ada"}]})
        );
    }

    #[test]
    fn candidate_payload_stays_opaque() {
        let raw = r#"{"type":"ice-candidate","data":{"candidate":{"anything":[1,2]},"target":"x"}}"#;
        let ClientEvent::IceCandidate(request) = decode_client_event(raw).unwrap() else {
            panic!("expected ice-candidate");
        };
        assert_eq!(request.candidate, json!({"anything": [1, 2]}));
        assert_eq!(request.target.as_str(), "x");
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(decode_client_event(r#"{"type":"room-full","data":null}"#).is_err());
        assert!(decode_server_event("not json").is_err());
    }
}
