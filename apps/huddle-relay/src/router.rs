use std::sync::Arc;

use dashmap::DashMap;
use huddle_proto::{
    AudioToggleNotice, ClientEvent, ConnectionId, JoinRoom, Participant, RelayedAnswer,
    RelayedCandidate, RelayedOffer, ServerEvent, VideoToggleNotice, Welcome,
};
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::store::{RoomSnapshot, RoomStore};

/// Outbound queue drained by a connection's writer task.
pub type Outbound = mpsc::UnboundedSender<ServerEvent>;

/// Routes signaling events between connections. Membership lives in the
/// injected [`RoomStore`]; the router only keeps the live connection table.
#[derive(Clone)]
pub struct MessageRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    store: Arc<dyn RoomStore>,
    connections: DashMap<ConnectionId, Outbound>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayStats {
    pub rooms: usize,
    pub participants: usize,
    pub connections: usize,
    pub room_list: Vec<RoomSnapshot>,
}

impl MessageRouter {
    pub fn new(store: Arc<dyn RoomStore>) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                store,
                connections: DashMap::new(),
            }),
        }
    }

    /// Register a new connection under a fresh id and greet it with that id.
    pub fn connect(&self, outbound: Outbound) -> ConnectionId {
        let connection_id = ConnectionId::generate();
        self.register(connection_id.clone(), outbound);
        connection_id
    }

    pub fn register(&self, connection_id: ConnectionId, outbound: Outbound) {
        let _ = outbound.send(ServerEvent::Connected(Welcome {
            connection_id: connection_id.clone(),
        }));
        self.inner.connections.insert(connection_id, outbound);
        gauge!(
            "huddle_relay_connections_active",
            self.inner.connections.len() as f64
        );
    }

    /// Drop the connection and run the leave protocol for every room it was in.
    pub fn disconnect(&self, connection_id: &ConnectionId) {
        self.inner.connections.remove(connection_id);
        gauge!(
            "huddle_relay_connections_active",
            self.inner.connections.len() as f64
        );
        self.leave(connection_id);
    }

    pub fn dispatch(&self, sender: &ConnectionId, event: ClientEvent) {
        match event {
            ClientEvent::JoinRoom(join) => self.join(sender, join),
            ClientEvent::Offer(request) => {
                let relayed = ServerEvent::Offer(RelayedOffer {
                    offer: request.offer,
                    sender: sender.clone(),
                });
                self.forward(&request.target, relayed);
            }
            ClientEvent::Answer(request) => {
                let relayed = ServerEvent::Answer(RelayedAnswer {
                    answer: request.answer,
                    sender: sender.clone(),
                });
                self.forward(&request.target, relayed);
            }
            ClientEvent::IceCandidate(request) => {
                let relayed = ServerEvent::IceCandidate(RelayedCandidate {
                    candidate: request.candidate,
                    sender: sender.clone(),
                });
                self.forward(&request.target, relayed);
            }
            ClientEvent::UserToggleAudio(toggle) => {
                let notice = ServerEvent::UserToggleAudio(AudioToggleNotice {
                    user_id: sender.clone(),
                    muted: toggle.muted,
                });
                self.toggle_notify(sender, &toggle.room_id, notice);
            }
            ClientEvent::UserToggleVideo(toggle) => {
                let notice = ServerEvent::UserToggleVideo(VideoToggleNotice {
                    user_id: sender.clone(),
                    video_off: toggle.video_off,
                });
                self.toggle_notify(sender, &toggle.room_id, notice);
            }
        }
    }

    pub fn join(&self, connection_id: &ConnectionId, join: JoinRoom) {
        let room_id = join.room_id.trim();
        if room_id.is_empty() {
            debug!(connection_id = %connection_id, "ignoring join-room without a room id");
            return;
        }

        let participant = Participant::new(connection_id.clone(), join.user_data.display_name());
        let outcome = self.inner.store.join(room_id, participant.clone());
        counter!("huddle_relay_joins_total", 1);
        info!(
            room_id,
            connection_id = %connection_id,
            name = %participant.name,
            members = outcome.roster.len(),
            replaced = outcome.replaced,
            "participant joined room"
        );

        self.send_to(connection_id, ServerEvent::ExistingUsers(outcome.existing));
        for member in &outcome.roster {
            if &member.connection_id != connection_id {
                self.send_to(
                    &member.connection_id,
                    ServerEvent::UserJoined(participant.clone()),
                );
            }
        }
        self.broadcast(&outcome.roster, ServerEvent::RoomUsers(outcome.roster.clone()));
        self.record_room_gauge();
    }

    /// Point-to-point delivery. A target that is not connected is a silent drop.
    pub fn forward(&self, target: &ConnectionId, event: ServerEvent) -> bool {
        let kind = event.kind();
        let delivered = !target.is_blank() && self.send_to(target, event);
        if delivered {
            counter!("huddle_relay_forwarded_total", 1, "kind" => kind);
        } else {
            counter!("huddle_relay_dropped_total", 1, "kind" => kind);
            debug!(target_id = %target, kind, "dropping message for unknown target");
        }
        delivered
    }

    /// Send a toggle notice to every room member except the sender.
    pub fn toggle_notify(&self, sender: &ConnectionId, room_id: &str, notice: ServerEvent) {
        let room_id = room_id.trim();
        if !self.inner.store.is_member(room_id, sender) {
            debug!(
                room_id,
                connection_id = %sender,
                kind = notice.kind(),
                "ignoring toggle from non-member"
            );
            return;
        }
        for member in self.inner.store.roster(room_id) {
            if &member.connection_id != sender {
                self.send_to(&member.connection_id, notice.clone());
            }
        }
    }

    pub fn leave(&self, connection_id: &ConnectionId) {
        for departure in self.inner.store.leave(connection_id) {
            info!(
                room_id = %departure.room_id,
                connection_id = %connection_id,
                remaining = departure.remaining.len(),
                "participant left room"
            );
            self.broadcast(
                &departure.remaining,
                ServerEvent::UserLeft(connection_id.clone()),
            );
            if !departure.remaining.is_empty() {
                self.broadcast(
                    &departure.remaining,
                    ServerEvent::RoomUsers(departure.remaining.clone()),
                );
            }
        }
        self.record_room_gauge();
    }

    pub fn stats(&self) -> RelayStats {
        let room_list = self.inner.store.snapshot();
        RelayStats {
            rooms: room_list.len(),
            participants: room_list.iter().map(|room| room.participants).sum(),
            connections: self.inner.connections.len(),
            room_list,
        }
    }

    fn broadcast(&self, members: &[Participant], event: ServerEvent) {
        for member in members {
            self.send_to(&member.connection_id, event.clone());
        }
    }

    fn send_to(&self, connection_id: &ConnectionId, event: ServerEvent) -> bool {
        match self.inner.connections.get(connection_id) {
            Some(outbound) => outbound.send(event).is_ok(),
            None => false,
        }
    }

    fn record_room_gauge(&self) {
        gauge!(
            "huddle_relay_rooms_active",
            self.inner.store.snapshot().len() as f64
        );
    }
}
