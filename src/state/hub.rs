//! In-process registry of websocket outboxes and per-session rooms.

use dashmap::DashMap;
use indexmap::IndexSet;
use tokio::sync::mpsc;
use tracing::debug;

use crate::dto::ws::ServerMessage;

/// Channel feeding a connection's writer task.
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

/// Registry of live sockets and of the room (session code) each one listens to.
#[derive(Default)]
pub struct ConnectionHub {
    connections: DashMap<String, Outbox>,
    rooms: DashMap<String, IndexSet<String>>,
}

impl ConnectionHub {
    /// Empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the outbound channel of a freshly accepted socket.
    pub fn register(&self, connection_id: &str, outbox: Outbox) {
        self.connections.insert(connection_id.to_owned(), outbox);
    }

    /// Forget a socket and drop it from every room.
    pub fn unregister(&self, connection_id: &str) {
        self.connections.remove(connection_id);
        self.rooms.iter_mut().for_each(|mut room| {
            room.shift_remove(connection_id);
        });
        self.rooms.retain(|_, members| !members.is_empty());
    }

    /// Subscribe a connection to the broadcasts of session `code`.
    pub fn join_room(&self, code: &str, connection_id: &str) {
        self.rooms
            .entry(code.to_owned())
            .or_default()
            .insert(connection_id.to_owned());
    }

    /// Unsubscribe a connection, dropping the room once it is empty.
    pub fn leave_room(&self, code: &str, connection_id: &str) {
        if let Some(mut room) = self.rooms.get_mut(code) {
            room.shift_remove(connection_id);
        }
        self.rooms.remove_if(code, |_, members| members.is_empty());
    }

    /// Drop a room entirely, returning who was in it.
    pub fn close_room(&self, code: &str) -> Vec<String> {
        self.rooms
            .remove(code)
            .map(|(_, members)| members.into_iter().collect())
            .unwrap_or_default()
    }

    /// Connections subscribed to `code`, in join order.
    pub fn room_members(&self, code: &str) -> Vec<String> {
        self.rooms
            .get(code)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Queue a message for one connection. Returns `false` when the socket is gone.
    pub fn send_to(&self, connection_id: &str, message: ServerMessage) -> bool {
        let Some(outbox) = self.connections.get(connection_id).map(|tx| tx.clone()) else {
            debug!(connection_id, "dropping message for unknown connection");
            return false;
        };
        outbox.send(message).is_ok()
    }

    /// Queue a message for every member of the room.
    pub fn broadcast(&self, code: &str, message: ServerMessage) {
        self.broadcast_filtered(code, message, |_| true);
    }

    /// Queue a message for every member of the room except `excluded`.
    pub fn broadcast_except(&self, code: &str, excluded: &str, message: ServerMessage) {
        self.broadcast_filtered(code, message, |member| member != excluded);
    }

    fn broadcast_filtered(&self, code: &str, message: ServerMessage, keep: impl Fn(&str) -> bool) {
        for member in self.room_members(code) {
            if keep(&member) {
                self.send_to(&member, message.clone());
            }
        }
    }
}
