//! Private per-user rooms.
//!
//! Every connection joins the room of the user it authenticated as. Run
//! events are broadcast to that room only, so other tabs of the same user
//! stay in sync and no other user ever sees them.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::runtime::ConnectionId;

use super::frames::ServerEvent;

/// Outbound frame queue of one connection.
pub type Outbox = mpsc::UnboundedSender<String>;

#[derive(Default)]
pub struct RoomHub {
    rooms: RwLock<HashMap<String, HashMap<ConnectionId, Outbox>>>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, user_id: &str, connection: ConnectionId, outbox: Outbox) {
        self.rooms
            .write()
            .entry(user_id.to_owned())
            .or_default()
            .insert(connection, outbox);
    }

    pub fn leave(&self, user_id: &str, connection: ConnectionId) {
        let mut rooms = self.rooms.write();
        if let Some(room) = rooms.get_mut(user_id) {
            room.remove(&connection);
            if room.is_empty() {
                rooms.remove(user_id);
            }
        }
    }

    /// Send `event` to every connection in the user's room. Returns how many
    /// connections it reached.
    pub fn emit(&self, user_id: &str, event: &ServerEvent) -> usize {
        let frame = event.to_frame();
        let rooms = self.rooms.read();
        let Some(room) = rooms.get(user_id) else {
            return 0;
        };
        room.values().filter(|tx| tx.send(frame.clone()).is_ok()).count()
    }

    pub fn connections(&self, user_id: &str) -> usize {
        self.rooms.read().get(user_id).map_or(0, HashMap::len)
    }
}
