//! Real-time chat channel: wire frames, per-user rooms and the
//! per-connection session handler.

pub mod frames;
pub mod handler;
pub mod rooms;

pub use frames::{ErrorCode, ServerEvent};
pub use handler::ChannelSession;
pub use rooms::RoomHub;
