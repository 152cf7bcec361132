//! Brandkit agent gateway: the websocket chat channel, the agent runtime
//! that drives each turn, identity verification and the HTTP surface.

pub mod api;
pub mod bootstrap;
pub mod channel;
pub mod cli;
pub mod runtime;
pub mod state;
