//! Shared domain types for the Brandkit agent gateway.
//!
//! Everything that more than one crate needs to agree on lives here:
//! configuration, the shared error type, role resolution, persisted
//! records, and the provider-agnostic LLM message/stream types.

pub mod config;
pub mod error;
pub mod record;
pub mod role;
pub mod stream;
pub mod tool;
pub mod trace;
