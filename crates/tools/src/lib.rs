//! The capability registry: every tool the assistant can call, the
//! role-based filter that decides which of them a session sees, and the
//! confirmation and credit interlocks the mutating tools share.

pub mod account;
pub mod authz;
pub mod descriptor;
pub mod filter;
pub mod generation;
pub mod organization;
pub mod outcome;
pub mod platform;
pub mod record;
pub mod registry;

pub(crate) mod args;
#[cfg(test)]
pub(crate) mod testutil;

pub use descriptor::{SessionContext, ToolCategory, ToolDescriptor, ToolHandler, ToolServices};
pub use filter::{allowed_categories, filter};
pub use outcome::{RecordMutation, ToolFailure, ToolFault, ToolOutcome};
pub use registry::{build_registry, ToolSet};
