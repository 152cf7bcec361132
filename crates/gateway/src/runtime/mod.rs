//! Agent runtime: prompt assembly, the bounded turn loop, lifecycle hooks
//! and run cancellation.

pub mod cancel;
pub mod hooks;
pub mod prompt;
pub mod runner;

pub use cancel::{CancelToken, ConnectionId, RunRegistry, RunSlot, SessionBusy};
pub use hooks::{EndReason, HookDecision, HookEvent, LifecycleHooks, RelayHooks};
pub use runner::{spawn_run, RunCaps, RunEvent, RunInput, StopReason};
