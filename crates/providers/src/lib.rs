pub mod openai_compat;
pub mod registry;
pub mod scripted;
pub mod traits;
pub(crate) mod sse;
pub(crate) mod util;

// Re-exports for convenience.
pub use registry::ProviderRegistry;
pub use scripted::{ScriptedProvider, ScriptedTurn};
pub use traits::{ChatRequest, LlmProvider};
