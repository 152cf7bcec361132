//! Collaborator interfaces the agent gateway consumes: the relational
//! store (directory, brands, chat transcript, credit ledger) and the async
//! job queue, plus in-memory implementations of both.

pub mod jobs;
pub mod memory;
pub mod seed;
pub mod traits;

pub use jobs::{InMemoryJobQueue, JobQueue, QueuedJob};
pub use memory::InMemoryStore;
pub use seed::{SeedCredit, SeedData};
pub use traits::{Brands, Chat, Credits, Directory, Store};
