//! The offline write queue.
//!
//! User-authored records (mood check-ins, journal entries, crisis
//! interactions, safety-plan edits) land here first, unconditionally, and are
//! drained to the server by the sync coordinator once connectivity allows.
//! An append never depends on the network; that is the platform's core
//! offline-first guarantee.

mod record;
mod store;

pub use record::{EntityType, OutboxRecord};
pub use store::{MemoryOutboxStore, OutboxStore, SqliteOutboxStore};
