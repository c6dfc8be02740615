//! Offline resilience engine for the Haven support platform.
//!
//! Crisis resources and user-entered wellness data must stay available and
//! durable with no network connectivity. This crate is the part of the
//! platform that makes that true:
//! - intercepted reads are served from tiered, versioned caches under
//!   per-route consistency policies ([`cache`])
//! - user-authored records always land in a durable local outbox first
//!   ([`outbox`]) and are reconciled with the server once connectivity
//!   returns ([`sync`])
//! - inbound notification payloads are interpreted and their actions routed
//!   back into the outbox or into navigation ([`notify`])
//!
//! The hosting application constructs one [`OfflineEngine`] with its
//! storage, network, and presentation collaborators and wires it to its
//! interception boundary, connectivity signals, and control channel.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod http;
pub mod logging;
pub mod notify;
pub mod outbox;
pub mod sync;
pub mod tasks;

#[cfg(test)]
mod testing;

pub use config::EngineConfig;
pub use engine::{ControlAck, ControlMessage, EnginePhase, OfflineEngine};
pub use error::{EngineError, Result};
pub use event::{EngineEvent, EngineEvents};
