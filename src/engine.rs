//! Client-side synchronization of identifiers and preferences with the operator.
//!
//! The entry point is [`SyncEngine`]. Browser primitives are reached through small
//! capabilities ([`cookies::CookieStore`], [`crate::net::HttpClient`],
//! [`navigator::Navigator`], [`placement::PlacementResolver`]) set on the
//! [`SyncEngineBuilder`].

pub mod cookies;
pub mod endpoints;
pub mod events;
pub mod navigator;
pub mod placement;
pub mod queue;
pub mod status;
pub mod user_agent;

mod engine;
mod proxy;
mod refresh;
mod seed;
mod write;

#[cfg(test)]
mod testing;

pub use engine::Outcome;
pub use engine::RefreshResult;
pub use engine::SyncEngine;
pub use engine::SyncEngineBuilder;

pub use proxy::ProxyClient;

pub use seed::build_audit_log;
pub use seed::SeedEntry;
pub use seed::SeedRegistry;
pub use seed::TransmissionContext;
