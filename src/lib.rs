pub mod config;
pub mod engine;
pub mod errors;
pub mod model;
pub mod net;

pub use config::EngineConfig;
pub use engine::*;
pub use errors::SyncError;
