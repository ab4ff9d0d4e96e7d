// Library interface for weft
// The binary and the integration tests both go through these modules

pub mod cache;
pub mod cli;
pub mod cli_utils;
pub mod commands;
pub mod config;
pub mod config_discovery;
pub mod engine;
pub mod error;
pub mod http;
pub mod logging;
pub mod planner;
pub mod registry;
pub mod resource;
pub mod state;
pub mod workspace;

// Re-export commonly used types
pub use cache::{CacheEntry, OutputCache};
pub use config::WeftConfig;
pub use engine::{Engine, RunMode, RunOptions, RunRecord, RunReport, RunState, StreamChunk};
pub use error::{ErrorPayload, Result, WeftError};
pub use registry::Registry;
pub use resource::MetadataObject;
pub use workspace::Workspace;
