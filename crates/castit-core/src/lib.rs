pub mod config;
pub mod error;
pub mod orchestrator;
pub mod platform;
pub mod protocol;
pub mod reaper;
pub mod resolver;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod signal;
