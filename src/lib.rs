pub mod config;
pub mod contact_cache;
pub mod credentials;
pub mod decoder;
pub mod error;
pub mod logging;
pub mod manager;
pub mod media;
pub mod session;
pub mod storage;
pub mod types;
pub mod webhook;

// Internal wiring: the per-instance event loop and the message pipeline are
// driven exclusively through the InstanceManager.
mod connection;
mod history;
mod pipeline;
