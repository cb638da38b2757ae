//! Caching reverse proxy.
//!
//! Forwards requests to an upstream origin and answers the paths covered by
//! cache rules from a shared store.

pub mod commands;
pub mod config;
pub mod health;
pub mod logging;
pub mod origin;
pub mod server;

pub use config::{ConfigError, LogFormat, ProxyConfig, StoreKind, StoreSettings};
pub use origin::Upstream;
pub use server::{AppState, build_router, serve};
