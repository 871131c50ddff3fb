//! Connection management for displink.
//!
//! This is the "just works" layer. [`ConnectionManager`] owns the single
//! active transport, watches it with a periodic health check, reconnects it
//! after a loss and fans connection events out to listeners.

pub mod config;
pub mod listeners;
pub mod manager;

pub use config::ManagerConfig;
pub use listeners::{DataListener, EventListener, ListenerId};
pub use manager::ConnectionManager;
