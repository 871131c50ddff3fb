//! Serial and TCP communication toolkit for W12 LED display panels.
//!
//! displink drives a display over one of two interchangeable links and keeps
//! that link healthy: background reading, bounded send retries, transparent
//! reconnection and transfer statistics.
//!
//! # Crate Structure
//!
//! - [`transport`] - Serial and TCP/TLS transports behind one trait
//! - [`frame`] - The 22-byte W12 display-update frame
//! - [`manager`] - Single active link with health checks and reconnection (behind `manager` feature)

/// Re-export transport types.
pub mod transport {
    pub use displink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use displink_frame::*;
}

/// Re-export manager types (requires `manager` feature).
#[cfg(feature = "manager")]
pub mod manager {
    pub use displink_manager::*;
}
