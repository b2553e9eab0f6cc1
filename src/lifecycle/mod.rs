//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Restore routes from cache
//!     (miss: build from config, save to cache) → Build dispatcher
//!     → Start listener
//!
//! Shutdown (shutdown.rs):
//!     Ctrl+C received → broadcast → server stops accepting
//!     → route reload task exits
//! ```
//!
//! # Design Decisions
//! - One broadcast channel; every long-running task subscribes
//! - Triggering twice is harmless

pub mod shutdown;

pub use shutdown::Shutdown;
