//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Compilation (at startup):
//!     RouteConfig[] / programmatic registration
//!     → pattern.rs (parse template, compile anchored regex)
//!     → table.rs (ordered, named registry)
//!     → optionally persisted through cache.rs
//!
//! Incoming URI (normalized path)
//!     → table.rs (iterate in registration order)
//!     → pattern.rs (regex match, fill defaults)
//!     → Return: first matching route + params, or NoMatch
//! ```
//!
//! # Design Decisions
//! - Routes compiled once, immutable afterwards
//! - First match wins (registration order, not specificity)
//! - No-match is a value, not an error
//! - Deterministic compilation so cached tables rebuild identically

pub mod cache;
pub mod pattern;
pub mod table;

use thiserror::Error;

pub use cache::{CacheError, FileCache, MemoryCache, RouteCache, ROUTE_CACHE_KEY};
pub use pattern::{Route, RouteParams, DEFAULT_ACTION, DEFAULT_SEGMENT};
pub use table::{RouteEntry, RouteTable};

/// Errors raised while building or reversing routes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// Template could not be parsed or compiled.
    #[error("invalid route template '{template}': {reason}")]
    InvalidPattern { template: String, reason: String },

    /// Reverse routing lacked a value for a required key.
    #[error("required route parameter not passed: {key}")]
    MissingParameter { key: String },

    /// No route registered under this name.
    #[error("the requested route does not exist: {0}")]
    NotFound(String),
}
