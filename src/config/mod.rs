//! Configuration subsystem.
//!
//! # Data Flow
//! ```text
//! router.toml
//!     → loader.rs (read + deserialize into AppConfig)
//!     → validation.rs (collect every semantic error, compile routes)
//!     → main.rs builds RouteTable + Dispatcher
//!
//! On file change:
//!     watcher.rs (notify) → loader.rs → validation.rs
//!     → mpsc channel → http::server swaps the RouteTable
//! ```
//!
//! # Design Decisions
//! - Every field has a default; an empty file is a valid config
//! - Route order in the file is match priority
//! - Only routes are hot-reloaded; application settings need a restart

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AppConfig, ApplicationConfig, CacheBackend, CacheConfig, ExternalConfig, ListenerConfig,
    ObservabilityConfig, RouteConfig,
};
