//! HMVC request routing and dispatch.
//!
//! Route templates compile to anchored patterns; requests are matched
//! first-match-wins, resolved to controllers and run through
//! before → action → after, with nested (HMVC) sub-requests sharing the
//! same table.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;

pub use config::schema::AppConfig;
pub use dispatch::{Controller, ControllerRegistry, Dispatcher, Exchange};
pub use error::{DispatchError, DispatchFailure, ErrorKind, HandlerResult};
pub use http::{HttpServer, RequestContext, ResponseEnvelope};
pub use lifecycle::Shutdown;
pub use routing::{Route, RouteParams, RouteTable};
