//! HTTP request/response subsystem.
//!
//! # Data Flow
//! ```text
//! axum request (server.rs) or headless options (cli.rs)
//!     → ServerEnvironment
//!     → uri.rs (detect path, strip base path / index file, normalize)
//!     → request.rs (RequestContext: method, headers, params, client info)
//!     → [dispatch]
//!     → response.rs (ResponseEnvelope: status, headers, cookies, body)
//!     → server.rs converts to an axum response, or render() for raw output
//! ```
//!
//! # Design Decisions
//! - Transport types stay at the edge; the core only sees `RequestContext`
//!   and `ResponseEnvelope`
//! - Header names are case-insensitive, values keep insertion order
//! - Status codes are limited to the reason-phrase table in status.rs

pub mod cli;
pub mod headers;
pub mod request;
pub mod response;
pub mod server;
pub mod status;
pub mod uri;

pub use cli::CliOptions;
pub use headers::Headers;
pub use request::{
    CancelHandle, Method, ParamValue, Params, RequestContext, RouteMatch, ServerEnvironment,
};
pub use response::{Cookie, CookieOptions, ResponseEnvelope};
pub use server::{AppState, HttpServer, X_REQUEST_ID};
