//! Dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! RequestContext
//!     → dispatcher.rs
//!         external target → external.rs (outbound HTTP, no retry)
//!         internal target → RouteTable snapshot (first match wins)
//!             → bind route params on the request
//!             → controller.rs (resolve (directory, controller) → Controller)
//!             → before → action(args) → after
//!     → ResponseEnvelope, or DispatchFailure (status set, headers flushed)
//!
//! Nested dispatch (Exchange::sub_request):
//!     same dispatcher and context stack, frame popped on completion
//! ```
//!
//! # Design Decisions
//! - Controllers are capability objects resolved through an injected
//!   resolver, never discovered at runtime
//! - `controller`, `action` and `directory` are consumed by resolution and
//!   not passed to the action
//! - Cancellation is cooperative and checked between lifecycle steps

pub mod controller;
pub mod dispatcher;
pub mod external;

pub use controller::{Controller, ControllerFactory, ControllerRegistry, ControllerResolver};
pub use dispatcher::{
    ContextStack, Dispatcher, Exchange, HeaderSink, StackFrame, TracingHeaderSink, RESERVED_PARAMS,
};
pub use external::{ExternalClient, ExternalError, HttpExternalClient};
