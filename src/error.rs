//! Dispatch error taxonomy.
//!
//! Every failure the request lifecycle can report is a [`DispatchError`];
//! [`ErrorKind`] gives the classification and the status code the HTTP
//! boundary maps it to. A route failing to match is not an error at this
//! level, only the whole table failing to match is.

use thiserror::Error;

use crate::dispatch::external::ExternalError;
use crate::http::response::ResponseEnvelope;
use crate::routing::RouteError;

/// Boxed error returned by controller hooks and actions.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for controller hooks and actions.
pub type HandlerResult = Result<(), HandlerError>;

/// Classification of a [`DispatchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RouteNotFound,
    HandlerNotFound,
    HandlerExecution,
    MissingRouteParameter,
    InvalidRoute,
    InvalidStatus,
    ExternalRequest,
    UriDetection,
    ParamsLocked,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RouteNotFound => "route_not_found",
            Self::HandlerNotFound => "handler_not_found",
            Self::HandlerExecution => "handler_execution",
            Self::MissingRouteParameter => "missing_route_parameter",
            Self::InvalidRoute => "invalid_route",
            Self::InvalidStatus => "invalid_status",
            Self::ExternalRequest => "external_request",
            Self::UriDetection => "uri_detection",
            Self::ParamsLocked => "params_locked",
            Self::Cancelled => "cancelled",
        }
    }

    /// Status code the HTTP boundary reports for this kind.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::RouteNotFound | Self::HandlerNotFound => 404,
            Self::ExternalRequest => 502,
            Self::Cancelled => 499,
            Self::HandlerExecution
            | Self::MissingRouteParameter
            | Self::InvalidRoute
            | Self::InvalidStatus
            | Self::UriDetection
            | Self::ParamsLocked => 500,
        }
    }
}

/// Errors produced while building, routing or executing a request.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No registered route matched the URI.
    #[error("unable to find a route to match the URI: {uri}")]
    RouteNotFound { uri: String },

    /// The matched controller or action cannot be resolved.
    #[error("{0}")]
    HandlerNotFound(String),

    /// A before/action/after step failed.
    #[error("handler execution failed: {0}")]
    HandlerExecution(#[source] HandlerError),

    /// Route building or lookup failed.
    #[error(transparent)]
    Route(#[from] RouteError),

    /// Status code outside the reason-phrase table.
    #[error("unknown HTTP status code: {0}")]
    InvalidStatus(u16),

    /// Delegation to an external target failed.
    #[error(transparent)]
    External(#[from] ExternalError),

    /// No transport signal identified the request path.
    #[error("unable to detect the URI using PATH_INFO, REQUEST_URI, SCRIPT_NAME or REDIRECT_URL")]
    UriDetection,

    /// Route parameters were already bound for this request.
    #[error("route parameters cannot be changed once matched")]
    ParamsLocked,

    /// The request was cancelled between lifecycle steps.
    #[error("request cancelled before {stage}")]
    Cancelled { stage: &'static str },
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RouteNotFound { .. } => ErrorKind::RouteNotFound,
            Self::HandlerNotFound(_) => ErrorKind::HandlerNotFound,
            Self::HandlerExecution(_) => ErrorKind::HandlerExecution,
            Self::Route(RouteError::MissingParameter { .. }) => ErrorKind::MissingRouteParameter,
            Self::Route(RouteError::NotFound(_)) => ErrorKind::RouteNotFound,
            Self::Route(RouteError::InvalidPattern { .. }) => ErrorKind::InvalidRoute,
            Self::InvalidStatus(_) => ErrorKind::InvalidStatus,
            Self::External(_) => ErrorKind::ExternalRequest,
            Self::UriDetection => ErrorKind::UriDetection,
            Self::ParamsLocked => ErrorKind::ParamsLocked,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Classify an error raised by a controller step.
    ///
    /// A resolution failure bubbling up from a nested dispatch keeps its
    /// not-found classification; anything else is an execution error.
    pub fn from_handler(error: HandlerError) -> Self {
        let nested = match error.downcast::<DispatchFailure>() {
            Ok(failure) => Ok(failure.error),
            Err(other) => other.downcast::<DispatchError>().map(|inner| *inner),
        };
        match nested {
            Ok(inner) if inner.kind() == ErrorKind::HandlerNotFound => inner,
            Ok(inner) => Self::HandlerExecution(Box::new(inner)),
            Err(other) => Self::HandlerExecution(other),
        }
    }
}

/// A failed dispatch together with the finalized response.
///
/// The response status already reflects the failure and its headers have
/// been flushed when this is returned.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct DispatchFailure {
    #[source]
    pub error: DispatchError,
    pub response: ResponseEnvelope,
}

impl DispatchFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}
