//! Request dispatcher.
//!
//! # Responsibilities
//! - Route internal requests (first match wins) or delegate external ones
//! - Resolve the controller and run before → action → after
//! - Classify failures, finalize the response, then propagate
//! - Track the stack of executing contexts across nested dispatches
//!
//! # Design Decisions
//! - The route table is read through a snapshot per dispatch, so a reload
//!   never changes routing mid-request
//! - On failure the status is set and headers flushed before the error is
//!   returned
//! - Stack frames pop on drop, so a failing nested dispatch still restores
//!   the outer context

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use arc_swap::ArcSwap;

use crate::config::ApplicationConfig;
use crate::dispatch::controller::ControllerResolver;
use crate::dispatch::external::ExternalClient;
use crate::error::{DispatchError, DispatchFailure};
use crate::http::request::RequestContext;
use crate::http::response::ResponseEnvelope;
use crate::observability::metrics;
use crate::routing::{RouteError, RouteParams, RouteTable};

/// Route parameters consumed by controller resolution.
pub const RESERVED_PARAMS: [&str; 3] = ["controller", "action", "directory"];

type DispatchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ResponseEnvelope, DispatchFailure>> + Send + 'a>>;

/// Output boundary that receives headers when a dispatch fails.
pub trait HeaderSink: Send + Sync {
    fn flush(&self, response: &ResponseEnvelope);
}

/// Logs the status line and header count.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHeaderSink;

impl HeaderSink for TracingHeaderSink {
    fn flush(&self, response: &ResponseEnvelope) {
        tracing::debug!(
            status = response.status(),
            reason = response.reason(),
            headers = response.headers().len(),
            "Flushed response headers"
        );
    }
}

/// Stack of URIs currently executing within one top-level dispatch.
#[derive(Debug, Default)]
pub struct ContextStack {
    frames: Mutex<Vec<String>>,
}

impl ContextStack {
    pub fn new() -> Self {
        Self::default()
    }

    fn frames(&self) -> MutexGuard<'_, Vec<String>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push a frame; it is popped when the returned guard drops.
    pub fn enter(&self, uri: &str) -> StackFrame<'_> {
        let mut frames = self.frames();
        frames.push(uri.to_string());
        StackFrame {
            stack: self,
            depth: frames.len(),
        }
    }

    pub fn depth(&self) -> usize {
        self.frames().len()
    }

    /// URI of the innermost executing context.
    pub fn current(&self) -> Option<String> {
        self.frames().last().cloned()
    }
}

/// Guard for one frame of a [`ContextStack`].
#[derive(Debug)]
pub struct StackFrame<'s> {
    stack: &'s ContextStack,
    depth: usize,
}

impl Drop for StackFrame<'_> {
    fn drop(&mut self) {
        self.stack.frames().truncate(self.depth - 1);
    }
}

/// What a controller sees while it runs: its request, the response being
/// built, and access back into the dispatcher.
pub struct Exchange<'d> {
    pub request: RequestContext,
    pub response: ResponseEnvelope,
    dispatcher: &'d Dispatcher,
    stack: &'d ContextStack,
}

impl<'d> Exchange<'d> {
    /// Dispatch `target` as a nested request against the same table.
    pub async fn sub_request(&self, target: &str) -> Result<ResponseEnvelope, DispatchFailure> {
        let request = self.request.sub_request(target, &self.dispatcher.app);
        self.dispatcher.execute(request, self.stack).await
    }

    /// Site URL for a named route.
    pub fn url(&self, name: &str, params: &RouteParams) -> Result<String, RouteError> {
        self.dispatcher
            .routes
            .load()
            .url(name, params, &self.dispatcher.app, self.request.header("Host"))
    }

    /// Number of contexts executing, this one included.
    pub fn current_depth(&self) -> usize {
        self.stack.depth()
    }

    pub fn current_uri(&self) -> Option<String> {
        self.stack.current()
    }

    /// Redirect the response; `302` when `code` is `None`.
    pub fn redirect(&mut self, url: &str, code: Option<u16>) -> Result<(), DispatchError> {
        self.response.redirect(url, code.unwrap_or(302))
    }

    pub fn app(&self) -> &ApplicationConfig {
        &self.dispatcher.app
    }
}

/// Matches requests against the route table and runs controllers.
pub struct Dispatcher {
    routes: Arc<ArcSwap<RouteTable>>,
    resolver: Arc<dyn ControllerResolver>,
    external: Arc<dyn ExternalClient>,
    header_sink: Arc<dyn HeaderSink>,
    app: ApplicationConfig,
}

impl Dispatcher {
    pub fn new(
        routes: Arc<ArcSwap<RouteTable>>,
        resolver: Arc<dyn ControllerResolver>,
        external: Arc<dyn ExternalClient>,
        app: ApplicationConfig,
    ) -> Self {
        Self {
            routes,
            resolver,
            external,
            header_sink: Arc::new(TracingHeaderSink),
            app,
        }
    }

    pub fn with_header_sink(mut self, sink: Arc<dyn HeaderSink>) -> Self {
        self.header_sink = sink;
        self
    }

    pub fn app(&self) -> &ApplicationConfig {
        &self.app
    }

    /// Current route table snapshot.
    pub fn routes(&self) -> Arc<RouteTable> {
        self.routes.load_full()
    }

    /// Swappable handle to the route table, for reloads.
    pub fn shared_routes(&self) -> Arc<ArcSwap<RouteTable>> {
        self.routes.clone()
    }

    /// Dispatch a top-level request.
    pub async fn dispatch(&self, request: RequestContext) -> Result<ResponseEnvelope, DispatchFailure> {
        let stack = ContextStack::new();
        self.execute(request, &stack).await
    }

    fn execute<'a>(&'a self, request: RequestContext, stack: &'a ContextStack) -> DispatchFuture<'a> {
        Box::pin(async move {
            let start = Instant::now();
            let _frame = stack.enter(request.uri());
            tracing::debug!(
                uri = %request.uri(),
                method = %request.method(),
                depth = stack.depth(),
                external = request.is_external(),
                "Dispatching request"
            );

            let mut exchange = Exchange {
                request,
                response: ResponseEnvelope::new(),
                dispatcher: self,
                stack,
            };

            let outcome = if exchange.request.is_external() {
                self.delegate(&mut exchange).await
            } else {
                self.run(&mut exchange).await
            };

            match outcome {
                Ok(()) => {
                    metrics::record_dispatch("completed", "none", start);
                    Ok(exchange.response)
                }
                Err(error) => Err(self.fail(exchange.response, error, start)),
            }
        })
    }

    async fn delegate(&self, exchange: &mut Exchange<'_>) -> Result<(), DispatchError> {
        check_cancelled(&exchange.request, "external request")?;
        exchange.response = self.external.execute(&exchange.request).await?;
        Ok(())
    }

    async fn run(&self, exchange: &mut Exchange<'_>) -> Result<(), DispatchError> {
        let (name, route, params) = {
            let table = self.routes.load();
            match table.find(exchange.request.uri()) {
                Some((entry, params)) => (entry.name.clone(), entry.route.clone(), params),
                None => {
                    return Err(DispatchError::RouteNotFound {
                        uri: exchange.request.uri().to_string(),
                    })
                }
            }
        };

        tracing::debug!(
            route = name.as_deref().unwrap_or("<anonymous>"),
            uri = %exchange.request.uri(),
            "Matched route"
        );
        exchange.request.bind_route(name, route, params.clone())?;

        let directory = non_empty(&params, "directory");
        let controller_name = non_empty(&params, "controller").ok_or_else(|| {
            DispatchError::HandlerNotFound(format!(
                "route for '{}' supplies no controller",
                exchange.request.uri()
            ))
        })?;
        let action = non_empty(&params, "action")
            .unwrap_or(self.app.default_action.as_str())
            .to_string();
        let args: RouteParams = params
            .iter()
            .filter(|(key, _)| !RESERVED_PARAMS.contains(key))
            .collect();

        let mut controller = self
            .resolver
            .resolve(directory, controller_name, &exchange.request)
            .ok_or_else(|| {
                DispatchError::HandlerNotFound(format!(
                    "the requested URL {} was not found on this server",
                    exchange.request.uri()
                ))
            })?;
        if !controller.has_action(&action) {
            return Err(DispatchError::HandlerNotFound(format!(
                "controller '{controller_name}' has no action '{action}'"
            )));
        }

        tracing::debug!(controller = %controller_name, action = %action, "Executing controller");

        check_cancelled(&exchange.request, "before")?;
        controller
            .before(exchange)
            .await
            .map_err(DispatchError::from_handler)?;

        check_cancelled(&exchange.request, "action")?;
        controller
            .action(&action, &args, exchange)
            .await
            .map_err(DispatchError::from_handler)?;

        check_cancelled(&exchange.request, "after")?;
        controller
            .after(exchange)
            .await
            .map_err(DispatchError::from_handler)?;

        Ok(())
    }

    /// Set the failure status, flush headers, and package the failure.
    fn fail(&self, mut response: ResponseEnvelope, error: DispatchError, start: Instant) -> DispatchFailure {
        let kind = error.kind();
        if let Err(e) = response.set_status(kind.status_code()) {
            tracing::error!(error = %e, "Failed to set error status");
        }
        if response.mark_headers_sent() {
            self.header_sink.flush(&response);
        }

        if kind.status_code() >= 500 {
            tracing::error!(kind = kind.as_str(), status = response.status(), error = %error, "Dispatch failed");
        } else {
            tracing::warn!(kind = kind.as_str(), status = response.status(), error = %error, "Dispatch failed");
        }
        metrics::record_dispatch("failed", kind.as_str(), start);

        DispatchFailure { error, response }
    }
}

fn non_empty<'p>(params: &'p RouteParams, key: &str) -> Option<&'p str> {
    params.get(key).filter(|value| !value.is_empty())
}

fn check_cancelled(request: &RequestContext, stage: &'static str) -> Result<(), DispatchError> {
    if request.is_cancelled() {
        return Err(DispatchError::Cancelled { stage });
    }
    Ok(())
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.routes.load().len())
            .field("app", &self.app)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::dispatch::controller::{Controller, ControllerRegistry};
    use crate::dispatch::external::ExternalError;
    use crate::error::{ErrorKind, HandlerResult};
    use crate::routing::Route;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        log: Log,
        fail_in: Option<&'static str>,
    }

    #[async_trait]
    impl Controller for Recorder {
        async fn before(&mut self, _exchange: &mut Exchange<'_>) -> HandlerResult {
            self.log.lock().unwrap().push("before".into());
            if self.fail_in == Some("before") {
                return Err("before failed".into());
            }
            Ok(())
        }

        fn actions(&self) -> &[&'static str] {
            &["index", "edit"]
        }

        async fn action(
            &mut self,
            name: &str,
            args: &RouteParams,
            exchange: &mut Exchange<'_>,
        ) -> HandlerResult {
            let args: Vec<String> = args.iter().map(|(k, v)| format!("{k}={v}")).collect();
            self.log
                .lock()
                .unwrap()
                .push(format!("action:{name}:{}", args.join(",")));
            if self.fail_in == Some("action") {
                return Err("action failed".into());
            }
            exchange.response.set_body(format!("{name} done"));
            Ok(())
        }

        async fn after(&mut self, _exchange: &mut Exchange<'_>) -> HandlerResult {
            self.log.lock().unwrap().push("after".into());
            Ok(())
        }
    }

    struct NoExternal;

    #[async_trait]
    impl ExternalClient for NoExternal {
        async fn execute(&self, request: &RequestContext) -> Result<ResponseEnvelope, ExternalError> {
            let mut response = ResponseEnvelope::new();
            response.set_body(format!("external {}", request.uri()));
            Ok(response)
        }
    }

    struct RecordingSink(Arc<Mutex<Vec<u16>>>);

    impl HeaderSink for RecordingSink {
        fn flush(&self, response: &ResponseEnvelope) {
            self.0.lock().unwrap().push(response.status());
        }
    }

    fn default_route() -> Route {
        Route::new("(<controller>(/<action>(/<id>)))")
            .unwrap()
            .with_defaults([("controller", "welcome"), ("action", "index")])
    }

    fn dispatcher(table: RouteTable, registry: ControllerRegistry) -> Dispatcher {
        Dispatcher::new(
            Arc::new(ArcSwap::from_pointee(table)),
            Arc::new(registry),
            Arc::new(NoExternal),
            ApplicationConfig::default(),
        )
    }

    fn recorder_registry(log: &Log, fail_in: Option<&'static str>) -> ControllerRegistry {
        let mut registry = ControllerRegistry::new();
        let log = log.clone();
        registry.register("users", move |_| {
            Box::new(Recorder {
                log: log.clone(),
                fail_in,
            })
        });
        registry
    }

    fn request(uri: &str) -> RequestContext {
        RequestContext::new(uri, &ApplicationConfig::default())
    }

    #[tokio::test]
    async fn test_lifecycle_order_and_arguments() {
        let log = Log::default();
        let mut table = RouteTable::new();
        table.set("default", default_route());
        let dispatcher = dispatcher(table, recorder_registry(&log, None));

        let response = dispatcher.dispatch(request("users/edit/42")).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.body(), b"edit done");
        assert_eq!(
            *log.lock().unwrap(),
            vec!["before", "action:edit:id=42", "after"]
        );
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let log = Log::default();
        let mut table = RouteTable::new();
        table.set(
            "general",
            Route::new("<controller>(/<id>)").unwrap().with_defaults([("action", "index")]),
        );
        table.set(
            "specific",
            Route::new("<controller>/edit(/<id>)")
                .unwrap()
                .with_defaults([("action", "edit")]),
        );
        let dispatcher = dispatcher(table, recorder_registry(&log, None));

        let response = dispatcher.dispatch(request("users/edit")).await.unwrap();
        assert_eq!(response.body(), b"index done");
        assert_eq!(log.lock().unwrap()[1], "action:index:id=edit");
    }

    #[tokio::test]
    async fn test_route_not_found() {
        let mut table = RouteTable::new();
        table.push(Route::new("users/<id>").unwrap());
        let dispatcher = dispatcher(table, ControllerRegistry::new());

        let failure = dispatcher.dispatch(request("posts")).await.unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::RouteNotFound);
        assert_eq!(failure.response.status(), 404);
    }

    #[tokio::test]
    async fn test_unknown_controller_and_action() {
        let log = Log::default();
        let mut table = RouteTable::new();
        table.set("default", default_route());
        let dispatcher = dispatcher(table, recorder_registry(&log, None));

        let failure = dispatcher.dispatch(request("posts/list")).await.unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::HandlerNotFound);

        let failure = dispatcher.dispatch(request("users/delete")).await.unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::HandlerNotFound);
        assert_eq!(failure.response.status(), 404);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_sets_status_before_flush() {
        let log = Log::default();
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let mut table = RouteTable::new();
        table.set("default", default_route());
        let dispatcher = dispatcher(table, recorder_registry(&log, Some("action")))
            .with_header_sink(Arc::new(RecordingSink(flushed.clone())));

        let failure = dispatcher.dispatch(request("users/edit/1")).await.unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::HandlerExecution);
        assert_eq!(failure.response.status(), 500);
        assert!(failure.response.headers_sent());
        assert_eq!(*flushed.lock().unwrap(), vec![500]);
        // after never runs once the action fails
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_before_failure_skips_action() {
        let log = Log::default();
        let mut table = RouteTable::new();
        table.set("default", default_route());
        let dispatcher = dispatcher(table, recorder_registry(&log, Some("before")));

        let failure = dispatcher.dispatch(request("users")).await.unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::HandlerExecution);
        assert_eq!(*log.lock().unwrap(), vec!["before"]);
    }

    #[tokio::test]
    async fn test_default_action_fallback() {
        let log = Log::default();
        let mut table = RouteTable::new();
        table.push(Route::new("<controller>(/<action>)").unwrap().with_defaults([("action", "")]));
        let dispatcher = dispatcher(table, recorder_registry(&log, None));

        let response = dispatcher.dispatch(request("users")).await.unwrap();
        assert_eq!(response.body(), b"index done");
    }

    #[tokio::test]
    async fn test_cancelled_between_steps() {
        let log = Log::default();
        let mut table = RouteTable::new();
        table.set("default", default_route());
        let dispatcher = dispatcher(table, recorder_registry(&log, None));

        let request = request("users");
        request.cancel_handle().cancel();
        let failure = dispatcher.dispatch(request).await.unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::Cancelled);
        assert_eq!(failure.response.status(), 499);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_external_bypasses_routes() {
        let dispatcher = dispatcher(RouteTable::new(), ControllerRegistry::new());
        let response = dispatcher
            .dispatch(request("http://example.com/feed"))
            .await
            .unwrap();
        assert_eq!(response.body(), b"external http://example.com/feed");
    }

    #[test]
    fn test_stack_frames_pop_on_drop() {
        let stack = ContextStack::new();
        let outer = stack.enter("outer");
        {
            let _inner = stack.enter("inner");
            assert_eq!(stack.depth(), 2);
            assert_eq!(stack.current().as_deref(), Some("inner"));
        }
        assert_eq!(stack.current().as_deref(), Some("outer"));
        drop(outer);
        assert_eq!(stack.depth(), 0);
    }
}
