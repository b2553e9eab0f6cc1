//! Controller capability and resolution.
//!
//! # Responsibilities
//! - Define the hooks a controller exposes: before, action, after
//! - Resolve `(directory, controller)` pairs to fresh controller instances
//!
//! # Design Decisions
//! - Controllers are registered as factories, one instance per dispatch
//! - Lookup keys are case-insensitive; a missing directory is the empty
//!   directory
//! - Actions are declared up front so a missing entry point is detected
//!   before any hook runs

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::dispatch::dispatcher::Exchange;
use crate::error::HandlerResult;
use crate::http::request::RequestContext;
use crate::routing::RouteParams;

/// A request handler with a pre-action hook, named actions and a
/// post-action hook.
#[async_trait]
pub trait Controller: Send {
    /// Runs before the action.
    async fn before(&mut self, _exchange: &mut Exchange<'_>) -> HandlerResult {
        Ok(())
    }

    /// Names of the actions this controller answers.
    fn actions(&self) -> &[&'static str];

    fn has_action(&self, name: &str) -> bool {
        self.actions().iter().any(|action| action.eq_ignore_ascii_case(name))
    }

    /// Run `name` with the non-reserved route parameters as arguments.
    async fn action(
        &mut self,
        name: &str,
        args: &RouteParams,
        exchange: &mut Exchange<'_>,
    ) -> HandlerResult;

    /// Runs after a successful action.
    async fn after(&mut self, _exchange: &mut Exchange<'_>) -> HandlerResult {
        Ok(())
    }
}

/// Maps route parameters to a controller instance.
pub trait ControllerResolver: Send + Sync {
    /// `None` when no controller is known under this name.
    fn resolve(
        &self,
        directory: Option<&str>,
        controller: &str,
        request: &RequestContext,
    ) -> Option<Box<dyn Controller>>;
}

/// Builds a controller for one request.
pub type ControllerFactory = Arc<dyn Fn(&RequestContext) -> Box<dyn Controller> + Send + Sync>;

/// Factory registry keyed by `(directory, controller)`.
#[derive(Default, Clone)]
pub struct ControllerRegistry {
    factories: HashMap<(String, String), ControllerFactory>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a controller outside any directory.
    pub fn register<F>(&mut self, controller: &str, factory: F) -> &mut Self
    where
        F: Fn(&RequestContext) -> Box<dyn Controller> + Send + Sync + 'static,
    {
        self.register_in(None, controller, factory)
    }

    /// Register a controller under `directory`.
    pub fn register_in<F>(
        &mut self,
        directory: Option<&str>,
        controller: &str,
        factory: F,
    ) -> &mut Self
    where
        F: Fn(&RequestContext) -> Box<dyn Controller> + Send + Sync + 'static,
    {
        let key = registry_key(directory, controller);
        tracing::debug!(directory = %key.0, controller = %key.1, "Registered controller");
        self.factories.insert(key, Arc::new(factory));
        self
    }

    pub fn contains(&self, directory: Option<&str>, controller: &str) -> bool {
        self.factories.contains_key(&registry_key(directory, controller))
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl ControllerResolver for ControllerRegistry {
    fn resolve(
        &self,
        directory: Option<&str>,
        controller: &str,
        request: &RequestContext,
    ) -> Option<Box<dyn Controller>> {
        self.factories
            .get(&registry_key(directory, controller))
            .map(|factory| factory(request))
    }
}

impl std::fmt::Debug for ControllerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.factories.keys().collect();
        keys.sort();
        f.debug_struct("ControllerRegistry")
            .field("controllers", &keys)
            .finish()
    }
}

fn registry_key(directory: Option<&str>, controller: &str) -> (String, String) {
    (
        directory
            .unwrap_or_default()
            .trim_matches('/')
            .to_ascii_lowercase(),
        controller.to_ascii_lowercase(),
    )
}
