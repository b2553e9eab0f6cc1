//! Route registry.
//!
//! # Responsibilities
//! - Store compiled routes in registration order
//! - Named lookup and reverse name lookup
//! - Snapshot iteration for the dispatcher
//! - Persist to / restore from a route cache
//!
//! # Design Decisions
//! - Registering an existing name replaces the entry in place
//! - Anonymous routes keep their position but cannot be looked up by name
//! - Cache restore is best-effort: any failure is a miss, never an error

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{ApplicationConfig, RouteConfig};
use crate::observability::metrics;
use crate::routing::cache::{CacheError, RouteCache, ROUTE_CACHE_KEY};
use crate::routing::pattern::{Route, RouteParams};
use crate::routing::RouteError;

/// A registered route and its optional name.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteEntry {
    pub name: Option<String>,
    pub route: Arc<Route>,
}

/// On-cache representation of one entry.
#[derive(Serialize, Deserialize)]
struct CachedEntry {
    name: Option<String>,
    route: Route,
}

/// Ordered, named collection of routes.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from configuration, keeping file order.
    pub fn from_config(routes: &[RouteConfig]) -> Result<Self, RouteError> {
        let mut table = Self::new();
        for config in routes {
            let route = Route::with_regex(config.uri.clone(), config.regex.clone())?
                .with_defaults(config.defaults.clone());
            table.register(config.name.clone(), route);
        }
        metrics::record_routes_registered(table.len());
        Ok(table)
    }

    /// Register a route, replacing any entry with the same name in place.
    pub fn register(&mut self, name: Option<String>, route: Route) -> Arc<Route> {
        let route = Arc::new(route);

        if let Some(name) = name.as_deref() {
            if let Some(existing) = self
                .entries
                .iter_mut()
                .find(|entry| entry.name.as_deref() == Some(name))
            {
                tracing::debug!(route = %name, "Replacing registered route");
                existing.route = route.clone();
                return route;
            }
        }

        self.entries.push(RouteEntry {
            name,
            route: route.clone(),
        });
        route
    }

    /// Register a named route.
    pub fn set(&mut self, name: impl Into<String>, route: Route) -> Arc<Route> {
        self.register(Some(name.into()), route)
    }

    /// Register an anonymous route.
    pub fn push(&mut self, route: Route) -> Arc<Route> {
        self.register(None, route)
    }

    /// Look up a route by name.
    pub fn get(&self, name: &str) -> Result<Arc<Route>, RouteError> {
        self.entries
            .iter()
            .find(|entry| entry.name.as_deref() == Some(name))
            .map(|entry| entry.route.clone())
            .ok_or_else(|| RouteError::NotFound(name.to_string()))
    }

    /// Name under which `route` is registered, if any.
    pub fn name_of(&self, route: &Route) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.route.as_ref() == route)
            .and_then(|entry| entry.name.as_deref())
    }

    /// Copy of all entries in registration order.
    pub fn all(&self) -> Vec<RouteEntry> {
        self.entries.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First route that matches `uri`, with its parameters.
    pub fn find(&self, uri: &str) -> Option<(&RouteEntry, RouteParams)> {
        self.entries
            .iter()
            .find_map(|entry| entry.route.matches(uri).map(|params| (entry, params)))
    }

    /// Reverse-route a named route into a site URL.
    pub fn url(
        &self,
        name: &str,
        params: &RouteParams,
        app: &ApplicationConfig,
        host: Option<&str>,
    ) -> Result<String, RouteError> {
        let uri = self.get(name)?.uri(params)?;
        Ok(app.site_url(&uri, host))
    }

    /// Store the table under the fixed route cache key.
    pub async fn serialize_to_cache(
        &self,
        cache: &dyn RouteCache,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let records: Vec<CachedEntry> = self
            .entries
            .iter()
            .map(|entry| CachedEntry {
                name: entry.name.clone(),
                route: entry.route.as_ref().clone(),
            })
            .collect();

        let blob = serde_json::to_vec(&records).map_err(CacheError::Encode)?;
        cache.put(ROUTE_CACHE_KEY, blob, ttl).await?;

        metrics::record_route_cache("store");
        tracing::info!(routes = records.len(), "Saved routes to cache");
        Ok(())
    }

    /// Replace all entries with the cached table.
    ///
    /// Returns `false` on a miss, timeout, or unreadable blob; the current
    /// entries are left untouched in that case.
    pub async fn restore_from_cache(&mut self, cache: &dyn RouteCache, timeout: Duration) -> bool {
        let blob = match tokio::time::timeout(timeout, cache.get(ROUTE_CACHE_KEY)).await {
            Ok(Ok(Some(blob))) => blob,
            Ok(Ok(None)) => {
                metrics::record_route_cache("miss");
                return false;
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Route cache read failed, using registered routes");
                metrics::record_route_cache("error");
                return false;
            }
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Route cache read timed out");
                metrics::record_route_cache("error");
                return false;
            }
        };

        match serde_json::from_slice::<Vec<CachedEntry>>(&blob) {
            Ok(records) => {
                self.entries = records
                    .into_iter()
                    .map(|record| RouteEntry {
                        name: record.name,
                        route: Arc::new(record.route),
                    })
                    .collect();
                metrics::record_route_cache("hit");
                metrics::record_routes_registered(self.entries.len());
                tracing::info!(routes = self.entries.len(), "Loaded routes from cache");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable route cache");
                metrics::record_route_cache("error");
                false
            }
        }
    }
}
