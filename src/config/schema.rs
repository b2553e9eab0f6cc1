//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the router.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Base URL, index file and routing defaults.
    pub application: ApplicationConfig,

    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Route definitions, in match priority order.
    pub routes: Vec<RouteConfig>,

    /// Route cache settings.
    pub cache: CacheConfig,

    /// Outbound request settings for external targets.
    pub external: ExternalConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Route definitions in priority order.
    pub fn route_configs(&self) -> &[RouteConfig] {
        &self.routes
    }
}

/// Where the application lives and how it names its front controller.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Base URL of the application, either a path (`/kohana/`) or an
    /// absolute URL (`https://example.com/app/`).
    pub base_url: String,

    /// Front controller file stripped from detected URIs (e.g. `index.php`).
    /// Empty disables stripping.
    pub index_file: String,

    /// Protocol prefix used for absolute URLs.
    pub default_protocol: String,

    /// Action used when a route supplies none.
    pub default_action: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            base_url: "/".to_string(),
            index_file: String::new(),
            default_protocol: "http://".to_string(),
            default_action: "index".to_string(),
        }
    }
}

impl ApplicationConfig {
    /// Path component of `base_url`, always starting and ending with `/`.
    pub fn base_path(&self) -> String {
        let path = match self.base_url.find("://") {
            Some(scheme_end) => {
                let rest = &self.base_url[scheme_end + 3..];
                rest.find('/').map_or("/", |slash| &rest[slash..])
            }
            None => self.base_url.as_str(),
        };

        let mut base = String::with_capacity(path.len() + 2);
        if !path.starts_with('/') {
            base.push('/');
        }
        base.push_str(path);
        if !base.ends_with('/') {
            base.push('/');
        }
        base
    }

    /// Build a site URL for a routed URI.
    ///
    /// An absolute `base_url` is used as-is; otherwise `host` (when given)
    /// is prefixed with `default_protocol`.
    pub fn site_url(&self, uri: &str, host: Option<&str>) -> String {
        let mut url = if self.base_url.contains("://") {
            let mut base = self.base_url.clone();
            if !base.ends_with('/') {
                base.push('/');
            }
            base
        } else {
            match host {
                Some(host) => format!("{}{}{}", self.default_protocol, host, self.base_path()),
                None => self.base_path(),
            }
        };

        if !self.index_file.is_empty() {
            url.push_str(&self.index_file);
            url.push('/');
        }
        url.push_str(uri.trim_start_matches('/'));
        url
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Request timeout for the HTTP front end in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// One route definition.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RouteConfig {
    /// Route name used for reverse routing; anonymous when absent.
    #[serde(default)]
    pub name: Option<String>,

    /// URI template (`<key>` placeholders, `(...)` optional groups).
    pub uri: String,

    /// Per-key regex fragments replacing the default segment pattern.
    #[serde(default)]
    pub regex: BTreeMap<String, String>,

    /// Fallback values for keys that are not captured.
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,
}

/// Backend used for the route cache.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    File,
}

/// Route cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Restore routes from the cache at startup and save them after.
    pub enabled: bool,

    /// Which store to use.
    pub backend: CacheBackend,

    /// Directory for the file backend.
    pub path: String,

    /// Lifetime of a cached table in seconds.
    pub ttl_secs: u64,

    /// Upper bound on a cache read in milliseconds.
    pub timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: CacheBackend::Memory,
            path: "cache".to_string(),
            ttl_secs: 86_400,
            timeout_ms: 250,
        }
    }
}

/// Timeouts for requests forwarded to external targets.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExternalConfig {
    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Total request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            request_timeout_secs: 5,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format (`pretty` or `json`).
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
