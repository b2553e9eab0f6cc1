//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Compile every route template and constraint up front
//! - Detect duplicate route names
//! - Validate value ranges (timeouts > 0, known formats)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::AppConfig;
use crate::routing::Route;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field (e.g. `routes[2].uri`).
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a parsed configuration.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let base_url = &config.application.base_url;
    if base_url.contains("://") {
        if url::Url::parse(base_url).is_err() {
            errors.push(ValidationError::new("application.base_url", "not a valid URL"));
        }
    } else if !base_url.starts_with('/') {
        errors.push(ValidationError::new(
            "application.base_url",
            "must be an absolute path or URL",
        ));
    }

    if config.application.default_action.is_empty() {
        errors.push(ValidationError::new("application.default_action", "must not be empty"));
    }

    let mut names = HashSet::new();
    for (index, route) in config.routes.iter().enumerate() {
        if let Some(name) = &route.name {
            if !names.insert(name.as_str()) {
                errors.push(ValidationError::new(
                    format!("routes[{index}].name"),
                    format!("duplicate route name '{name}'"),
                ));
            }
        }
        if let Err(e) = Route::with_regex(route.uri.clone(), route.regex.clone()) {
            errors.push(ValidationError::new(format!("routes[{index}].uri"), e.to_string()));
        }
    }

    if config.external.connect_timeout_secs == 0 {
        errors.push(ValidationError::new("external.connect_timeout_secs", "must be > 0"));
    }
    if config.external.request_timeout_secs == 0 {
        errors.push(ValidationError::new("external.request_timeout_secs", "must be > 0"));
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.request_timeout_secs", "must be > 0"));
    }
    if config.cache.timeout_ms == 0 {
        errors.push(ValidationError::new("cache.timeout_ms", "must be > 0"));
    }

    if !matches!(config.observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new(
            "observability.log_format",
            "expected 'pretty' or 'json'",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RouteConfig;

    fn route(name: Option<&str>, uri: &str) -> RouteConfig {
        RouteConfig {
            name: name.map(String::from),
            uri: uri.to_string(),
            regex: Default::default(),
            defaults: Default::default(),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = AppConfig::default();
        config.application.base_url = "relative/".into();
        config.routes.push(route(Some("a"), "<controller>"));
        config.routes.push(route(Some("a"), "(broken"));
        config.external.connect_timeout_secs = 0;
        config.observability.log_format = "xml".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "application.base_url",
                "routes[1].name",
                "routes[1].uri",
                "external.connect_timeout_secs",
                "observability.log_format",
            ]
        );
    }

    #[test]
    fn test_anonymous_routes_may_repeat() {
        let mut config = AppConfig::default();
        config.routes.push(route(None, "a"));
        config.routes.push(route(None, "b"));
        assert!(validate_config(&config).is_ok());
    }
}
