//! Inbound URI detection and normalization.
//!
//! # Responsibilities
//! - Pick the request path from transport metadata, in priority order
//! - Strip the application base path and front-controller file
//! - Collapse slashes and scrub dot-segments
//! - Classify absolute targets as external
//!
//! # Design Decisions
//! - Dot-segment removal is a coarse scrub, not RFC 3986 normalization
//! - External classification keeps the historical base-path position rule

use std::sync::OnceLock;

use percent_encoding::percent_decode_str;
use regex::Regex;

use crate::config::ApplicationConfig;
use crate::error::DispatchError;
use crate::http::request::ServerEnvironment;
use crate::routing::pattern::collapse_slashes;

fn dot_segments() -> &'static Regex {
    static DOT_SEGMENTS: OnceLock<Regex> = OnceLock::new();
    DOT_SEGMENTS.get_or_init(|| Regex::new(r"\.[\s./]*/").expect("dot segment pattern is valid"))
}

/// Normalize a path for matching.
///
/// Repeated slashes become one, dot-segments are removed and leading or
/// trailing slashes are trimmed.
pub fn normalize(uri: &str) -> String {
    let collapsed = collapse_slashes(uri);
    let with_slash = format!("{collapsed}/");
    let scrubbed = dot_segments().replace_all(&with_slash, "");
    collapse_slashes(&scrubbed).trim_matches('/').to_string()
}

/// Whether `target` points away from this application.
///
/// A target is external when it carries a scheme and the base path is
/// either absent from it or not at its start.
pub fn is_external(target: &str, base_path: &str) -> bool {
    if !target.contains("://") {
        return false;
    }
    match target.find(base_path) {
        None => true,
        Some(position) => position > 0,
    }
}

/// Path part of a request target, without query string, percent-decoded.
fn request_target_path(request_uri: &str) -> String {
    let path = if request_uri.contains("://") {
        match url::Url::parse(request_uri) {
            Ok(url) => url.path().to_string(),
            Err(_) => request_uri.to_string(),
        }
    } else {
        request_uri
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string()
    };
    percent_decode_str(&path).decode_utf8_lossy().into_owned()
}

/// Determine the operative path from transport metadata.
///
/// Signals are tried in order: path-info, request-target, script path,
/// redirect URL. The first non-empty one wins.
pub fn detect_uri(env: &ServerEnvironment, app: &ApplicationConfig) -> Result<String, DispatchError> {
    fn non_empty(value: &Option<String>) -> Option<&str> {
        value.as_deref().filter(|v| !v.is_empty())
    }

    let detected = if let Some(path_info) = non_empty(&env.path_info) {
        path_info.to_string()
    } else if let Some(request_uri) = non_empty(&env.request_uri) {
        request_target_path(request_uri)
    } else if let Some(script_name) = non_empty(&env.script_name) {
        script_name.to_string()
    } else if let Some(redirect_url) = non_empty(&env.redirect_url) {
        redirect_url.to_string()
    } else {
        return Err(DispatchError::UriDetection);
    };

    let base_path = app.base_path();
    let mut uri = detected.strip_prefix(base_path.as_str()).unwrap_or(&detected);
    if !app.index_file.is_empty() {
        uri = uri.strip_prefix(app.index_file.as_str()).unwrap_or(uri);
    }

    tracing::trace!(detected = %detected, uri = %uri, "Detected request URI");
    Ok(uri.to_string())
}
