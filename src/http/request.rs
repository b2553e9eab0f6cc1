//! Request context.
//!
//! # Responsibilities
//! - Build the per-request context from transport metadata, a headless
//!   argument source, or an internal target (sub-request)
//! - Hold method, normalized URI, headers, parameters and client metadata
//! - Carry the matched route and its parameters once routing succeeds
//!
//! # Design Decisions
//! - The URI is normalized on construction and never re-derived
//! - Route parameters are bound exactly once
//! - Method is informational for handlers; it takes no part in matching

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::config::ApplicationConfig;
use crate::error::DispatchError;
use crate::http::cli::CliOptions;
use crate::http::headers::Headers;
use crate::http::uri;
use crate::routing::{Route, RouteParams};

/// Request methods understood by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    Connect,
    Delete,
    #[default]
    Get,
    Head,
    Post,
    Put,
    Options,
    Trace,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Connect => "CONNECT",
            Method::Delete => "DELETE",
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Method name outside the supported set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported request method: {0}")]
pub struct UnknownMethod(pub String);

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CONNECT" => Ok(Method::Connect),
            "DELETE" => Ok(Method::Delete),
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "OPTIONS" => Ok(Method::Options),
            "TRACE" => Ok(Method::Trace),
            _ => Err(UnknownMethod(s.to_string())),
        }
    }
}

/// A query or body parameter: single value or `name[]` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Single(String),
    List(Vec<String>),
}

impl ParamValue {
    /// The value, or the first list element.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Single(value) => Some(value),
            ParamValue::List(values) => values.first().map(String::as_str),
        }
    }

    pub fn as_list(&self) -> Vec<&str> {
        match self {
            ParamValue::Single(value) => vec![value.as_str()],
            ParamValue::List(values) => values.iter().map(String::as_str).collect(),
        }
    }
}

/// Query or body parameters.
pub type Params = BTreeMap<String, ParamValue>;

/// Parse a `key=value&...` string.
///
/// `name[]` keys accumulate into a list; repeated plain keys keep the last
/// value.
pub fn parse_query(input: &str) -> Params {
    let mut params = Params::new();
    for (key, value) in url::form_urlencoded::parse(input.trim_start_matches('?').as_bytes()) {
        if let Some(name) = key.strip_suffix("[]") {
            match params
                .entry(name.to_string())
                .or_insert_with(|| ParamValue::List(Vec::new()))
            {
                ParamValue::List(values) => values.push(value.into_owned()),
                single => *single = ParamValue::List(vec![value.into_owned()]),
            }
        } else {
            params.insert(key.into_owned(), ParamValue::Single(value.into_owned()));
        }
    }
    params
}

/// Parse an `Accept`-style header into `(value, quality)` pairs.
///
/// Sorted by quality, highest first; equal qualities keep header order.
pub fn parse_accept(header: &str) -> Vec<(String, f32)> {
    let mut accepts: Vec<(String, f32)> = header
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.split(';');
            let value = pieces.next()?.trim();
            if value.is_empty() {
                return None;
            }
            let quality = pieces
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            Some((value.to_ascii_lowercase(), quality))
        })
        .collect();
    accepts.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    accepts
}

/// Cooperative cancellation flag shared with the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Transport-level metadata for one inbound request.
///
/// Field names follow the classic front-controller server variables.
#[derive(Debug, Clone, Default)]
pub struct ServerEnvironment {
    pub path_info: Option<String>,
    pub request_uri: Option<String>,
    pub script_name: Option<String>,
    pub redirect_url: Option<String>,
    pub method: Option<String>,
    pub query_string: Option<String>,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub remote_addr: Option<String>,
    pub https: bool,
    /// Set when running without a web server.
    pub headless: Option<CliOptions>,
}

/// The route a request matched, with its parameters.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub name: Option<String>,
    pub route: Arc<Route>,
    pub params: RouteParams,
}

/// Parsed representation of one (initial or internal) request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    method: Method,
    target: String,
    uri: String,
    external: bool,
    protocol: String,
    headers: Headers,
    query: Params,
    post: Params,
    body: Vec<u8>,
    client_ip: String,
    user_agent: String,
    matched: Option<RouteMatch>,
    cancel: CancelHandle,
}

impl RequestContext {
    /// Create a request for an explicit target.
    ///
    /// Internal targets are normalized; external ones are kept verbatim.
    pub fn new(target: &str, app: &ApplicationConfig) -> Self {
        let external = uri::is_external(target, &app.base_path());
        let uri = if external {
            target.to_string()
        } else {
            uri::normalize(target)
        };

        Self {
            method: Method::Get,
            target: target.to_string(),
            uri,
            external,
            protocol: "http".to_string(),
            headers: Headers::new(),
            query: Params::new(),
            post: Params::new(),
            body: Vec::new(),
            client_ip: "0.0.0.0".to_string(),
            user_agent: String::new(),
            matched: None,
            cancel: CancelHandle::default(),
        }
    }

    /// Create the initial request from transport metadata.
    ///
    /// `target_override` skips URI detection. A headless environment reads
    /// its overrides from the argument source instead of transport data.
    pub fn from_environment(
        env: &ServerEnvironment,
        app: &ApplicationConfig,
        target_override: Option<&str>,
    ) -> Result<Self, DispatchError> {
        if let Some(options) = &env.headless {
            let options = match target_override {
                Some(target) => CliOptions {
                    uri: Some(target.to_string()),
                    ..options.clone()
                },
                None => options.clone(),
            };
            return Ok(Self::from_cli(&options, app));
        }

        let target = match target_override {
            Some(target) => target.to_string(),
            None => uri::detect_uri(env, app)?,
        };

        let mut request = Self::new(&target, app);
        if let Some(method) = env.method.as_deref() {
            request.method = method.parse().unwrap_or_else(|e: UnknownMethod| {
                tracing::warn!(error = %e, "Falling back to GET");
                Method::Get
            });
        }
        request.headers = env.headers.clone();
        request.query = env.query_string.as_deref().map(parse_query).unwrap_or_default();
        request.body = env.body.clone();

        let form_body = request
            .headers
            .get("Content-Type")
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
        if form_body {
            request.post = parse_query(&String::from_utf8_lossy(&request.body));
        }

        request.protocol = if env.https { "https" } else { "http" }.to_string();
        request.client_ip = detect_client_ip(&request.headers, env.remote_addr.as_deref());
        request.user_agent = request.headers.get("User-Agent").unwrap_or_default().to_string();
        Ok(request)
    }

    /// Create a request from headless options.
    pub fn from_cli(options: &CliOptions, app: &ApplicationConfig) -> Self {
        let mut request = Self::new(options.uri.as_deref().unwrap_or_default(), app);
        if let Some(method) = options.method.as_deref() {
            request.method = method.parse().unwrap_or_else(|e: UnknownMethod| {
                tracing::warn!(error = %e, "Falling back to GET");
                Method::Get
            });
        }
        if let Some(get) = options.get.as_deref() {
            request.query = parse_query(get);
        }
        if let Some(post) = options.post.as_deref() {
            request.post = parse_query(post);
        }
        request
    }

    /// Create an internal request issued while handling this one.
    ///
    /// Client metadata carries over; method, parameters and body do not.
    pub fn sub_request(&self, target: &str, app: &ApplicationConfig) -> Self {
        let mut request = Self::new(target, app);
        request.protocol = self.protocol.clone();
        request.client_ip = self.client_ip.clone();
        request.user_agent = self.user_agent.clone();
        request.cancel = self.cancel.clone();
        request
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    /// Target as given, before normalization.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Normalized path used for matching.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn is_external(&self) -> bool {
        self.external
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn is_secure(&self) -> bool {
        self.protocol == "https"
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    pub fn query(&self) -> &Params {
        &self.query
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query.get(key).and_then(ParamValue::as_str)
    }

    pub fn set_query(&mut self, query: Params) {
        self.query = query;
    }

    pub fn post(&self) -> &Params {
        &self.post
    }

    pub fn post_value(&self, key: &str) -> Option<&str> {
        self.post.get(key).and_then(ParamValue::as_str)
    }

    pub fn set_post(&mut self, post: Params) {
        self.post = post;
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    pub fn client_ip(&self) -> &str {
        &self.client_ip
    }

    pub fn set_client_ip(&mut self, ip: impl Into<String>) {
        self.client_ip = ip.into();
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn is_ajax(&self) -> bool {
        self.headers
            .get("X-Requested-With")
            .is_some_and(|v| v.eq_ignore_ascii_case("xmlhttprequest"))
    }

    pub fn referrer(&self) -> Option<&str> {
        self.headers.get("Referer")
    }

    /// Accepted content types by preference; `*/*` when absent.
    pub fn accept_types(&self) -> Vec<(String, f32)> {
        parse_accept(self.headers.get("Accept").unwrap_or("*/*"))
    }

    /// Quality the client assigns to `mime`, considering wildcards.
    pub fn accepts_type(&self, mime: &str) -> f32 {
        let mime = mime.to_ascii_lowercase();
        let wildcard = mime
            .split_once('/')
            .map(|(kind, _)| format!("{kind}/*"))
            .unwrap_or_default();
        let accepts = self.accept_types();

        let quality = [mime.as_str(), wildcard.as_str(), "*/*"]
            .into_iter()
            .find_map(|candidate| {
                accepts
                    .iter()
                    .find(|(value, _)| value == candidate)
                    .map(|(_, q)| *q)
            })
            .unwrap_or(0.0);
        quality
    }

    pub fn accept_langs(&self) -> Vec<(String, f32)> {
        self.headers
            .get("Accept-Language")
            .map(parse_accept)
            .unwrap_or_default()
    }

    pub fn accept_encodings(&self) -> Vec<(String, f32)> {
        self.headers
            .get("Accept-Encoding")
            .map(parse_accept)
            .unwrap_or_default()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Record the matched route. Fails if a route was already bound.
    pub fn bind_route(
        &mut self,
        name: Option<String>,
        route: Arc<Route>,
        params: RouteParams,
    ) -> Result<(), DispatchError> {
        if self.matched.is_some() {
            return Err(DispatchError::ParamsLocked);
        }
        self.matched = Some(RouteMatch {
            name,
            route,
            params,
        });
        Ok(())
    }

    pub fn matched_route(&self) -> Option<&RouteMatch> {
        self.matched.as_ref()
    }

    pub fn route_params(&self) -> Option<&RouteParams> {
        self.matched.as_ref().map(|m| &m.params)
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.route_params().and_then(|params| params.get(key))
    }

    pub fn param_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.param(key).unwrap_or(default)
    }

    pub fn directory(&self) -> Option<&str> {
        self.param("directory")
    }

    pub fn controller(&self) -> Option<&str> {
        self.param("controller")
    }

    pub fn action(&self) -> Option<&str> {
        self.param("action")
    }

    /// Reverse-route the matched route with `params` overlaid on the
    /// current parameters.
    pub fn uri_with(&self, params: &RouteParams) -> Result<String, DispatchError> {
        let matched = self.matched.as_ref().ok_or_else(|| DispatchError::RouteNotFound {
            uri: self.uri.clone(),
        })?;
        Ok(matched.route.uri(&matched.params.merged_with(params))?)
    }
}

/// First forwarded address, then `Client-IP`, then the peer address.
fn detect_client_ip(headers: &Headers, remote_addr: Option<&str>) -> String {
    headers
        .get("X-Forwarded-For")
        .and_then(|forwarded| forwarded.split(',').next())
        .or_else(|| headers.get("Client-IP"))
        .or(remote_addr)
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .unwrap_or("0.0.0.0")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn app() -> ApplicationConfig {
        ApplicationConfig {
            base_url: "/kohana/".into(),
            ..ApplicationConfig::default()
        }
    }

    #[test]
    fn test_new_normalizes_internal_targets() {
        let request = RequestContext::new("/foo//bar///baz/", &app());
        assert_eq!(request.uri(), "foo/bar/baz");
        assert!(!request.is_external());
        assert_eq!(request.method(), Method::Get);
    }

    #[test]
    fn test_new_classifies_external() {
        let request = RequestContext::new("http://example.com/uri", &app());
        assert!(request.is_external());
        assert_eq!(request.uri(), "http://example.com/uri");

        assert!(!RequestContext::new("foo/bar", &app()).is_external());
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("post".parse::<Method>().unwrap(), Method::Post);
        assert_eq!("OPTIONS".parse::<Method>().unwrap(), Method::Options);
        assert!("PATCH".parse::<Method>().is_err());
    }

    #[test]
    fn test_parse_query_lists() {
        let params = parse_query("a=1&b[]=2&b[]=3&a=4&name=J%C3%BCrgen+X");
        assert_eq!(params["a"], ParamValue::Single("4".into()));
        assert_eq!(params["b"], ParamValue::List(vec!["2".into(), "3".into()]));
        assert_eq!(params["name"].as_str(), Some("Jürgen X"));
    }

    #[test]
    fn test_from_environment() {
        let env = ServerEnvironment {
            request_uri: Some("/kohana/users/edit/42?tab=profile".into()),
            method: Some("POST".into()),
            query_string: Some("tab=profile".into()),
            headers: [
                ("Content-Type", "application/x-www-form-urlencoded"),
                ("User-Agent", "test-agent"),
                ("X-Forwarded-For", "10.0.0.1, 10.0.0.2"),
            ]
            .into_iter()
            .collect(),
            body: b"name=Ann".to_vec(),
            remote_addr: Some("127.0.0.1".into()),
            https: true,
            ..ServerEnvironment::default()
        };

        let request = RequestContext::from_environment(&env, &app(), None).unwrap();
        assert_eq!(request.uri(), "users/edit/42");
        assert_eq!(request.method(), Method::Post);
        assert_eq!(request.query_value("tab"), Some("profile"));
        assert_eq!(request.post_value("name"), Some("Ann"));
        assert_eq!(request.client_ip(), "10.0.0.1");
        assert_eq!(request.user_agent(), "test-agent");
        assert!(request.is_secure());
    }

    #[test]
    fn test_from_environment_detection_failure() {
        let err = RequestContext::from_environment(&ServerEnvironment::default(), &app(), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UriDetection);
    }

    #[test]
    fn test_from_environment_override_skips_detection() {
        let request =
            RequestContext::from_environment(&ServerEnvironment::default(), &app(), Some("a//b"))
                .unwrap();
        assert_eq!(request.uri(), "a/b");
    }

    #[test]
    fn test_headless_environment() {
        let env = ServerEnvironment {
            request_uri: Some("/ignored".into()),
            headless: Some(CliOptions::parse([
                "--uri=users/list",
                "--method=PUT",
                "--get=page=3",
                "--post=x[]=1&x[]=2",
            ])),
            ..ServerEnvironment::default()
        };

        let request = RequestContext::from_environment(&env, &app(), None).unwrap();
        assert_eq!(request.uri(), "users/list");
        assert_eq!(request.method(), Method::Put);
        assert_eq!(request.query_value("page"), Some("3"));
        assert_eq!(request.post()["x"].as_list(), vec!["1", "2"]);
    }

    #[test]
    fn test_client_ip_fallbacks() {
        let headers: Headers = [("Client-IP", "192.168.1.9")].into_iter().collect();
        assert_eq!(detect_client_ip(&headers, Some("127.0.0.1")), "192.168.1.9");
        assert_eq!(detect_client_ip(&Headers::new(), Some("127.0.0.1")), "127.0.0.1");
        assert_eq!(detect_client_ip(&Headers::new(), None), "0.0.0.0");
    }

    #[test]
    fn test_accept_parsing() {
        let mut request = RequestContext::new("", &app());
        request.set_header("Accept", "text/html;q=0.8, application/json, image/*;q=0.5");

        let types: Vec<_> = request.accept_types().into_iter().map(|(t, _)| t).collect();
        assert_eq!(types, vec!["application/json", "text/html", "image/*"]);
        assert_eq!(request.accepts_type("image/png"), 0.5);
        assert_eq!(request.accepts_type("text/plain"), 0.0);

        let plain = RequestContext::new("", &app());
        assert_eq!(plain.accepts_type("text/plain"), 1.0);
    }

    #[test]
    fn test_accept_language_and_encoding() {
        let mut request = RequestContext::new("", &app());
        assert!(request.accept_langs().is_empty());
        assert!(request.accept_encodings().is_empty());

        request.set_header("Accept-Language", "en;q=0.7, fr-CA, de;q=0.9");
        request.set_header("Accept-Encoding", "gzip;q=0.5, br");

        assert_eq!(
            request.accept_langs(),
            vec![("fr-ca".to_string(), 1.0), ("de".to_string(), 0.9), ("en".to_string(), 0.7)]
        );
        let encodings: Vec<_> = request.accept_encodings().into_iter().map(|(e, _)| e).collect();
        assert_eq!(encodings, vec!["br", "gzip"]);
    }

    #[test]
    fn test_is_ajax() {
        let mut request = RequestContext::new("", &app());
        assert!(!request.is_ajax());
        request.set_header("X-Requested-With", "XMLHttpRequest");
        assert!(request.is_ajax());
    }

    #[test]
    fn test_params_bound_once() {
        let route = Arc::new(Route::new("<controller>").unwrap());
        let mut request = RequestContext::new("users", &app());
        let params = route.matches("users").unwrap();

        request.bind_route(None, route.clone(), params.clone()).unwrap();
        assert_eq!(request.controller(), Some("users"));

        let err = request.bind_route(None, route, params).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParamsLocked);
    }

    #[test]
    fn test_uri_with_overlays_params() {
        let route = Arc::new(
            Route::new("<controller>(/<action>(/<id>))")
                .unwrap(),
        );
        let mut request = RequestContext::new("users/edit/42", &app());
        let params = route.matches(request.uri()).unwrap();
        request.bind_route(Some("default".into()), route, params).unwrap();

        let overlay: RouteParams = [("id", "43")].into_iter().collect();
        assert_eq!(request.uri_with(&overlay).unwrap(), "users/edit/43");
    }

    #[test]
    fn test_sub_request_inherits_client() {
        let mut parent = RequestContext::new("outer", &app());
        parent.set_client_ip("10.1.1.1");
        parent.set_method(Method::Post);

        let child = parent.sub_request("inner//page", &app());
        assert_eq!(child.uri(), "inner/page");
        assert_eq!(child.client_ip(), "10.1.1.1");
        assert_eq!(child.method(), Method::Get);
    }
}
