//! Outbound delegation for external targets.
//!
//! # Responsibilities
//! - Forward an external request (method, headers, cookies, body)
//! - Wrap the reply in a `ResponseEnvelope`
//!
//! # Design Decisions
//! - Fixed connect and request timeouts, no retries
//! - A non-2xx reply is still a reply: it comes back as an envelope with
//!   that status; only transport failures are errors

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ExternalConfig;
use crate::http::request::{ParamValue, Params, RequestContext};
use crate::http::response::ResponseEnvelope;

/// Headers that describe one hop and are not copied across.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, Error)]
pub enum ExternalError {
    #[error("failed to build external client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("external request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("external target returned unsupported status {0}")]
    UnsupportedStatus(u16),

    #[error("invalid external request: {0}")]
    InvalidRequest(String),
}

/// Executes requests whose target lies outside the application.
#[async_trait]
pub trait ExternalClient: Send + Sync {
    async fn execute(&self, request: &RequestContext) -> Result<ResponseEnvelope, ExternalError>;
}

/// `reqwest`-backed external client.
#[derive(Debug, Clone)]
pub struct HttpExternalClient {
    client: reqwest::Client,
}

impl HttpExternalClient {
    pub fn new(config: &ExternalConfig) -> Result<Self, ExternalError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(ExternalError::Client)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ExternalClient for HttpExternalClient {
    async fn execute(&self, request: &RequestContext) -> Result<ResponseEnvelope, ExternalError> {
        let url = request.uri().to_string();
        let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
            .map_err(|e| ExternalError::InvalidRequest(e.to_string()))?;

        let mut builder = self.client.request(method, &url);
        for (name, value) in request.headers().iter() {
            if !HOP_BY_HOP.contains(&name.to_ascii_lowercase().as_str()) {
                builder = builder.header(name, value);
            }
        }
        if !request.query().is_empty() {
            builder = builder.query(&flatten(request.query()));
        }
        if !request.post().is_empty() {
            builder = builder.form(&flatten(request.post()));
        } else if !request.body().is_empty() {
            builder = builder.body(request.body().to_vec());
        }

        tracing::debug!(url = %url, method = %request.method(), "Forwarding external request");

        let reply = builder.send().await.map_err(|source| ExternalError::Request {
            url: url.clone(),
            source,
        })?;

        let status = reply.status().as_u16();
        let mut response = ResponseEnvelope::new();
        response
            .set_status(status)
            .map_err(|_| ExternalError::UnsupportedStatus(status))?;

        response.headers_mut().remove("Content-Type");
        for (name, value) in reply.headers() {
            if HOP_BY_HOP.contains(&name.as_str()) {
                continue;
            }
            if let Ok(value) = value.to_str() {
                response.headers_mut().append(name.as_str(), value);
            }
        }

        let body = reply
            .bytes()
            .await
            .map_err(|source| ExternalError::Request { url, source })?;
        response.set_body(body.to_vec());

        if !reply_is_success(status) {
            tracing::warn!(status, "External target answered with an error status");
        }
        Ok(response)
    }
}

fn reply_is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Parameter pairs with list values repeated under `name[]`.
fn flatten(params: &Params) -> Vec<(String, String)> {
    params
        .iter()
        .flat_map(|(key, value)| match value {
            ParamValue::Single(v) => vec![(key.clone(), v.clone())],
            ParamValue::List(values) => values
                .iter()
                .map(|v| (format!("{key}[]"), v.clone()))
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::parse_query;

    #[test]
    fn test_flatten_lists() {
        let params = parse_query("a=1&b[]=2&b[]=3");
        assert_eq!(
            flatten(&params),
            vec![
                ("a".to_string(), "1".to_string()),
                ("b[]".to_string(), "2".to_string()),
                ("b[]".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn test_client_builds_with_defaults() {
        assert!(HttpExternalClient::new(&ExternalConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_connection_refused_is_error() {
        let client = HttpExternalClient::new(&ExternalConfig {
            connect_timeout_secs: 1,
            request_timeout_secs: 1,
        })
        .unwrap();

        let app = crate::config::ApplicationConfig::default();
        let request = RequestContext::new("http://127.0.0.1:1/unreachable", &app);
        assert!(request.is_external());

        let err = client.execute(&request).await.unwrap_err();
        assert!(matches!(err, ExternalError::Request { .. }));
    }
}
