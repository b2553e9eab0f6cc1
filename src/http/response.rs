//! Response envelope.
//!
//! # Responsibilities
//! - Hold status, headers, cookies and body produced by a dispatch
//! - Enforce the closed status table
//! - Model cookie deletion as an expiry instruction
//! - Render the raw wire form for boundaries that cache whole responses
//!
//! # Design Decisions
//! - A fresh envelope is `200` with an HTML content type
//! - Headers are flushed at most once; the flag is informational for the
//!   output boundary, the envelope stays mutable for the caller

use std::collections::BTreeMap;

use chrono::{Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};

use crate::error::DispatchError;
use crate::http::headers::Headers;
use crate::http::status;

/// Options applied when setting a cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    /// Lifetime in seconds from now; `0` is a session cookie, negative is
    /// already expired.
    pub expires: i64,
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            expires: 0,
            path: "/".to_string(),
            domain: None,
            secure: false,
            http_only: false,
        }
    }
}

/// A cookie instruction for the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub value: String,
    pub options: CookieOptions,
}

impl Cookie {
    pub fn is_expired(&self) -> bool {
        self.options.expires < 0
    }

    /// `Set-Cookie` header value for this cookie.
    pub fn header_value(&self, name: &str) -> String {
        let mut value = format!("{}={}", name, self.value);
        if self.options.expires != 0 {
            let expires_at = Utc::now() + ChronoDuration::seconds(self.options.expires);
            value.push_str(&format!(
                "; expires={}; Max-Age={}",
                expires_at.format("%a, %d %b %Y %H:%M:%S GMT"),
                self.options.expires.max(0)
            ));
        }
        value.push_str("; path=");
        value.push_str(&self.options.path);
        if let Some(domain) = &self.options.domain {
            value.push_str("; domain=");
            value.push_str(domain);
        }
        if self.options.secure {
            value.push_str("; secure");
        }
        if self.options.http_only {
            value.push_str("; httponly");
        }
        value
    }
}

/// Status, headers, cookies and body of one response.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    protocol: String,
    status: u16,
    headers: Headers,
    cookies: BTreeMap<String, Cookie>,
    body: Vec<u8>,
    headers_sent: bool,
}

impl Default for ResponseEnvelope {
    fn default() -> Self {
        let mut headers = Headers::new();
        headers.set("Content-Type", "text/html; charset=utf-8");
        Self {
            protocol: "HTTP/1.1".to_string(),
            status: 200,
            headers,
            cookies: BTreeMap::new(),
            body: Vec::new(),
            headers_sent: false,
        }
    }
}

impl ResponseEnvelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Set the status; codes outside the reason-phrase table are rejected.
    pub fn set_status(&mut self, code: u16) -> Result<(), DispatchError> {
        if !status::is_known(code) {
            return Err(DispatchError::InvalidStatus(code));
        }
        self.status = code;
        Ok(())
    }

    pub fn reason(&self) -> &'static str {
        status::reason_phrase(self.status).unwrap_or("")
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn set_protocol(&mut self, protocol: impl Into<String>) {
        self.protocol = protocol.into();
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    pub fn append_body(&mut self, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
    }

    pub fn content_length(&self) -> usize {
        self.body.len()
    }

    pub fn cookies(&self) -> &BTreeMap<String, Cookie> {
        &self.cookies
    }

    pub fn cookie(&self, name: &str) -> Option<&Cookie> {
        self.cookies.get(name)
    }

    pub fn set_cookie(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        options: CookieOptions,
    ) {
        self.cookies.insert(
            name.into(),
            Cookie {
                value: value.into(),
                options,
            },
        );
    }

    /// Instruct the client to expire a cookie.
    ///
    /// Deleting a cookie that was never set is not an error.
    pub fn delete_cookie(&mut self, name: impl Into<String>) {
        let name = name.into();
        let options = self
            .cookies
            .get(&name)
            .map(|cookie| cookie.options.clone())
            .unwrap_or_default();
        self.cookies.insert(
            name,
            Cookie {
                value: String::new(),
                options: CookieOptions {
                    expires: -86_400,
                    ..options
                },
            },
        );
    }

    /// Redirect to `url`; only 3xx codes from the status table are accepted.
    pub fn redirect(&mut self, url: impl Into<String>, code: u16) -> Result<(), DispatchError> {
        if !(300..400).contains(&code) {
            return Err(DispatchError::InvalidStatus(code));
        }
        self.set_status(code)?;
        self.headers.set("Location", url);
        Ok(())
    }

    /// Quoted hex SHA-256 of the body.
    pub fn generate_etag(&self) -> String {
        format!("\"{}\"", hex::encode(Sha256::digest(&self.body)))
    }

    /// Attach an ETag and answer `304` when the client already has it.
    ///
    /// Returns `true` when the response was turned into a `304`.
    pub fn check_cache(&mut self, if_none_match: Option<&str>, etag: Option<String>) -> bool {
        let etag = etag.unwrap_or_else(|| self.generate_etag());
        self.headers.set("ETag", etag.as_str());
        self.headers.set("Cache-Control", "must-revalidate");

        if if_none_match == Some(etag.as_str()) {
            self.status = 304;
            self.body.clear();
            return true;
        }
        false
    }

    /// Headers followed by one `Set-Cookie` line per cookie.
    pub fn header_lines(&self) -> Vec<(String, String)> {
        let mut lines: Vec<(String, String)> = self
            .headers
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        for (name, cookie) in &self.cookies {
            lines.push(("Set-Cookie".to_string(), cookie.header_value(name)));
        }
        lines
    }

    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    /// Mark headers as flushed; returns `false` if they already were.
    pub fn mark_headers_sent(&mut self) -> bool {
        !std::mem::replace(&mut self.headers_sent, true)
    }

    /// Raw wire form: status line, header lines, blank line, body.
    pub fn render(&self) -> Vec<u8> {
        let mut out = format!("{} {} {}\n", self.protocol, self.status, self.reason());
        let lines: Vec<String> = self
            .header_lines()
            .into_iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .collect();
        out.push_str(&lines.join("\n"));
        out.push_str("\n\n");

        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_defaults() {
        let response = ResponseEnvelope::new();
        assert_eq!(response.status(), 200);
        assert_eq!(response.reason(), "OK");
        assert_eq!(response.header("content-type"), Some("text/html; charset=utf-8"));
        assert!(response.body().is_empty());
    }

    #[test]
    fn test_status_table_enforced() {
        let mut response = ResponseEnvelope::new();
        let err = response.set_status(999).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStatus);
        assert_eq!(response.status(), 200);

        response.set_status(404).unwrap();
        assert_eq!(response.reason(), "Not Found");
    }

    #[test]
    fn test_cookie_deletion_is_expiry() {
        let mut response = ResponseEnvelope::new();
        response.set_cookie(
            "session",
            "abc",
            CookieOptions {
                http_only: true,
                ..CookieOptions::default()
            },
        );
        response.delete_cookie("session");

        let cookie = response.cookie("session").unwrap();
        assert!(cookie.is_expired());
        assert!(cookie.value.is_empty());
        assert!(cookie.options.http_only);
        assert!(cookie.header_value("session").contains("Max-Age=0"));
    }

    #[test]
    fn test_delete_absent_cookie() {
        let mut response = ResponseEnvelope::new();
        response.delete_cookie("missing");
        response.delete_cookie("missing");
        assert_eq!(response.cookies().len(), 1);
        assert!(response.cookie("missing").unwrap().is_expired());
    }

    #[test]
    fn test_session_cookie_header() {
        let cookie = Cookie {
            value: "1".into(),
            options: CookieOptions {
                domain: Some("example.com".into()),
                secure: true,
                ..CookieOptions::default()
            },
        };
        assert_eq!(
            cookie.header_value("n"),
            "n=1; path=/; domain=example.com; secure"
        );
    }

    #[test]
    fn test_redirect() {
        let mut response = ResponseEnvelope::new();
        response.redirect("/login", 302).unwrap();
        assert_eq!(response.status(), 302);
        assert_eq!(response.header("Location"), Some("/login"));

        assert!(response.redirect("/x", 200).is_err());
        assert!(response.redirect("/x", 306).is_err());
    }

    #[test]
    fn test_check_cache() {
        let mut response = ResponseEnvelope::new();
        response.set_body("hello");
        let etag = response.generate_etag();

        assert!(!response.check_cache(Some("\"other\""), None));
        assert_eq!(response.header("ETag"), Some(etag.as_str()));
        assert_eq!(response.status(), 200);

        assert!(response.check_cache(Some(&etag), None));
        assert_eq!(response.status(), 304);
        assert!(response.body().is_empty());
    }

    #[test]
    fn test_render_wire_format() {
        let mut response = ResponseEnvelope::new();
        response.set_status(404).unwrap();
        response.set_header("X-Test", "1");
        response.set_body("missing");

        let rendered = String::from_utf8(response.render()).unwrap();
        assert_eq!(
            rendered,
            "HTTP/1.1 404 Not Found\nContent-Type: text/html; charset=utf-8\nX-Test: 1\n\nmissing"
        );
    }

    #[test]
    fn test_headers_flushed_once() {
        let mut response = ResponseEnvelope::new();
        assert!(response.mark_headers_sent());
        assert!(!response.mark_headers_sent());
        assert!(response.headers_sent());
    }
}
