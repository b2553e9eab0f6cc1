//! Route templates: compilation, matching and reverse routing.
//!
//! # Responsibilities
//! - Parse a URI template (`<key>` placeholders, `(...)` optional groups)
//! - Compile it to an anchored regular expression
//! - Match a normalized URI and return named parameters
//! - Build a URI back from parameters (reverse routing)
//!
//! # Design Decisions
//! - The template is parsed once into a segment tree; the regex and reverse
//!   routing are both derived from that tree, never edited independently
//! - A non-match is `None`, not an error
//! - Reverse routing fails loudly when a required key has no value

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::routing::RouteError;

/// Pattern used for a `<key>` without an explicit constraint.
pub const DEFAULT_SEGMENT: &str = "[^/.,;?]+";

/// Action used when a route does not supply one.
pub const DEFAULT_ACTION: &str = "index";

/// Ordered parameter mapping produced by a match.
///
/// Keys keep the order in which they were captured; defaults are appended
/// after captured keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteParams {
    entries: Vec<(String, String)>,
}

impl RouteParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Insert a value, replacing an existing key in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Values in key order, as positional arguments.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Overlay `other` on top of `self`; keys from `other` win.
    pub fn merged_with(&self, other: &RouteParams) -> RouteParams {
        let mut merged = self.clone();
        for (key, value) in other.iter() {
            merged.insert(key, value);
        }
        merged
    }
}

impl<K, V> FromIterator<(K, V)> for RouteParams
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = RouteParams::new();
        for (key, value) in iter {
            params.insert(key, value);
        }
        params
    }
}

/// One piece of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Key(String),
    Group(Vec<Segment>),
}

/// A compiled route.
///
/// Built once from a template plus optional per-key constraints, then
/// stored in a [`RouteTable`](crate::routing::RouteTable).
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "RouteRecord", into = "RouteRecord")]
pub struct Route {
    uri: String,
    regex: BTreeMap<String, String>,
    defaults: BTreeMap<String, String>,
    segments: Vec<Segment>,
    compiled: Regex,
}

/// Serialized form of a route; the regex is rebuilt on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RouteRecord {
    uri: String,
    #[serde(default)]
    regex: BTreeMap<String, String>,
    #[serde(default)]
    defaults: BTreeMap<String, String>,
}

impl Route {
    /// Compile a template with no key constraints.
    pub fn new(uri: impl Into<String>) -> Result<Self, RouteError> {
        Self::with_regex(uri, BTreeMap::new())
    }

    /// Compile a template, overriding the segment pattern for some keys.
    pub fn with_regex(
        uri: impl Into<String>,
        regex: BTreeMap<String, String>,
    ) -> Result<Self, RouteError> {
        let uri = uri.into();
        let segments = parse_template(&uri).map_err(|reason| RouteError::InvalidPattern {
            template: uri.clone(),
            reason,
        })?;
        let source = compile(&segments, &regex);
        let compiled = Regex::new(&source).map_err(|e| RouteError::InvalidPattern {
            template: uri.clone(),
            reason: e.to_string(),
        })?;

        let mut defaults = BTreeMap::new();
        defaults.insert("action".to_string(), DEFAULT_ACTION.to_string());

        Ok(Self {
            uri,
            regex,
            defaults,
            segments,
            compiled,
        })
    }

    /// Set the fallback values used when a key is not captured.
    ///
    /// The `action` default is kept unless `defaults` overrides it.
    pub fn with_defaults<K, V, I>(mut self, defaults: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in defaults {
            self.defaults.insert(key.into(), value.into());
        }
        self
    }

    pub fn uri_template(&self) -> &str {
        &self.uri
    }

    pub fn regex(&self) -> &BTreeMap<String, String> {
        &self.regex
    }

    pub fn defaults(&self) -> &BTreeMap<String, String> {
        &self.defaults
    }

    /// The anchored expression this route matches with.
    pub fn compiled_source(&self) -> &str {
        self.compiled.as_str()
    }

    /// Match a normalized URI.
    ///
    /// Returns the named captures merged with defaults, or `None`.
    pub fn matches(&self, uri: &str) -> Option<RouteParams> {
        let captures = self.compiled.captures(uri)?;

        let mut params = RouteParams::new();
        for name in self.compiled.capture_names().flatten() {
            if let Some(value) = captures.name(name) {
                params.insert(name, value.as_str());
            }
        }

        for (key, value) in &self.defaults {
            if params.get(key).map_or(true, str::is_empty) {
                params.insert(key.as_str(), value.as_str());
            }
        }

        Some(params)
    }

    /// Build a URI from parameters (reverse routing).
    ///
    /// Caller values win over defaults. An optional group is dropped when
    /// any key inside it is missing or empty; a missing top-level key is an
    /// error.
    pub fn uri(&self, params: &RouteParams) -> Result<String, RouteError> {
        if !self.uri.contains('<') && !self.uri.contains('(') {
            return Ok(self.uri.clone());
        }

        let mut merged = params.clone();
        for (key, value) in &self.defaults {
            if !merged.contains_key(key) {
                merged.insert(key.as_str(), value.as_str());
            }
        }

        let mut uri = String::with_capacity(self.uri.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => uri.push_str(text),
                Segment::Key(key) => match merged.get(key) {
                    Some(value) if !value.is_empty() => uri.push_str(value),
                    _ => return Err(RouteError::MissingParameter { key: key.clone() }),
                },
                Segment::Group(inner) => {
                    if let Some(text) = render_optional(inner, &merged) {
                        uri.push_str(&text);
                    }
                }
            }
        }

        let mut uri = collapse_slashes(&uri);
        if uri.ends_with('/') {
            uri.pop();
        }
        Ok(uri)
    }
}

impl PartialEq for Route {
    fn eq(&self, other: &Self) -> bool {
        self.uri == other.uri && self.regex == other.regex && self.defaults == other.defaults
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("uri", &self.uri)
            .field("regex", &self.regex)
            .field("defaults", &self.defaults)
            .field("compiled", &self.compiled.as_str())
            .finish()
    }
}

impl TryFrom<RouteRecord> for Route {
    type Error = RouteError;

    fn try_from(record: RouteRecord) -> Result<Self, Self::Error> {
        Ok(Route::with_regex(record.uri, record.regex)?.with_defaults(record.defaults))
    }
}

impl From<Route> for RouteRecord {
    fn from(route: Route) -> Self {
        RouteRecord {
            uri: route.uri,
            regex: route.regex,
            defaults: route.defaults,
        }
    }
}

/// Render an optional group, or `None` if any of its own keys is unset.
/// Nested groups are resolved first and dropped independently.
fn render_optional(segments: &[Segment], params: &RouteParams) -> Option<String> {
    let mut text = String::new();
    for segment in segments {
        match segment {
            Segment::Literal(literal) => text.push_str(literal),
            Segment::Key(key) => match params.get(key) {
                Some(value) if !value.is_empty() => text.push_str(value),
                _ => return None,
            },
            Segment::Group(inner) => {
                if let Some(nested) = render_optional(inner, params) {
                    text.push_str(&nested);
                }
            }
        }
    }
    Some(text)
}

fn parse_template(template: &str) -> Result<Vec<Segment>, String> {
    let mut stack: Vec<Vec<Segment>> = vec![Vec::new()];
    let mut literal = String::new();
    let mut chars = template.char_indices();

    fn flush(literal: &mut String, stack: &mut [Vec<Segment>]) {
        if !literal.is_empty() {
            if let Some(top) = stack.last_mut() {
                top.push(Segment::Literal(std::mem::take(literal)));
            }
        }
    }

    while let Some((index, c)) = chars.next() {
        match c {
            '(' => {
                flush(&mut literal, &mut stack);
                stack.push(Vec::new());
            }
            ')' => {
                flush(&mut literal, &mut stack);
                if stack.len() == 1 {
                    return Err(format!("unbalanced ')' at offset {index}"));
                }
                let group = stack.pop().unwrap_or_default();
                if let Some(top) = stack.last_mut() {
                    top.push(Segment::Group(group));
                }
            }
            '<' => {
                flush(&mut literal, &mut stack);
                let rest = &template[index + 1..];
                let end = rest
                    .find('>')
                    .ok_or_else(|| format!("unterminated placeholder at offset {index}"))?;
                let key = &rest[..end];
                if key.is_empty()
                    || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    return Err(format!("invalid placeholder name '{key}'"));
                }
                // key is ASCII, so its byte length equals its char count
                for _ in 0..=key.len() {
                    chars.next();
                }
                if let Some(top) = stack.last_mut() {
                    top.push(Segment::Key(key.to_string()));
                }
            }
            '>' => return Err(format!("unexpected '>' at offset {index}")),
            other => literal.push(other),
        }
    }

    flush(&mut literal, &mut stack);
    if stack.len() != 1 {
        return Err("unbalanced '('".to_string());
    }
    Ok(stack.pop().unwrap_or_default())
}

fn compile(segments: &[Segment], constraints: &BTreeMap<String, String>) -> String {
    fn push(segments: &[Segment], constraints: &BTreeMap<String, String>, out: &mut String) {
        for segment in segments {
            match segment {
                Segment::Literal(text) => out.push_str(&regex::escape(text)),
                Segment::Key(key) => {
                    let pattern = constraints.get(key).map_or(DEFAULT_SEGMENT, String::as_str);
                    out.push_str("(?P<");
                    out.push_str(key);
                    out.push('>');
                    out.push_str(pattern);
                    out.push(')');
                }
                Segment::Group(inner) => {
                    out.push_str("(?:");
                    push(inner, constraints, out);
                    out.push_str(")?");
                }
            }
        }
    }

    let mut out = String::from("^");
    push(segments, constraints, &mut out);
    out.push('$');
    out
}

/// Collapse runs of `/` into one.
pub fn collapse_slashes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut previous_slash = false;
    for c in input.chars() {
        if c == '/' {
            if !previous_slash {
                out.push(c);
            }
            previous_slash = true;
        } else {
            out.push(c);
            previous_slash = false;
        }
    }
    out
}
