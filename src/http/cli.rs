//! Headless argument source.
//!
//! When a request is issued from a terminal instead of a web server, the
//! URI, method and parameters come from `--name=value` options.
//! Unrecognized options and bare tokens are ignored.

/// Request overrides taken from command-line options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOptions {
    /// `--uri`: request path.
    pub uri: Option<String>,
    /// `--method`: HTTP method name.
    pub method: Option<String>,
    /// `--get`: query string applied to query parameters.
    pub get: Option<String>,
    /// `--post`: query string applied to body parameters.
    pub post: Option<String>,
}

impl CliOptions {
    /// Parse options from raw arguments (without the program name).
    pub fn parse<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = CliOptions::default();
        for arg in args {
            let Some(option) = arg.as_ref().strip_prefix("--") else {
                continue;
            };
            let (name, value) = match option.split_once('=') {
                Some((name, value)) => (name, Some(value.to_string())),
                None => (option, None),
            };
            match name {
                "uri" => options.uri = value,
                "method" => options.method = value,
                "get" => options.get = value,
                "post" => options.post = value,
                _ => tracing::trace!(option = %name, "Ignoring unrecognized option"),
            }
        }
        options
    }
}
