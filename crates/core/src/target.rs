//! Audit target validation and normalization.
//!
//! A target is accepted when, after trimming and defaulting a missing
//! scheme to `https://`, it parses as an absolute `http`/`https` URL with
//! a host. Everything is checked locally so that invalid input never
//! reaches the network.

use url::Url;

use crate::error::CoreError;

/// Longest target accepted, in bytes.
pub const MAX_TARGET_LENGTH: usize = 2048;

/// Scheme applied when the caller omits one.
pub const DEFAULT_SCHEME: &str = "https";

/// Schemes that are never audited, even though they parse as URLs.
const BLOCKED_SCHEMES: &[&str] = &["javascript", "data", "vbscript", "file", "ftp"];

/// Schemes the remote analyzer can fetch.
const ALLOWED_SCHEMES: &[&str] = &["http", "https"];

/// Validate `raw` and return its normalized absolute form.
///
/// `"example.com"` becomes `"https://example.com/"`; scheme and host are
/// lowercased by URL parsing.
pub fn normalize_target(raw: &str) -> Result<String, CoreError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidInput("target must not be empty".into()));
    }
    if trimmed.len() > MAX_TARGET_LENGTH {
        return Err(CoreError::InvalidInput(format!(
            "target exceeds maximum length of {MAX_TARGET_LENGTH}"
        )));
    }

    let candidate = match explicit_scheme(trimmed) {
        Some(scheme) if BLOCKED_SCHEMES.contains(&scheme.as_str()) => {
            return Err(CoreError::InvalidInput(format!("blocked scheme: {scheme}")));
        }
        Some(_) => trimmed.to_string(),
        None => format!("{DEFAULT_SCHEME}://{trimmed}"),
    };

    let url = Url::parse(&candidate)
        .map_err(|e| CoreError::InvalidInput(format!("failed to parse target: {e}")))?;

    if !ALLOWED_SCHEMES.contains(&url.scheme()) {
        return Err(CoreError::InvalidInput(format!(
            "only http/https targets are allowed, got: {}",
            url.scheme()
        )));
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url.to_string()),
        _ => Err(CoreError::InvalidInput("target is missing a host".into())),
    }
}

/// Compare two targets as the analyzer reports them.
///
/// The history endpoint echoes the URL as submitted, which may or may not
/// carry a trailing slash, so that difference is ignored. Scheme and host
/// are compared case-insensitively.
pub fn targets_match(a: &str, b: &str) -> bool {
    canonical(a) == canonical(b)
}

fn canonical(target: &str) -> String {
    let trimmed = target.trim();
    let normalized = normalize_target(trimmed).unwrap_or_else(|_| trimmed.to_string());
    normalized.trim_end_matches('/').to_string()
}

/// Return the lowercased scheme if `raw` starts with one.
///
/// `host:port` forms such as `localhost:8080` are not treated as a scheme;
/// only `scheme://` or one of the blocked pseudo-URL schemes count.
fn explicit_scheme(raw: &str) -> Option<String> {
    let (scheme, rest) = raw.split_once(':')?;
    let valid = !scheme.is_empty()
        && scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.');
    if !valid {
        return None;
    }
    let scheme = scheme.to_ascii_lowercase();
    if rest.starts_with("//") || BLOCKED_SCHEMES.contains(&scheme.as_str()) {
        Some(scheme)
    } else {
        None
    }
}
