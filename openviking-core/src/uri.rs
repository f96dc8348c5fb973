//! The `viking://` URI grammar and URI ⇄ backing-path mapping.
//!
//! URIs are the system's primary key: `viking://{scope}[/{space}]/{path...}`.
//! They are tenant-agnostic on the wire; the per-request account is injected
//! only when mapping to a backing path (`/local/{account_id}/{remainder}`).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, VikingError};

/// URI scheme prefix.
pub const SCHEME: &str = "viking://";

/// Scopes exposed to callers. Unknown future scopes round-trip opaquely.
pub const VISIBLE_SCOPES: &[&str] = &[
    "resources",
    "user",
    "agent",
    "session",
    "temp",
    "transactions",
];

/// Reserved internal scope, never exposed.
pub const SYSTEM_SCOPE: &str = "_system";

/// Maximum byte length of a single path component in the backing store.
pub const MAX_COMPONENT_BYTES: usize = 255;

/// A parsed `viking://` URI.
///
/// Stored as normalized segments; trailing slashes are not significant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VikingUri {
    segments: Vec<String>,
}

impl VikingUri {
    /// Parse a `viking://` URI string.
    pub fn parse(raw: &str) -> Result<Self> {
        let rest = raw
            .strip_prefix(SCHEME)
            .ok_or_else(|| VikingError::invalid_argument(format!("not a viking URI: {raw}")))?;

        let segments: Vec<String> = rest
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();

        if segments.is_empty() {
            return Err(VikingError::invalid_argument(format!(
                "viking URI has no scope: {raw}"
            )));
        }

        Ok(Self { segments })
    }

    /// The scope segment (`resources`, `user`, ...).
    pub fn scope(&self) -> &str {
        &self.segments[0]
    }

    /// The space segment for `user`/`agent`/`session` scopes.
    pub fn space(&self) -> Option<&str> {
        match self.scope() {
            "user" | "agent" | "session" => self.segments.get(1).map(|s| s.as_str()),
            _ => None,
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last path segment.
    pub fn name(&self) -> &str {
        self.segments.last().map(|s| s.as_str()).unwrap_or_default()
    }

    /// Parent URI, or `None` for scope roots.
    pub fn parent(&self) -> Option<VikingUri> {
        if self.segments.len() <= 1 {
            return None;
        }
        Some(VikingUri {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Join a relative path onto this URI.
    pub fn join(&self, rel: &str) -> VikingUri {
        let mut segments = self.segments.clone();
        segments.extend(rel.split('/').filter(|s| !s.is_empty()).map(String::from));
        VikingUri { segments }
    }

    /// Whether this URI equals `base` or lives underneath it.
    pub fn starts_with(&self, base: &VikingUri) -> bool {
        self.segments.len() >= base.segments.len()
            && self.segments[..base.segments.len()] == base.segments[..]
    }

    pub fn is_system(&self) -> bool {
        self.scope() == SYSTEM_SCOPE
    }
}

impl fmt::Display for VikingUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", SCHEME, self.segments.join("/"))
    }
}

impl FromStr for VikingUri {
    type Err = VikingError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VikingUri {
    type Error = VikingError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<VikingUri> for String {
    fn from(uri: VikingUri) -> String {
        uri.to_string()
    }
}

/// Parent URI as a string; empty for scope roots.
pub fn parent_uri_str(uri: &str) -> String {
    match VikingUri::parse(uri) {
        Ok(parsed) => parsed.parent().map(|p| p.to_string()).unwrap_or_default(),
        Err(_) => String::new(),
    }
}

/// Shorten one path component so it fits the backing store's limit.
///
/// Components of at most [`MAX_COMPONENT_BYTES`] bytes pass through verbatim.
/// Longer ones become `{prefix}_{8-hex}` where the hex is the SHA-256 of the
/// original component, so the result is deterministic for a given input.
pub fn shorten_component(component: &str) -> String {
    if component.len() <= MAX_COMPONENT_BYTES {
        return component.to_string();
    }

    let digest = Sha256::digest(component.as_bytes());
    let suffix = hex::encode(&digest[..4]);

    // Leave room for "_" + 8 hex chars; cut at a char boundary.
    let mut end = MAX_COMPONENT_BYTES - 1 - suffix.len();
    while end > 0 && !component.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}_{}", &component[..end], suffix)
}

/// Map a URI to its backing path for a given account.
pub fn uri_to_path(uri: &str, account_id: &str) -> Result<String> {
    let parsed = VikingUri::parse(uri)?;
    let mut path = format!("/local/{account_id}");
    for segment in parsed.segments() {
        path.push('/');
        path.push_str(&shorten_component(segment));
    }
    Ok(path)
}

/// Map a backing path back to its URI, stripping the account prefix.
pub fn path_to_uri(path: &str, account_id: &str) -> Result<String> {
    let prefix = format!("/local/{account_id}/");
    let rest = path
        .strip_prefix(&prefix)
        .ok_or_else(|| {
            VikingError::invalid_argument(format!("path {path} is not under account {account_id}"))
        })?
        .trim_matches('/');
    if rest.is_empty() {
        return Err(VikingError::invalid_argument(format!(
            "path {path} has no URI remainder"
        )));
    }
    Ok(format!("{SCHEME}{rest}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let uri = VikingUri::parse("viking://resources/guides/x.md").unwrap();
        assert_eq!(uri.scope(), "resources");
        assert_eq!(uri.name(), "x.md");
        assert_eq!(uri.to_string(), "viking://resources/guides/x.md");
    }

    #[test]
    fn test_trailing_slash_normalized() {
        let uri = VikingUri::parse("viking://temp/").unwrap();
        assert_eq!(uri.to_string(), "viking://temp");
    }

    #[test]
    fn test_space_segment() {
        let uri = VikingUri::parse("viking://user/alice/memories/n.md").unwrap();
        assert_eq!(uri.space(), Some("alice"));

        let uri = VikingUri::parse("viking://resources/guides").unwrap();
        assert_eq!(uri.space(), None);
    }

    #[test]
    fn test_parent() {
        let uri = VikingUri::parse("viking://resources/guides/x.md").unwrap();
        assert_eq!(
            uri.parent().unwrap().to_string(),
            "viking://resources/guides"
        );
        assert!(VikingUri::parse("viking://resources").unwrap().parent().is_none());
        assert_eq!(parent_uri_str("viking://resources"), "");
    }

    #[test]
    fn test_rejects_non_viking() {
        assert!(VikingUri::parse("http://example.com").is_err());
        assert!(VikingUri::parse("viking://").is_err());
    }

    #[test]
    fn test_path_round_trip() {
        let uri = "viking://user/alice/memories/notes/n.md";
        let path = uri_to_path(uri, "acme").unwrap();
        assert_eq!(path, "/local/acme/user/alice/memories/notes/n.md");
        assert_eq!(path_to_uri(&path, "acme").unwrap(), uri);
    }

    #[test]
    fn test_shorten_boundary_255() {
        let component = "a".repeat(255);
        assert_eq!(shorten_component(&component), component);
    }

    #[test]
    fn test_shorten_boundary_256() {
        let component = "a".repeat(256);
        let short = shorten_component(&component);
        assert!(short.len() <= 255);
        assert_ne!(short, component);
        // Deterministic: same input, same output.
        assert_eq!(short, shorten_component(&component));
    }

    #[test]
    fn test_shorten_distinct_inputs_differ() {
        let a = shorten_component(&"a".repeat(300));
        let b = shorten_component(&format!("{}b", "a".repeat(299)));
        assert_ne!(a, b);
    }

    #[test]
    fn test_starts_with() {
        let base = VikingUri::parse("viking://resources/guides").unwrap();
        let child = VikingUri::parse("viking://resources/guides/x.md").unwrap();
        let other = VikingUri::parse("viking://resources/guidesx").unwrap();
        assert!(child.starts_with(&base));
        assert!(base.starts_with(&base));
        assert!(!other.starts_with(&base));
    }
}
