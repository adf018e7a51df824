//! Host and base-path matching primitives.
//!
//! # Responsibilities
//! - Normalise the request host (case-insensitive, port stripped)
//! - Classify virtual host patterns into exact, wildcard and host-less tiers
//! - Segment-aware base path matching
//!
//! # Design Decisions
//! - Host matching is case-insensitive (per HTTP spec)
//! - Path matching is case-sensitive
//! - `*.acme.com` matches any deeper subdomain but never `acme.com` itself
//! - No regex to guarantee O(n) matching

/// Host side of a virtual host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostPattern {
    /// Lower-cased host without port.
    Exact(String),
    /// Suffix after `*.`, lower-cased.
    Wildcard(String),
    /// Host-less entry, matches any host.
    Any,
}

impl HostPattern {
    pub fn parse(host: Option<&str>) -> Self {
        match host.map(str::trim).filter(|h| !h.is_empty() && *h != "*") {
            None => HostPattern::Any,
            Some(h) => match h.strip_prefix("*.") {
                Some(suffix) => HostPattern::Wildcard(suffix.to_ascii_lowercase()),
                None => HostPattern::Exact(normalize_host(h).unwrap_or_default()),
            },
        }
    }

    /// `host` must already be normalised.
    pub fn matches(&self, host: Option<&str>) -> bool {
        match (self, host) {
            (HostPattern::Any, _) => true,
            (HostPattern::Exact(expected), Some(h)) => expected == h,
            (HostPattern::Wildcard(suffix), Some(h)) => wildcard_matches(suffix, h),
            (_, None) => false,
        }
    }
}

/// Lower-case the host and drop the port. IPv6 literals keep their brackets.
pub fn normalize_host(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let host = if raw.starts_with('[') {
        match raw.find(']') {
            Some(end) => &raw[..=end],
            None => raw,
        }
    } else {
        match raw.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
            _ => raw,
        }
    };

    let host = host.trim_end_matches('.');
    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}

pub fn wildcard_matches(suffix: &str, host: &str) -> bool {
    host.len() > suffix.len() + 1
        && host.ends_with(suffix)
        && host.as_bytes()[host.len() - suffix.len() - 1] == b'.'
}

/// Segment-aware prefix match: `/teams` matches `/teams`, `/teams/` and
/// `/teams/x` but not `/teamss`. The root base path matches everything.
pub fn path_matches(base: &str, path: &str) -> bool {
    if base == "/" {
        return true;
    }
    match path.strip_prefix(base) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Path left after stripping the matched base path. Always starts with `/`.
pub fn path_info<'a>(base: &str, path: &'a str) -> &'a str {
    if base == "/" {
        return if path.is_empty() { "/" } else { path };
    }
    match path.strip_prefix(base) {
        Some("") | None => "/",
        Some(rest) => rest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_matcher() {
        let exact = HostPattern::parse(Some("Example.com"));
        assert_eq!(exact, HostPattern::Exact("example.com".into()));
        assert!(exact.matches(Some("example.com")));
        assert!(!exact.matches(Some("other.com")));
        assert!(!exact.matches(None));

        assert_eq!(HostPattern::parse(None), HostPattern::Any);
        assert_eq!(HostPattern::parse(Some("")), HostPattern::Any);
        assert!(HostPattern::Any.matches(None));
    }

    #[test]
    fn test_wildcard_host_matcher() {
        let wildcard = HostPattern::parse(Some("*.acme.com"));
        assert!(wildcard.matches(Some("api.acme.com")));
        assert!(wildcard.matches(Some("deep.api.acme.com")));
        assert!(!wildcard.matches(Some("acme.com")));
        assert!(!wildcard.matches(Some("notacme.com")));
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("API.Test:8080").as_deref(), Some("api.test"));
        assert_eq!(normalize_host("api.test.").as_deref(), Some("api.test"));
        assert_eq!(normalize_host("[::1]:8080").as_deref(), Some("[::1]"));
        assert_eq!(normalize_host("  "), None);
    }

    #[test]
    fn test_path_matcher() {
        assert!(path_matches("/teams", "/teams"));
        assert!(path_matches("/teams", "/teams/"));
        assert!(path_matches("/teams", "/teams/42"));
        assert!(!path_matches("/teams", "/teamss"));
        assert!(!path_matches("/teams", "/team"));
        assert!(path_matches("/", "/anything"));
    }

    #[test]
    fn test_path_info() {
        assert_eq!(path_info("/v1", "/v1/users"), "/users");
        assert_eq!(path_info("/v1", "/v1"), "/");
        assert_eq!(path_info("/", "/health"), "/health");
    }
}
