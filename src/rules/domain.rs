//! Domain hierarchy walking
//!
//! Every ownership, exclusion and blend lookup is a walk from the requested
//! domain up through its parents:
//!
//! ```text
//! api.shop.example.com -> shop.example.com -> example.com -> (com: suffix, stop)
//! ```
//!
//! Where the walk stops is decided by a [`SuffixPolicy`]. The default policy
//! treats any single label as the public suffix, which under-walks nothing but
//! over-walks multi-label suffixes such as `co.uk`. A [`SuffixList`] can carry
//! known multi-label suffixes; any better list only needs to implement the
//! trait.
//!
//! # Example
//!
//! ```
//! use container_gate::rules::domain::DomainWalker;
//!
//! let walker = DomainWalker::default();
//! let chain: Vec<&str> = walker.ancestors("api.shop.example.com").collect();
//! assert_eq!(chain, ["api.shop.example.com", "shop.example.com", "example.com"]);
//! ```

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use url::{Host, Url};

/// Decides where the registrable boundary of a domain lies.
pub trait SuffixPolicy: Send + Sync + fmt::Debug {
    /// Returns `true` if `candidate` is a public suffix and must never be
    /// yielded by an ancestor walk.
    fn is_public_suffix(&self, candidate: &str) -> bool;
}

/// Label-count heuristic: a single label is a suffix, anything longer is not.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleLabelSuffix;

impl SuffixPolicy for SingleLabelSuffix {
    fn is_public_suffix(&self, candidate: &str) -> bool {
        !candidate.contains('.')
    }
}

/// Label-count heuristic extended with explicitly listed multi-label suffixes.
#[derive(Debug, Clone, Default)]
pub struct SuffixList {
    suffixes: HashSet<String>,
}

impl SuffixList {
    /// Build a list from suffix strings; invalid entries are skipped.
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            suffixes: suffixes
                .into_iter()
                .filter_map(|s| normalize_domain(s.as_ref()))
                .collect(),
        }
    }

    /// Number of listed suffixes
    #[must_use]
    pub fn len(&self) -> usize {
        self.suffixes.len()
    }

    /// Check if no suffixes are listed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty()
    }
}

impl SuffixPolicy for SuffixList {
    fn is_public_suffix(&self, candidate: &str) -> bool {
        !candidate.contains('.') || self.suffixes.contains(candidate)
    }
}

/// Produces ancestor chains for domains under a [`SuffixPolicy`].
#[derive(Debug, Clone)]
pub struct DomainWalker {
    policy: Arc<dyn SuffixPolicy>,
}

impl DomainWalker {
    /// Create a walker with a custom suffix policy
    pub fn new(policy: Arc<dyn SuffixPolicy>) -> Self {
        Self { policy }
    }

    /// Create a walker that also stops at the given multi-label suffixes
    pub fn with_suffixes<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(Arc::new(SuffixList::new(suffixes)))
    }

    /// Walk `domain` and its parents, most specific first.
    ///
    /// The domain itself is yielded first unless it is a public suffix.
    /// IP address hosts yield only themselves.
    #[must_use]
    pub fn ancestors<'a>(&'a self, domain: &'a str) -> Ancestors<'a> {
        let is_ip = domain.parse::<IpAddr>().is_ok();
        Ancestors {
            rest: (!domain.is_empty()).then_some(domain),
            policy: self.policy.as_ref(),
            is_ip,
        }
    }

    /// Walk only the strict parents of `domain`.
    #[must_use]
    pub fn parents<'a>(&'a self, domain: &'a str) -> Ancestors<'a> {
        let mut walk = self.ancestors(domain);
        if walk.is_ip {
            walk.rest = None;
        } else {
            walk.rest = walk.rest.and_then(parent_of);
        }
        walk
    }
}

impl Default for DomainWalker {
    fn default() -> Self {
        Self::new(Arc::new(SingleLabelSuffix))
    }
}

/// Iterator over a domain's ancestor chain. See [`DomainWalker::ancestors`].
#[derive(Clone)]
pub struct Ancestors<'a> {
    rest: Option<&'a str>,
    policy: &'a dyn SuffixPolicy,
    is_ip: bool,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let candidate = self.rest?;
        if self.is_ip {
            self.rest = None;
            return Some(candidate);
        }
        if candidate.is_empty() || self.policy.is_public_suffix(candidate) {
            self.rest = None;
            return None;
        }
        self.rest = parent_of(candidate);
        Some(candidate)
    }
}

impl fmt::Debug for Ancestors<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ancestors")
            .field("rest", &self.rest)
            .field("is_ip", &self.is_ip)
            .finish()
    }
}

fn parent_of(domain: &str) -> Option<&str> {
    domain.split_once('.').map(|(_, parent)| parent)
}

/// Normalize a user- or host-supplied domain.
///
/// Lowercases, trims whitespace and a single trailing dot. Returns `None` for
/// empty input, embedded whitespace, path or port separators, or empty labels.
///
/// # Example
///
/// ```
/// use container_gate::rules::domain::normalize_domain;
///
/// assert_eq!(normalize_domain(" Shop.Example.COM. ").as_deref(), Some("shop.example.com"));
/// assert_eq!(normalize_domain("bad..example.com"), None);
/// ```
#[must_use]
pub fn normalize_domain(input: &str) -> Option<String> {
    let trimmed = input.trim();
    let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return None;
    }

    // IPv6 literals keep their colons
    if let Ok(ip) = trimmed.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
        return Some(ip.to_string());
    }

    if trimmed
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '/' | ':' | '@' | '?' | '#'))
    {
        return None;
    }
    if trimmed.split('.').any(str::is_empty) {
        return None;
    }

    Some(trimmed.to_ascii_lowercase())
}

/// Extract the normalized host of a request URL.
///
/// Any parse failure, or a URL without a host (`data:`, `about:`), yields
/// `None`; callers treat that as an unowned request.
#[must_use]
pub fn extract_domain(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    match parsed.host()? {
        Host::Domain(domain) => normalize_domain(domain),
        Host::Ipv4(ip) => Some(ip.to_string()),
        Host::Ipv6(ip) => Some(ip.to_string()),
    }
}

/// Check whether `domain` equals `parent` or lies underneath it.
#[must_use]
pub fn is_same_or_subdomain(domain: &str, parent: &str) -> bool {
    domain == parent
        || domain
            .strip_suffix(parent)
            .is_some_and(|prefix| prefix.ends_with('.'))
}
