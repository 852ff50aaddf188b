//! Repository reference parsing.
//!
//! Normalizes user input into an `{owner, repo}` pair. Three shapes are
//! accepted, tried in this order:
//!
//! | Shape | Example |
//! |-------|---------|
//! | Full URL | `https://github.com/acme/widgets/tree/main` |
//! | Bare host | `github.com/acme/widgets` |
//! | Shorthand | `acme/widgets` |
//!
//! Matching is purely textual. Trailing path segments (URL forms only),
//! trailing slashes, and a trailing `.git` are ignored.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ErrorKind, PipelineError};

const HOSTS: &[&str] = &["github.com", "www.github.com"];
const SCHEMES: &[&str] = &["https://", "http://"];

/// A normalized `{owner, repo}` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoReference {
    pub owner: String,
    pub repo: String,
}

impl RepoReference {
    /// Lowercased `owner/repo`, used to key cached specs.
    pub fn cache_key(&self) -> String {
        format!(
            "{}/{}",
            self.owner.to_ascii_lowercase(),
            self.repo.to_ascii_lowercase()
        )
    }

    pub fn html_url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.repo)
    }
}

impl fmt::Display for RepoReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

impl std::str::FromStr for RepoReference {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_reference(s)
    }
}

/// Parse raw input into a [`RepoReference`].
///
/// Fails with [`ErrorKind::InvalidUrl`] when the input matches none of the
/// accepted shapes.
pub fn parse_reference(input: &str) -> Result<RepoReference, PipelineError> {
    let trimmed = input.trim();

    if let Some(rest) = strip_scheme(trimmed) {
        // A URL that is not on a known host is rejected outright rather than
        // falling through to the shorthand shape.
        return strip_host(rest)
            .and_then(|path| owner_and_repo(strip_query(path), true))
            .ok_or_else(|| invalid(input));
    }

    if let Some(path) = strip_host(trimmed) {
        return owner_and_repo(strip_query(path), true).ok_or_else(|| invalid(input));
    }

    owner_and_repo(trimmed, false).ok_or_else(|| invalid(input))
}

fn invalid(input: &str) -> PipelineError {
    PipelineError::new(
        ErrorKind::InvalidUrl,
        format!("not a GitHub repository reference: '{}'", input.trim()),
    )
}

fn strip_scheme(s: &str) -> Option<&str> {
    SCHEMES.iter().find_map(|scheme| {
        s.get(..scheme.len())
            .filter(|prefix| prefix.eq_ignore_ascii_case(scheme))
            .map(|_| &s[scheme.len()..])
    })
}

/// Returns the path after `host/` when `s` starts with a known host.
fn strip_host(s: &str) -> Option<&str> {
    let (host, path) = s.split_once('/')?;
    HOSTS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(host))
        .then_some(path)
}

fn strip_query(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    &path[..end]
}

/// Extract `owner/repo` from a path. With `allow_trailing`, any segments
/// after the repository are ignored; otherwise exactly two are required.
fn owner_and_repo(path: &str, allow_trailing: bool) -> Option<RepoReference> {
    let path = path.trim_end_matches('/');
    let mut segments = path.split('/');
    let owner = segments.next()?;
    let mut repo = segments.next()?;

    let has_trailing = segments.next().is_some();
    if has_trailing && !allow_trailing {
        return None;
    }
    if !has_trailing {
        repo = repo.strip_suffix(".git").unwrap_or(repo);
    }

    if !valid_segment(owner) || !valid_segment(repo) {
        return None;
    }

    Some(RepoReference {
        owner: owner.to_string(),
        repo: repo.to_string(),
    })
}

fn valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acme() -> RepoReference {
        RepoReference {
            owner: "acme".to_string(),
            repo: "widgets".to_string(),
        }
    }

    #[test]
    fn all_three_shapes_agree() {
        for input in [
            "https://github.com/acme/widgets",
            "github.com/acme/widgets",
            "acme/widgets",
        ] {
            assert_eq!(parse_reference(input).unwrap(), acme(), "input: {}", input);
        }
    }

    #[test]
    fn ignorable_suffixes() {
        for input in [
            "https://github.com/acme/widgets/",
            "https://github.com/acme/widgets.git",
            "https://github.com/acme/widgets/tree/main/src",
            "http://www.github.com/acme/widgets?tab=readme#install",
            "HTTPS://GitHub.com/acme/widgets",
            "github.com/acme/widgets/issues/4",
            "acme/widgets.git",
            "acme/widgets/",
            "  acme/widgets  ",
        ] {
            assert_eq!(parse_reference(input).unwrap(), acme(), "input: {}", input);
        }
    }

    #[test]
    fn keeps_dots_inside_names() {
        let r = parse_reference("rust-lang/rust.vim").unwrap();
        assert_eq!(r.repo, "rust.vim");
        let r = parse_reference("https://github.com/user/user.github.io").unwrap();
        assert_eq!(r.repo, "user.github.io");
    }

    #[test]
    fn rejects_non_matching_inputs() {
        for input in [
            "",
            "   ",
            "acme",
            "acme/",
            "/widgets",
            "acme/widgets/extra",
            "a/b/c/d",
            "https://gitlab.com/acme/widgets",
            "https://example.com/acme/widgets",
            "https://github.com/acme",
            "https://github.com/",
            "ftp://github.com/acme/widgets",
            "acme/wid gets",
            "acme/../widgets",
            "../widgets",
        ] {
            let err = parse_reference(input).unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidUrl, "input: {:?}", input);
        }
    }

    #[test]
    fn cache_key_is_case_insensitive() {
        let a = parse_reference("Acme/Widgets").unwrap();
        let b = parse_reference("acme/widgets").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn display_and_url() {
        let r = acme();
        assert_eq!(r.to_string(), "acme/widgets");
        assert_eq!(r.html_url(), "https://github.com/acme/widgets");
        assert_eq!("acme/widgets".parse::<RepoReference>().unwrap(), r);
    }
}
