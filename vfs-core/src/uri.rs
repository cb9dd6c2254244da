//! URI and path primitives.
//!
//! A [`Uri`] addresses a resource across any registered provider scheme:
//! `scheme://authority/path?query#fragment`. Path comparisons respect the
//! case sensitivity of the owning provider, never the platform's.

use std::fmt;

/// A parsed resource identifier. Cheap to clone; segments are recomputed
/// on demand rather than cached, since URIs are short-lived call arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uri {
    pub scheme: String,
    pub authority: String,
    pub path: String,
    pub query: String,
    pub fragment: String,
}

#[derive(Debug, thiserror::Error)]
pub enum UriError {
    #[error("uri is missing a scheme: {0}")]
    MissingScheme(String),
}

impl Uri {
    pub fn new(scheme: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            authority: String::new(),
            path: normalize_path(&path.into()),
            query: String::new(),
            fragment: String::new(),
        }
    }

    /// Parses `scheme://authority/path?query#fragment`. Authority, query and
    /// fragment are all optional.
    pub fn parse(s: &str) -> Result<Self, UriError> {
        let (scheme, rest) = s
            .split_once("://")
            .or_else(|| s.split_once(':'))
            .ok_or_else(|| UriError::MissingScheme(s.to_string()))?;

        let (rest, fragment) = match rest.split_once('#') {
            Some((a, b)) => (a, b.to_string()),
            None => (rest, String::new()),
        };
        let (rest, query) = match rest.split_once('?') {
            Some((a, b)) => (a, b.to_string()),
            None => (rest, String::new()),
        };

        let (authority, path) = if let Some(stripped) = rest.strip_prefix('/') {
            if let Some(stripped) = stripped.strip_prefix('/') {
                match stripped.split_once('/') {
                    Some((auth, p)) => (auth.to_string(), format!("/{p}")),
                    None => (stripped.to_string(), "/".to_string()),
                }
            } else {
                (String::new(), format!("/{stripped}"))
            }
        } else {
            (String::new(), normalize_path(rest))
        };

        Ok(Self {
            scheme: scheme.to_string(),
            authority,
            path: normalize_path(&path),
            query,
            fragment,
        })
    }

    pub fn is_absolute(&self) -> bool {
        self.path.starts_with('/')
    }

    /// The final path segment, e.g. `"b.txt"` for `/a/b.txt`, empty for root.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').find(|s| !s.is_empty()).unwrap_or("")
    }

    fn segments(&self) -> Vec<&str> {
        self.path.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// The parent resource, or `None` if `self` is already the root.
    pub fn parent(&self) -> Option<Uri> {
        let segs = self.segments();
        if segs.is_empty() {
            return None;
        }
        let parent_path = if segs.len() == 1 {
            "/".to_string()
        } else {
            format!("/{}", segs[..segs.len() - 1].join("/"))
        };
        Some(Uri {
            scheme: self.scheme.clone(),
            authority: self.authority.clone(),
            path: parent_path,
            query: String::new(),
            fragment: String::new(),
        })
    }

    /// Appends a single path segment.
    pub fn join(&self, name: &str) -> Uri {
        let mut path = self.path.clone();
        if !path.ends_with('/') {
            path.push('/');
        }
        path.push_str(name.trim_start_matches('/'));
        Uri {
            scheme: self.scheme.clone(),
            authority: self.authority.clone(),
            path: normalize_path(&path),
            query: String::new(),
            fragment: String::new(),
        }
    }

    /// Resolves a relative path (which may contain multiple segments,
    /// unlike [`Uri::join`]) against `self`.
    pub fn resolve(&self, relpath: &str) -> Uri {
        let mut path = self.path.clone();
        if !path.ends_with('/') {
            path.push('/');
        }
        path.push_str(relpath.trim_start_matches('/'));
        Uri {
            scheme: self.scheme.clone(),
            authority: self.authority.clone(),
            path: normalize_path(&path),
            query: String::new(),
            fragment: String::new(),
        }
    }

    /// True when `self` is `other`, or a directory ancestor of `other`,
    /// under the given case sensitivity.
    pub fn is_equal_or_parent(&self, other: &Uri, case_sensitive: bool) -> bool {
        if self.scheme != other.scheme {
            return false;
        }
        let a = self.segments();
        let b = other.segments();
        if a.len() > b.len() {
            return false;
        }
        a.iter().zip(b.iter()).all(|(x, y)| segment_eq(x, y, case_sensitive))
    }

    pub fn path_eq(&self, other: &Uri, case_sensitive: bool) -> bool {
        self.scheme == other.scheme
            && self.authority == other.authority
            && if case_sensitive {
                self.path == other.path
            } else {
                self.path.to_lowercase() == other.path.to_lowercase()
            }
    }
}

fn segment_eq(a: &str, b: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        a == b
    } else {
        a.eq_ignore_ascii_case(b)
    }
}

fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    let mut out = String::with_capacity(path.len() + 1);
    if !path.starts_with('/') {
        out.push('/');
    }
    out.push_str(path);
    // Collapse duplicate slashes without allocating per-segment.
    let mut collapsed = String::with_capacity(out.len());
    let mut last_was_slash = false;
    for c in out.chars() {
        if c == '/' {
            if last_was_slash {
                continue;
            }
            last_was_slash = true;
        } else {
            last_was_slash = false;
        }
        collapsed.push(c);
    }
    if collapsed.len() > 1 && collapsed.ends_with('/') {
        collapsed.pop();
    }
    collapsed
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.authority, self.path)?;
        if !self.query.is_empty() {
            write!(f, "?{}", self.query)?;
        }
        if !self.fragment.is_empty() {
            write!(f, "#{}", self.fragment)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrip() {
        let uri = Uri::parse("mem:/a/b.txt").unwrap();
        assert_eq!(uri.scheme, "mem");
        assert_eq!(uri.path, "/a/b.txt");
    }

    #[test]
    fn parent_of_root_is_none() {
        let root = Uri::new("mem", "/");
        assert!(root.parent().is_none());
    }

    #[test]
    fn parent_of_single_segment_is_root() {
        let uri = Uri::new("mem", "/a");
        assert_eq!(uri.parent().unwrap().path, "/");
    }

    #[test]
    fn join_and_resolve() {
        let base = Uri::new("mem", "/a");
        assert_eq!(base.join("b").path, "/a/b");
        assert_eq!(base.resolve("b/c").path, "/a/b/c");
    }

    #[test]
    fn is_equal_or_parent_case_insensitive() {
        let parent = Uri::new("mem", "/Dir");
        let child = Uri::new("mem", "/dir/file.txt");
        assert!(parent.is_equal_or_parent(&child, false));
        assert!(!parent.is_equal_or_parent(&child, true));
    }

    #[test]
    fn duplicate_slashes_collapse() {
        let uri = Uri::new("mem", "//a//b/");
        assert_eq!(uri.path, "/a/b");
    }
}
