use std::fmt;

/// The path condition of a [`Matcher`](crate::Matcher).
///
/// Patterns are tested against the resource path left by the enclosing matchers, never
/// against the full request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    /// matches every path without consuming any of it
    Any,
    /// matches exactly this path, consuming all of it
    Exact(String),
    /// matches this path and everything below it, consuming the prefix
    Prefix(String),
    /// matches paths ending in `.ext`, consuming nothing
    Extension(String),
}

impl PathPattern {
    pub fn exact(path: impl Into<String>) -> Self {
        Self::Exact(path.into())
    }

    /// A prefix pattern; a trailing `/` is ignored so `/dav/` and `/dav` mount the same.
    pub fn prefix(prefix: impl AsRef<str>) -> Self {
        Self::Prefix(prefix.as_ref().trim_end_matches('/').to_owned())
    }

    pub fn extension(ext: impl AsRef<str>) -> Self {
        Self::Extension(ext.as_ref().trim_start_matches('.').to_owned())
    }

    /// Returns how many leading bytes of `path` the pattern consumes, `None` if it doesn't
    /// match.
    ///
    /// A prefix only matches on segment boundaries: `/dav` matches `/dav` and `/dav/x` but not
    /// `/davx`.
    pub fn matches(&self, path: &str) -> Option<usize> {
        match self {
            Self::Any => Some(0),
            Self::Exact(exact) => (path == exact).then_some(path.len()),
            Self::Prefix(prefix) => {
                let rest = path.strip_prefix(prefix.as_str())?;
                (rest.is_empty() || rest.starts_with('/')).then_some(prefix.len())
            }
            Self::Extension(ext) => {
                let name = path.rsplit('/').next().unwrap_or(path);
                let (_, found) = name.rsplit_once('.')?;
                found.eq_ignore_ascii_case(ext).then_some(0)
            }
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Exact(path) => f.write_str(path),
            Self::Prefix(prefix) => write!(f, "{prefix}/*"),
            Self::Extension(ext) => write!(f, "*.{ext}"),
        }
    }
}
