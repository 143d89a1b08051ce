//! Resource identifier abstraction

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{OmnioError, OmnioResult};

/// A parsed `scheme://authority/path` identifier, the sole addressing unit
/// across backends.
///
/// The authority component is backend-defined (for pool-addressed stores it
/// names the pool) and is empty for local files. Identifiers are immutable
/// once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    scheme: String,
    authority: String,
    path: String,
}

impl Identifier {
    /// Build an identifier from already-split components.
    pub fn new(
        scheme: impl Into<String>,
        authority: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            authority: authority.into(),
            path: path.into(),
        }
    }

    /// Parse a `scheme://authority/path` string.
    ///
    /// The authority ends at the first `/` after the scheme separator; the
    /// path keeps its leading slash. A remainder without any `/` (for
    /// example `mem://x`) is taken as the path with an empty authority, so
    /// that single-component identifiers address a resource rather than an
    /// authority with nothing under it.
    pub fn parse(s: &str) -> OmnioResult<Self> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| OmnioError::InvalidIdentifier(s.to_string()))?;
        if scheme.is_empty() {
            return Err(OmnioError::InvalidIdentifier(s.to_string()));
        }

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => ("", rest),
        };

        Ok(Self {
            scheme: scheme.to_string(),
            authority: authority.to_string(),
            path: path.to_string(),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl FromStr for Identifier {
    type Err = OmnioError;

    fn from_str(s: &str) -> OmnioResult<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.authority, self.path)
    }
}
