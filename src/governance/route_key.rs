//! Route identity shared by every registry.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use crate::governance::error::PolicyError;

/// `METHOD + " " + PATTERN`, where the pattern is the route as registered
/// (`/users/{id}`), never the literal request URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey(String);

impl RouteKey {
    /// Build a key from a method and a registered route pattern.
    pub fn new(method: &str, pattern: &str) -> Self {
        Self(format!("{} {}", method.to_ascii_uppercase(), pattern))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The method half of the key.
    pub fn method(&self) -> &str {
        self.0.split_once(' ').map(|(m, _)| m).unwrap_or_default()
    }

    /// The route pattern half of the key.
    pub fn pattern(&self) -> &str {
        self.0.split_once(' ').map(|(_, p)| p).unwrap_or_default()
    }
}

impl FromStr for RouteKey {
    type Err = PolicyError;

    /// Parses `"GET /users/me"`. Surrounding whitespace is ignored and the
    /// method is upper-cased; the pattern must start with `/`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PolicyError::InvalidRouter(s.to_string());

        let (method, pattern) = s.trim().split_once(char::is_whitespace).ok_or_else(invalid)?;
        let pattern = pattern.trim();
        if method.is_empty()
            || !method.chars().all(|c| c.is_ascii_alphabetic())
            || !pattern.starts_with('/')
        {
            return Err(invalid());
        }
        Ok(Self::new(method, pattern))
    }
}

impl Borrow<str> for RouteKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl serde::Serialize for RouteKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}
