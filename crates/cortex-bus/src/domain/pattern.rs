//! # Subscription Patterns
//!
//! Three forms are accepted:
//!
//! | Pattern       | Matches                                  |
//! |---------------|------------------------------------------|
//! | `*`           | every event type (global handler)        |
//! | `cognitive:*` | any type starting with `cognitive:`      |
//! | `case.created`| exactly `case.created`                   |
//!
//! A `*` anywhere but the last position is rejected.

use crate::error::BusError;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// `*`
    All,
    /// `prefix*`, stored without the trailing `*`.
    Prefix(String),
    Exact(String),
}

impl Pattern {
    /// Parse a subscription pattern.
    ///
    /// # Errors
    ///
    /// `BusError::InvalidPattern` for empty patterns or interior wildcards.
    pub fn parse(raw: &str) -> Result<Self, BusError> {
        let pattern = raw.trim();
        if pattern.is_empty() {
            return Err(BusError::InvalidPattern(raw.to_string()));
        }
        if pattern == "*" {
            return Ok(Self::All);
        }

        match pattern.strip_suffix('*') {
            Some(prefix) if !prefix.contains('*') => Ok(Self::Prefix(prefix.to_string())),
            Some(_) => Err(BusError::InvalidPattern(raw.to_string())),
            None if pattern.contains('*') => Err(BusError::InvalidPattern(raw.to_string())),
            None => Ok(Self::Exact(pattern.to_string())),
        }
    }

    #[must_use]
    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            Self::All => true,
            Self::Prefix(prefix) => event_type.starts_with(prefix.as_str()),
            Self::Exact(exact) => exact == event_type,
        }
    }

    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        !matches!(self, Self::Exact(_))
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::Prefix(prefix) => write!(f, "{prefix}*"),
            Self::Exact(exact) => f.write_str(exact),
        }
    }
}
