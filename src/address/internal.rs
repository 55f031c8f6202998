//! Internal (process-local) group address.
//!
//! A string tag prefixed `i-` or `i_`, used solely for intra-process pub-sub
//! fan-out. Never placed on the wire; equality and hashing are by normalized
//! tag (the `-`/`_` separator choice does not distinguish two addresses).

use crate::error::{KnxError, Result};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InternalGroupAddress {
    normalized: String,
}

impl InternalGroupAddress {
    /// Parse an internal address literal (`i-foo` or `i_foo`).
    pub fn new(literal: &str) -> Result<Self> {
        let rest = literal
            .strip_prefix("i-")
            .or_else(|| literal.strip_prefix("i_"))
            .ok_or_else(KnxError::malformed_address_literal)?;

        if rest.is_empty() {
            return Err(KnxError::malformed_address_literal());
        }

        Ok(Self {
            normalized: format!("i-{rest}"),
        })
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.normalized
    }
}

impl fmt::Display for InternalGroupAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.normalized)
    }
}

impl FromStr for InternalGroupAddress {
    type Err = KnxError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_both_prefixes() {
        assert!(InternalGroupAddress::new("i-foo").is_ok());
        assert!(InternalGroupAddress::new("i_foo").is_ok());
    }

    #[test]
    fn normalizes_separator_for_equality() {
        let a: InternalGroupAddress = "i-foo".parse().unwrap();
        let b: InternalGroupAddress = "i_foo".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_missing_prefix_or_empty_tag() {
        assert!(InternalGroupAddress::new("foo").is_err());
        assert!(InternalGroupAddress::new("i-").is_err());
        assert!(InternalGroupAddress::new("i_").is_err());
    }

    #[test]
    fn display_uses_normalized_form() {
        let a: InternalGroupAddress = "i_foo".parse().unwrap();
        assert_eq!(a.to_string(), "i-foo");
    }
}
