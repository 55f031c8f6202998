//! Subscription patterns for group-addressed telegrams (C10).
//!
//! The grammar mirrors the three [`GroupAddressStyle`](crate::address::GroupAddressStyle)s:
//! `M/m/S` (long), `M/S` (short), `S` (free). Each component is a
//! comma-separated list of ranges (`a-b`), points (`a`), or `*`; alternatives
//! within a component are combined by OR. An internal pattern starts with
//! `i-`/`i_` and matches an [`InternalGroupAddress`] tag with glob wildcards
//! `*`/`?`.

use crate::address::{group_address_style, GroupAddress, GroupAddressStyle, InternalGroupAddress};
use crate::error::{KnxError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum ComponentItem {
    Point(u16),
    Range(u16, u16),
}

impl ComponentItem {
    fn matches(&self, value: u16) -> bool {
        match *self {
            Self::Point(p) => p == value,
            Self::Range(lo, hi) => (lo..=hi).contains(&value),
        }
    }

    fn parse(token: &str) -> Result<Self> {
        if let Some((lo, hi)) = token.split_once('-') {
            let lo: u16 = lo.parse().map_err(|_| KnxError::malformed_address_literal())?;
            let hi: u16 = hi.parse().map_err(|_| KnxError::malformed_address_literal())?;
            Ok(Self::Range(lo, hi))
        } else {
            let p: u16 = token.parse().map_err(|_| KnxError::malformed_address_literal())?;
            Ok(Self::Point(p))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Component {
    Any,
    List(Vec<ComponentItem>),
}

impl Component {
    fn parse(field: &str) -> Result<Self> {
        if field == "*" {
            return Ok(Self::Any);
        }
        let items = field
            .split(',')
            .map(ComponentItem::parse)
            .collect::<Result<Vec<_>>>()?;
        if items.is_empty() {
            return Err(KnxError::malformed_address_literal());
        }
        Ok(Self::List(items))
    }

    fn matches(&self, value: u16) -> bool {
        match self {
            Self::Any => true,
            Self::List(items) => items.iter().any(|i| i.matches(value)),
        }
    }
}

/// A group-address subscription pattern, or an internal-address glob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressFilter {
    Long([Component; 3]),
    Short([Component; 2]),
    Free([Component; 1]),
    Internal(String),
}

impl AddressFilter {
    /// Parse a pattern literal, rejecting one with more components than the
    /// current process-wide [`GroupAddressStyle`] supports.
    pub fn parse(literal: &str) -> Result<Self> {
        if literal.starts_with("i-") || literal.starts_with("i_") {
            return Ok(Self::Internal(literal.to_owned()));
        }

        let fields: Vec<&str> = literal.split('/').collect();
        let style = group_address_style();
        let max_components = match style {
            GroupAddressStyle::Free => 1,
            GroupAddressStyle::Short => 2,
            GroupAddressStyle::Long => 3,
        };
        if fields.len() > max_components {
            return Err(KnxError::too_many_filter_levels());
        }

        match fields.len() {
            3 => Ok(Self::Long([
                Component::parse(fields[0])?,
                Component::parse(fields[1])?,
                Component::parse(fields[2])?,
            ])),
            2 => Ok(Self::Short([Component::parse(fields[0])?, Component::parse(fields[1])?])),
            1 => Ok(Self::Free([Component::parse(fields[0])?])),
            _ => Err(KnxError::malformed_address_literal()),
        }
    }

    /// Does this pattern match the given group address?
    #[must_use]
    pub fn matches(&self, address: GroupAddress) -> bool {
        match self {
            Self::Long([m, mid, s]) => {
                m.matches(u16::from(address.main())) && mid.matches(u16::from(address.middle())) && s.matches(u16::from(address.sub()))
            }
            Self::Short([m, s]) => m.matches(u16::from(address.main())) && s.matches(address.sub_short()),
            Self::Free([s]) => s.matches(address.raw()),
            Self::Internal(_) => false,
        }
    }

    /// Does this pattern match the given internal address tag?
    #[must_use]
    pub fn matches_internal(&self, address: &InternalGroupAddress) -> bool {
        match self {
            Self::Internal(pattern) => glob_match(pattern, address.tag()),
            _ => false,
        }
    }
}

fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_match_rec(&pattern, &text)
}

fn glob_match_rec(pattern: &[char], text: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('*') => {
            glob_match_rec(&pattern[1..], text)
                || (!text.is_empty() && glob_match_rec(pattern, &text[1..]))
        }
        Some('?') => !text.is_empty() && glob_match_rec(&pattern[1..], &text[1..]),
        Some(c) => text.first() == Some(c) && glob_match_rec(&pattern[1..], &text[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::set_group_address_style;

    #[test]
    fn long_form_range_and_point_match() {
        set_group_address_style(GroupAddressStyle::Long);
        let f = AddressFilter::parse("1/2/10-20").unwrap();
        assert!(f.matches(GroupAddress::new(1, 2, 15).unwrap()));
        assert!(!f.matches(GroupAddress::new(1, 2, 21).unwrap()));
        assert!(!f.matches(GroupAddress::new(1, 3, 15).unwrap()));
    }

    #[test]
    fn wildcard_matches_any_component() {
        set_group_address_style(GroupAddressStyle::Long);
        let f = AddressFilter::parse("*/2/*").unwrap();
        assert!(f.matches(GroupAddress::new(9, 2, 200).unwrap()));
        assert!(!f.matches(GroupAddress::new(9, 3, 200).unwrap()));
    }

    #[test]
    fn comma_separated_alternatives_are_ored() {
        set_group_address_style(GroupAddressStyle::Long);
        let f = AddressFilter::parse("1/2/1,5,9-11").unwrap();
        assert!(f.matches(GroupAddress::new(1, 2, 5).unwrap()));
        assert!(f.matches(GroupAddress::new(1, 2, 10).unwrap()));
        assert!(!f.matches(GroupAddress::new(1, 2, 6).unwrap()));
    }

    #[test]
    fn free_form_matches_raw_value() {
        set_group_address_style(GroupAddressStyle::Free);
        let f = AddressFilter::parse("2561").unwrap();
        assert!(f.matches(GroupAddress::new_free(2561)));
        set_group_address_style(GroupAddressStyle::Long);
    }

    #[test]
    fn too_many_components_for_current_style_is_rejected() {
        set_group_address_style(GroupAddressStyle::Short);
        assert!(AddressFilter::parse("1/2/3").is_err());
        set_group_address_style(GroupAddressStyle::Long);
    }

    #[test]
    fn internal_pattern_glob_matches() {
        let f = AddressFilter::parse("i-lamp_*").unwrap();
        let addr: InternalGroupAddress = "i-lamp_kitchen".parse().unwrap();
        assert!(f.matches_internal(&addr));
        let other: InternalGroupAddress = "i-cover_kitchen".parse().unwrap();
        assert!(!f.matches_internal(&other));
    }

    #[test]
    fn internal_pattern_question_mark_matches_single_char() {
        let f = AddressFilter::parse("i-lamp?").unwrap();
        assert!(f.matches_internal(&"i-lamp1".parse().unwrap()));
        assert!(!f.matches_internal(&"i-lamp12".parse().unwrap()));
    }
}
