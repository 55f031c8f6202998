//! KNX addressing.
//!
//! Three disjoint address kinds share the invariant "raw value fits in 16
//! bits" for the two wire kinds, plus a process-local kind that never
//! touches the wire:
//! - [`IndividualAddress`]: a device's point-to-point address.
//! - [`GroupAddress`]: a logical multicast destination.
//! - [`InternalGroupAddress`]: an intra-process pub-sub tag.

pub mod group;
pub mod individual;
pub mod internal;

#[doc(inline)]
pub use group::{group_address_style, set_group_address_style, GroupAddress, GroupAddressStyle};
#[doc(inline)]
pub use individual::IndividualAddress;
#[doc(inline)]
pub use internal::InternalGroupAddress;

use std::fmt;

/// Any telegram destination: the two wire-representable address kinds plus
/// the process-local internal kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    Individual(IndividualAddress),
    Group(GroupAddress),
    Internal(InternalGroupAddress),
}

impl Destination {
    #[must_use]
    pub const fn is_group(&self) -> bool {
        matches!(self, Self::Group(_))
    }

    #[must_use]
    pub const fn is_individual(&self) -> bool {
        matches!(self, Self::Individual(_))
    }

    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    #[must_use]
    pub fn as_group(&self) -> Option<GroupAddress> {
        match self {
            Self::Group(g) => Some(*g),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_individual(&self) -> Option<IndividualAddress> {
        match self {
            Self::Individual(a) => Some(*a),
            _ => None,
        }
    }
}

impl From<IndividualAddress> for Destination {
    fn from(a: IndividualAddress) -> Self {
        Self::Individual(a)
    }
}

impl From<GroupAddress> for Destination {
    fn from(a: GroupAddress) -> Self {
        Self::Group(a)
    }
}

impl From<InternalGroupAddress> for Destination {
    fn from(a: InternalGroupAddress) -> Self {
        Self::Internal(a)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Individual(a) => write!(f, "{a}"),
            Self::Group(a) => write!(f, "{a}"),
            Self::Internal(a) => write!(f, "{a}"),
        }
    }
}
