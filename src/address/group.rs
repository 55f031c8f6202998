//! KNX Group Address.
//!
//! Stored as a flat 16-bit value regardless of how it is rendered. Three
//! render styles share that storage:
//! - free: the raw value printed as a single number.
//! - short (2-level): `main/sub`, 5/11 bit split.
//! - long (3-level): `main/middle/sub`, 5/3/8 bit split.
//!
//! The render style is a process-wide setting (see [`set_group_address_style`])
//! that affects only [`Display`](fmt::Display); it never affects equality,
//! hashing, or wire encoding.

use crate::error::{KnxError, Result};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

/// Render style used by [`GroupAddress`]'s `Display` impl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupAddressStyle {
    Free,
    Short,
    Long,
}

impl GroupAddressStyle {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Free => 0,
            Self::Short => 1,
            Self::Long => 2,
        }
    }

    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Free,
            1 => Self::Short,
            _ => Self::Long,
        }
    }
}

static GROUP_ADDRESS_STYLE: AtomicU8 = AtomicU8::new(GroupAddressStyle::Long.as_u8());

/// Set the process-wide [`GroupAddress`] render style.
///
/// Does not touch any already-constructed `GroupAddress` value's raw storage,
/// `Eq`, or `Hash` — only subsequent `Display` calls observe the change.
pub fn set_group_address_style(style: GroupAddressStyle) {
    GROUP_ADDRESS_STYLE.store(style.as_u8(), Ordering::Relaxed);
}

#[must_use]
pub fn group_address_style() -> GroupAddressStyle {
    GroupAddressStyle::from_u8(GROUP_ADDRESS_STYLE.load(Ordering::Relaxed))
}

/// A logical multicast destination shared by subscribed devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupAddress {
    raw: u16,
}

impl GroupAddress {
    pub const MAX_MAIN: u8 = 31;
    pub const MAX_MIDDLE: u8 = 7;
    pub const MAX_SUB: u8 = 255;
    pub const MAX_SUB_SHORT: u16 = 2047;

    /// The broadcast group address.
    pub const BROADCAST: Self = Self { raw: 0 };

    /// Build a long-form (3-level) address.
    pub fn new(main: u8, middle: u8, sub: u8) -> Result<Self> {
        if main > Self::MAX_MAIN {
            return Err(KnxError::component_out_of_range());
        }
        if middle > Self::MAX_MIDDLE {
            return Err(KnxError::component_out_of_range());
        }
        let raw = (u16::from(main) << 11) | (u16::from(middle) << 8) | u16::from(sub);
        Ok(Self { raw })
    }

    /// Build a short-form (2-level) address.
    pub fn new_short(main: u8, sub: u16) -> Result<Self> {
        if main > Self::MAX_MAIN {
            return Err(KnxError::component_out_of_range());
        }
        if sub > Self::MAX_SUB_SHORT {
            return Err(KnxError::component_out_of_range());
        }
        let raw = (u16::from(main) << 11) | sub;
        Ok(Self { raw })
    }

    /// Build a free-form address from its raw 16-bit value.
    #[must_use]
    pub const fn new_free(raw: u16) -> Self {
        Self { raw }
    }

    #[must_use]
    #[inline]
    pub const fn raw(self) -> u16 {
        self.raw
    }

    #[must_use]
    #[inline]
    pub const fn is_broadcast(self) -> bool {
        self.raw == 0
    }

    #[must_use]
    #[inline]
    pub const fn main(self) -> u8 {
        ((self.raw >> 11) & 0x1F) as u8
    }

    #[must_use]
    #[inline]
    pub const fn middle(self) -> u8 {
        ((self.raw >> 8) & 0x07) as u8
    }

    #[must_use]
    #[inline]
    pub const fn sub(self) -> u8 {
        (self.raw & 0xFF) as u8
    }

    #[must_use]
    #[inline]
    pub const fn sub_short(self) -> u16 {
        self.raw & 0x07FF
    }

    pub fn encode(self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < 2 {
            return Err(KnxError::buffer_too_short("group address"));
        }
        buf[0..2].copy_from_slice(&self.raw.to_be_bytes());
        Ok(2)
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 2 {
            return Err(KnxError::buffer_too_short("group address"));
        }
        Ok(Self {
            raw: u16::from_be_bytes([buf[0], buf[1]]),
        })
    }
}

impl fmt::Display for GroupAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match group_address_style() {
            GroupAddressStyle::Free => write!(f, "{}", self.raw),
            GroupAddressStyle::Short => write!(f, "{}/{}", self.main(), self.sub_short()),
            GroupAddressStyle::Long => write!(f, "{}/{}/{}", self.main(), self.middle(), self.sub()),
        }
    }
}

impl From<u16> for GroupAddress {
    #[inline]
    fn from(raw: u16) -> Self {
        Self { raw }
    }
}

impl From<GroupAddress> for u16 {
    #[inline]
    fn from(addr: GroupAddress) -> u16 {
        addr.raw
    }
}

impl FromStr for GroupAddress {
    type Err = KnxError;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(raw) = s.parse::<u16>() {
            return Ok(Self::new_free(raw));
        }

        let mut parts = s.split('/');
        let main = parts
            .next()
            .and_then(|s| s.parse::<u8>().ok())
            .ok_or_else(KnxError::malformed_address_literal)?;
        let second = parts
            .next()
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(KnxError::malformed_address_literal)?;

        if let Some(sub_str) = parts.next() {
            let sub = sub_str
                .parse::<u8>()
                .map_err(|_| KnxError::malformed_address_literal())?;
            if parts.next().is_some() {
                return Err(KnxError::malformed_address_literal());
            }
            if second > u16::from(u8::MAX) {
                return Err(KnxError::malformed_address_literal());
            }
            Self::new(main, second as u8, sub)
        } else {
            Self::new_short(main, second)
        }
    }
}
