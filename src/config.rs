//! Stack-wide configuration (C14).

use crate::address::GroupAddressStyle;

/// Configuration shared by the telegram queue and the address renderer.
///
/// `group_address_style` only affects subsequent [`Display`](std::fmt::Display)
/// calls on [`GroupAddress`](crate::address::GroupAddress); it never changes a
/// value's raw storage, `Eq`, or `Hash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackConfig {
    /// Outgoing telegrams per second; `0` disables the rate limiter.
    pub rate_limit: u16,
    pub group_address_style: GroupAddressStyle,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            rate_limit: 0,
            group_address_style: GroupAddressStyle::Long,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_disables_rate_limiting() {
        assert_eq!(StackConfig::default().rate_limit, 0);
    }
}
