//! CEMI message codes and link-layer priority.

/// CEMI message codes this stack understands. Any other code is rejected at
/// parse time with `UnsupportedCEMIMessage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CemiMessageCode {
    LDataReq = 0x11,
    LDataInd = 0x29,
    LDataCon = 0x2E,
}

impl CemiMessageCode {
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x11 => Some(Self::LDataReq),
            0x29 => Some(Self::LDataInd),
            0x2E => Some(Self::LDataCon),
            _ => None,
        }
    }

    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Link-layer priority, carried in control field 1 bits 3-2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Priority {
    System = 0b00,
    Normal = 0b01,
    Urgent = 0b10,
    Low = 0b11,
}

impl Priority {
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value & 0b11 {
            0b00 => Self::System,
            0b10 => Self::Urgent,
            0b11 => Self::Low,
            _ => Self::Normal,
        }
    }

    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}
