//! Transport-layer Protocol Control Information (TPCI).
//!
//! The TPCI octet layout is `C N S S S S F F`: `C` control, `N` numbered,
//! `S` a 4-bit field that is either reserved (0/1) for unnumbered data or a
//! wrapping sequence number, `F` a 2-bit subtype used only by control TPDUs.
//! For data TPDUs (`C=0`) the low 2 bits are not part of the TPCI at all —
//! they join the following octet to form the APCI code (see [`crate::apci`]).

use crate::error::{KnxError, Result};

/// A resolved TPCI value. Variant names follow the KNX transport-layer
/// service names (`T_Data_*`, `T_Connect`, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tpci {
    DataBroadcast,
    DataGroup,
    DataTagGroup,
    DataIndividual,
    /// Numbered data on a point-to-point connection; sequence 0..15.
    DataConnected(u8),
    Connect,
    Disconnect,
    /// Sequence 0..15 of the acknowledged request.
    Ack(u8),
    Nak(u8),
}

impl Tpci {
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Connect | Self::Disconnect | Self::Ack(_) | Self::Nak(_))
    }

    #[must_use]
    pub const fn is_numbered(self) -> bool {
        matches!(self, Self::DataConnected(_) | Self::Ack(_) | Self::Nak(_))
    }

    #[must_use]
    pub const fn sequence_number(self) -> u8 {
        match self {
            Self::DataConnected(s) | Self::Ack(s) | Self::Nak(s) => s,
            _ => 0,
        }
    }

    /// Resolve the TPCI from the raw octet plus the two facts the caller
    /// already knows about the destination address from the CEMI frame.
    pub fn resolve(byte: u8, dst_is_group: bool, dst_is_zero: bool) -> Result<Self> {
        let control = (byte >> 7) & 1 != 0;
        let numbered = (byte >> 6) & 1 != 0;
        let seq = (byte >> 2) & 0x0F;
        let flags = byte & 0x03;

        match (control, numbered) {
            (false, false) => {
                if dst_is_group {
                    match seq {
                        0 if dst_is_zero => Ok(Self::DataBroadcast),
                        0 => Ok(Self::DataGroup),
                        1 => Ok(Self::DataTagGroup),
                        _ => Err(KnxError::invalid_tpci()),
                    }
                } else if seq == 0 {
                    Ok(Self::DataIndividual)
                } else {
                    Err(KnxError::invalid_tpci())
                }
            }
            (false, true) => {
                if dst_is_group {
                    Err(KnxError::invalid_tpci())
                } else {
                    Ok(Self::DataConnected(seq))
                }
            }
            (true, false) => {
                if seq != 0 {
                    return Err(KnxError::invalid_tpci());
                }
                match flags {
                    0b00 => Ok(Self::Connect),
                    0b01 => Ok(Self::Disconnect),
                    _ => Err(KnxError::invalid_tpci()),
                }
            }
            (true, true) => match flags {
                0b10 => Ok(Self::Ack(seq)),
                0b11 => Ok(Self::Nak(seq)),
                _ => Err(KnxError::invalid_tpci()),
            },
        }
    }

    /// Encode this TPCI against the destination context, validating the
    /// legality matrix's invariants before producing the octet.
    ///
    /// For data TPDUs the two low bits of the returned octet are always 0;
    /// the caller ORs in the APCI's high bits.
    pub fn encode(self, dst_is_group: bool, dst_is_zero: bool) -> Result<u8> {
        match self {
            Self::DataBroadcast => {
                if !(dst_is_group && dst_is_zero) {
                    return Err(KnxError::invalid_tpci());
                }
                Ok(0b0000_0000)
            }
            Self::DataGroup => {
                if !dst_is_group {
                    return Err(KnxError::invalid_tpci());
                }
                Ok(0b0000_0000)
            }
            Self::DataTagGroup => {
                if !dst_is_group {
                    return Err(KnxError::invalid_tpci());
                }
                Ok(0b0000_0100)
            }
            Self::DataIndividual => {
                if dst_is_group {
                    return Err(KnxError::invalid_tpci());
                }
                Ok(0b0000_0000)
            }
            Self::DataConnected(seq) => {
                if dst_is_group || seq > 0x0F {
                    return Err(KnxError::invalid_tpci());
                }
                Ok(0b0100_0000 | (seq << 2))
            }
            Self::Connect => Ok(0b1000_0000),
            Self::Disconnect => Ok(0b1000_0001),
            Self::Ack(seq) => {
                if seq > 0x0F {
                    return Err(KnxError::invalid_tpci());
                }
                Ok(0b1100_0010 | (seq << 2))
            }
            Self::Nak(seq) => {
                if seq > 0x0F {
                    return Err(KnxError::invalid_tpci());
                }
                Ok(0b1100_0011 | (seq << 2))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(tpci: Tpci, dst_is_group: bool, dst_is_zero: bool) {
        let byte = tpci.encode(dst_is_group, dst_is_zero).unwrap();
        assert_eq!(Tpci::resolve(byte, dst_is_group, dst_is_zero).unwrap(), tpci);
    }

    #[test]
    fn data_broadcast_roundtrip() {
        roundtrip(Tpci::DataBroadcast, true, true);
    }

    #[test]
    fn data_group_roundtrip() {
        roundtrip(Tpci::DataGroup, true, false);
    }

    #[test]
    fn data_tag_group_roundtrip() {
        roundtrip(Tpci::DataTagGroup, true, false);
    }

    #[test]
    fn data_individual_roundtrip() {
        roundtrip(Tpci::DataIndividual, false, false);
    }

    #[test]
    fn data_connected_roundtrip() {
        roundtrip(Tpci::DataConnected(0), false, false);
        roundtrip(Tpci::DataConnected(15), false, false);
    }

    #[test]
    fn connect_disconnect_roundtrip() {
        roundtrip(Tpci::Connect, false, false);
        roundtrip(Tpci::Disconnect, false, false);
    }

    #[test]
    fn ack_nak_roundtrip() {
        roundtrip(Tpci::Ack(3), false, false);
        roundtrip(Tpci::Nak(9), false, false);
    }

    #[test]
    fn rejects_invalid_rows() {
        // C0 N0 group S>=2
        assert!(Tpci::resolve(0b0000_1000, true, false).is_err());
        // C0 N1 group (numbered data never legal on a group destination)
        assert!(Tpci::resolve(0b0100_0000, true, false).is_err());
        // C1 N0 with nonzero S
        assert!(Tpci::resolve(0b1000_0100, false, false).is_err());
        // C1 N0 with F = 10/11 (not connect/disconnect)
        assert!(Tpci::resolve(0b1000_0010, false, false).is_err());
    }

    #[test]
    fn sequence_number_and_predicate_accessors() {
        assert_eq!(Tpci::DataConnected(7).sequence_number(), 7);
        assert!(Tpci::DataConnected(7).is_numbered());
        assert!(!Tpci::DataGroup.is_numbered());
        assert!(Tpci::Ack(2).is_control());
        assert!(!Tpci::DataGroup.is_control());
    }

    #[test]
    fn encode_rejects_mismatched_destination_context() {
        assert!(Tpci::DataBroadcast.encode(true, false).is_err());
        assert!(Tpci::DataIndividual.encode(true, false).is_err());
        assert!(Tpci::DataConnected(0).encode(true, false).is_err());
    }
}
