//! CEMI `L_Data` frame codec (C4).
//!
//! Wire layout: `message_code(1) | AddIL(1) | additional_info(AddIL) |
//! ctrl1(1) | ctrl2(1) | src(2) | dst(2) | NPDU_length(1) | TPDU`, where
//! `TPDU` is either a single control octet (`T_Connect`/`T_Disconnect`/
//! `T_ACK`/`T_NAK`) or a TPCI/APCI-high octet followed by an APCI-low octet
//! and any trailing APCI data. `NPDU_length` is the count of octets in the
//! TPDU minus one, i.e. `NPDU_length + 1 == TPDU.len()`; this stack does not
//! parse additional-info TLVs and rejects any frame that carries them.

use super::constants::CemiMessageCode;
use super::flags::CemiFlags;
use crate::address::{Destination, GroupAddress, IndividualAddress};
use crate::apci::Apci;
use crate::error::{KnxError, Result};
use crate::telegram::Telegram;
use crate::tpci::Tpci;

/// A parsed or about-to-be-serialized CEMI `L_Data` frame.
///
/// Invariants (enforced by [`Self::parse`] and [`Self::from_telegram`]):
/// 1. `message_code` is one of `L_Data.req` / `.ind` / `.con`.
/// 2. `flags.is_group_address()` agrees with `destination` being `Group`.
/// 3. `tpci.is_control()` implies `payload.is_none()`; otherwise `payload`
///    is always present.
/// 4. `NPDU_length + 1` equals the encoded TPDU length.
#[derive(Debug, Clone)]
pub struct CemiFrame {
    pub message_code: CemiMessageCode,
    pub flags: CemiFlags,
    pub source: IndividualAddress,
    pub destination: Destination,
    pub tpci: Tpci,
    pub payload: Option<Apci>,
}

impl CemiFrame {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 10 {
            return Err(KnxError::buffer_too_short("CEMI frame"));
        }
        let message_code = CemiMessageCode::from_u8(data[0]).ok_or_else(KnxError::unknown_message_code)?;
        let addil = data[1] as usize;
        if addil != 0 {
            return Err(KnxError::length_mismatch("additional info octets are not supported"));
        }
        let ctrl1 = data[2];
        let ctrl2 = data[3];
        let flags = CemiFlags::new(ctrl1, ctrl2);

        let source = IndividualAddress::decode(&data[4..6])?;
        let dst_raw = u16::from_be_bytes([data[6], data[7]]);
        let dst_is_group = flags.is_group_address();
        let destination = if dst_is_group {
            Destination::Group(GroupAddress::from(dst_raw))
        } else {
            Destination::Individual(IndividualAddress::from(dst_raw))
        };

        let npdu_length = data[8] as usize;
        let tpdu = &data[9..];
        if tpdu.len() != npdu_length + 1 {
            return Err(KnxError::length_mismatch("NPDU length does not match remaining octets"));
        }

        let tpci_octet = tpdu[0];
        let raw_tpci = Tpci::resolve(tpci_octet, dst_is_group, dst_raw == 0)?;

        let payload = if raw_tpci.is_control() {
            None
        } else {
            if tpdu.len() < 2 {
                return Err(KnxError::buffer_too_short("APCI"));
            }
            let hi = tpci_octet & 0x03;
            let lo = tpdu[1];
            Some(Apci::decode(hi, lo, &tpdu[2..])?)
        };

        Ok(Self {
            message_code,
            flags,
            source,
            destination,
            tpci: raw_tpci,
            payload,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let dst_is_group = self.destination.is_group();
        if dst_is_group != self.flags.is_group_address() {
            return Err(KnxError::invalid_control_field());
        }
        let dst_raw = match &self.destination {
            Destination::Group(g) => g.raw(),
            Destination::Individual(ia) => u16::from(*ia),
            Destination::Internal(_) => return Err(KnxError::wrong_payload_kind()),
        };

        let tpci_byte = self.tpci.encode(dst_is_group, dst_raw == 0)?;

        let mut tpdu = Vec::with_capacity(4);
        if self.tpci.is_control() {
            if self.payload.is_some() {
                return Err(KnxError::wrong_payload_kind());
            }
            tpdu.push(tpci_byte);
        } else {
            let apci = self.payload.as_ref().ok_or_else(KnxError::wrong_payload_kind)?;
            let (code, data) = apci.encode()?;
            let hi = ((code >> 8) & 0x03) as u8;
            let lo = (code & 0xFF) as u8;
            tpdu.push(tpci_byte | hi);
            tpdu.push(lo);
            tpdu.extend_from_slice(&data);
        }

        let npdu_length = u8::try_from(tpdu.len() - 1).map_err(|_| KnxError::length_mismatch("TPDU too long for NPDU_length"))?;

        let mut out = Vec::with_capacity(9 + tpdu.len());
        out.push(self.message_code.to_u8());
        out.push(0); // AddIL
        out.push(self.flags.ctrl1);
        out.push(self.flags.ctrl2);
        out.extend_from_slice(&u16::from(self.source).to_be_bytes());
        out.extend_from_slice(&dst_raw.to_be_bytes());
        out.push(npdu_length);
        out.extend_from_slice(&tpdu);
        Ok(out)
    }

    /// Build a frame from an outgoing telegram, filling in default flags.
    pub fn from_telegram(message_code: CemiMessageCode, telegram: &Telegram) -> Result<Self> {
        if matches!(telegram.destination, Destination::Internal(_)) {
            return Err(KnxError::wrong_payload_kind());
        }
        Ok(Self {
            message_code,
            flags: CemiFlags::default_for(&telegram.destination),
            source: telegram.source,
            destination: telegram.destination.clone(),
            tpci: telegram.tpci,
            payload: telegram.payload.clone(),
        })
    }

    /// Recover the telegram this frame carries (always `Incoming`; callers
    /// that need `Outgoing` re-tag it themselves, e.g. when replaying a
    /// loopback of their own request).
    #[must_use]
    pub fn to_telegram(&self) -> Telegram {
        Telegram::incoming(self.destination.clone(), self.source, self.tpci, self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apci::GroupValue;

    fn sample_flags(is_group: bool) -> CemiFlags {
        CemiFlags::new(0xBC, if is_group { 0xE0 } else { 0x60 })
    }

    #[test]
    fn group_write_roundtrips_through_encode_and_parse() {
        let frame = CemiFrame {
            message_code: CemiMessageCode::LDataInd,
            flags: sample_flags(true),
            source: IndividualAddress::new(1, 2, 2).unwrap(),
            destination: Destination::Group(GroupAddress::new_free(337)),
            tpci: Tpci::DataGroup,
            payload: Some(Apci::GroupValueWrite(GroupValue::bytes(vec![0x0D, 0x17, 0x2A]).unwrap())),
        };
        let encoded = frame.encode().unwrap();
        // Header (9) + TPCI/APCI-hi + APCI-lo + 3 data octets.
        assert_eq!(encoded.len(), 9 + 2 + 3);
        assert_eq!(encoded[8], 4); // NPDU_length = TPDU.len() - 1 = 5 - 1 = 4

        let parsed = CemiFrame::parse(&encoded).unwrap();
        assert_eq!(parsed.source, frame.source);
        assert!(matches!(parsed.destination, Destination::Group(g) if g.raw() == 337));
        assert_eq!(parsed.tpci, Tpci::DataGroup);
        match parsed.payload {
            Some(Apci::GroupValueWrite(GroupValue::Bytes(b))) => assert_eq!(b, vec![0x0D, 0x17, 0x2A]),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn literal_secure_frame_decodes_npdu_length_correctly() {
        // From the Data Secure scenario: src 5.0.1, dst group 0/4/0, a
        // SecureAPDU (apci 0x3F1) wrapping 18 octets of secured data.
        let data = [
            0x11, 0x00, 0xBC, 0xE0, 0x50, 0x01, 0x04, 0x00, 0x0E, 0x03, 0xF1, 0x10, 0x00, 0x25, 0x4A, 0xE1, 0xCB, 0x67,
            0xCD, 0x18, 0x4A, 0xFE, 0x57, 0x44,
        ];
        let frame = CemiFrame::parse(&data).unwrap();
        assert_eq!(frame.message_code, CemiMessageCode::LDataReq);
        assert_eq!(frame.source, IndividualAddress::new(5, 0, 1).unwrap());
        assert!(matches!(frame.destination, Destination::Group(g) if g.raw() == 1024));
        match frame.payload {
            Some(Apci::SecureApdu { scf, ref secured_data }) => {
                assert_eq!(scf, 0x10);
                assert_eq!(secured_data.len(), 12);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
        let re_encoded = frame.encode().unwrap();
        assert_eq!(re_encoded, data);
    }

    #[test]
    fn control_tpdu_carries_no_payload() {
        let frame = CemiFrame {
            message_code: CemiMessageCode::LDataReq,
            flags: sample_flags(false),
            source: IndividualAddress::new(1, 1, 1).unwrap(),
            destination: Destination::Individual(IndividualAddress::new(1, 1, 5).unwrap()),
            tpci: Tpci::Connect,
            payload: None,
        };
        let encoded = frame.encode().unwrap();
        assert_eq!(encoded[8], 0); // single-octet TPDU
        let parsed = CemiFrame::parse(&encoded).unwrap();
        assert_eq!(parsed.tpci, Tpci::Connect);
        assert!(parsed.payload.is_none());
    }

    #[test]
    fn mismatched_address_type_flag_is_rejected() {
        let frame = CemiFrame {
            message_code: CemiMessageCode::LDataReq,
            flags: sample_flags(false), // ctrl2 says individual
            source: IndividualAddress::new(1, 1, 1).unwrap(),
            destination: Destination::Group(GroupAddress::new(1, 1, 1).unwrap()),
            tpci: Tpci::DataGroup,
            payload: Some(Apci::GroupValueRead),
        };
        assert!(frame.encode().is_err());
    }

    #[test]
    fn from_telegram_rejects_internal_destination() {
        let internal: crate::address::InternalGroupAddress = "i-lamp".parse().unwrap();
        let telegram = Telegram::outgoing(internal, IndividualAddress::new(1, 1, 1).unwrap(), None);
        assert!(CemiFrame::from_telegram(CemiMessageCode::LDataReq, &telegram).is_err());
    }
}
