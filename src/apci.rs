//! Application-layer Protocol Control Information (APCI).
//!
//! An APDU's first two octets carry a 10-bit service code: the low 2 bits of
//! the first octet (shared with the TPCI control bits, see [`crate::tpci`])
//! hold the high 2 bits of the code, the second octet holds the low 8 bits.
//! [`Apci::encode`] returns those two octets (TPCI bits left as zero for the
//! caller to OR in) followed by any trailing payload; [`Apci::decode`] is the
//! inverse.

use crate::error::{KnxError, Result};

/// Code point for each modelled APCI service (already left-shifted into the
/// 10-bit code position used on the wire).
mod code {
    pub const GROUP_VALUE_READ: u16 = 0x000;
    pub const GROUP_VALUE_RESPONSE: u16 = 0x040;
    pub const GROUP_VALUE_WRITE: u16 = 0x080;
    pub const INDIVIDUAL_ADDRESS_WRITE: u16 = 0x0C0;
    pub const INDIVIDUAL_ADDRESS_READ: u16 = 0x100;
    pub const INDIVIDUAL_ADDRESS_RESPONSE: u16 = 0x140;
    pub const ADC_READ: u16 = 0x180;
    pub const ADC_RESPONSE: u16 = 0x1C0;
    pub const MEMORY_READ: u16 = 0x200;
    pub const MEMORY_RESPONSE: u16 = 0x240;
    pub const MEMORY_WRITE: u16 = 0x280;
    pub const DEVICE_DESCRIPTOR_READ: u16 = 0x300;
    pub const DEVICE_DESCRIPTOR_RESPONSE: u16 = 0x340;
    pub const RESTART: u16 = 0x380;
    pub const PROPERTY_VALUE_READ: u16 = 0x3D5;
    pub const PROPERTY_VALUE_RESPONSE: u16 = 0x3D6;
    pub const PROPERTY_VALUE_WRITE: u16 = 0x3D7;
    pub const SECURE_APDU: u16 = 0x3F1;
}

/// Payload of `GroupValueWrite`/`GroupValueResponse`: either a 6-bit value
/// packed into the APCI's own low bits, or 1..14 appended octets. The choice
/// is determined by the payload itself, not by the service code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupValue {
    Small(u8),
    Bytes(Vec<u8>),
}

impl GroupValue {
    fn small_or_err(value: u8) -> Result<Self> {
        if value > 0x3F {
            return Err(KnxError::wrong_payload_kind());
        }
        Ok(Self::Small(value))
    }

    fn bytes_or_err(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() || data.len() > 14 {
            return Err(KnxError::wrong_payload_kind());
        }
        Ok(Self::Bytes(data))
    }
}

/// A decoded/to-be-encoded application-layer service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Apci {
    GroupValueRead,
    GroupValueResponse(GroupValue),
    GroupValueWrite(GroupValue),
    PropertyValueRead {
        object_index: u8,
        property_id: u8,
        count: u8,
        start_index: u16,
    },
    PropertyValueResponse {
        object_index: u8,
        property_id: u8,
        count: u8,
        start_index: u16,
        data: Vec<u8>,
    },
    PropertyValueWrite {
        object_index: u8,
        property_id: u8,
        count: u8,
        start_index: u16,
        data: Vec<u8>,
    },
    MemoryRead {
        number: u8,
        address: u16,
    },
    MemoryWrite {
        number: u8,
        address: u16,
        data: Vec<u8>,
    },
    MemoryResponse {
        number: u8,
        address: u16,
        data: Vec<u8>,
    },
    DeviceDescriptorRead {
        descriptor: u8,
    },
    DeviceDescriptorResponse {
        descriptor: u8,
        value: u16,
    },
    Restart,
    IndividualAddressRead,
    IndividualAddressWrite {
        address: u16,
    },
    IndividualAddressResponse,
    AdcRead {
        channel: u8,
        count: u8,
    },
    AdcResponse {
        channel: u8,
        count: u8,
        value: u16,
    },
    SecureApdu {
        scf: u8,
        secured_data: Vec<u8>,
    },
    /// An escape-prefixed code this crate does not model explicitly.
    Other {
        apci: u16,
        data: Vec<u8>,
    },
}

fn property_trailer(object_index: u8, property_id: u8, count: u8, start_index: u16) -> Result<[u8; 4]> {
    if count > 0x0F || count == 0 {
        return Err(KnxError::wrong_payload_kind());
    }
    if start_index > 0x0FFF {
        return Err(KnxError::wrong_payload_kind());
    }
    let hi = (count << 4) | ((start_index >> 8) as u8 & 0x0F);
    let lo = (start_index & 0xFF) as u8;
    Ok([object_index, property_id, hi, lo])
}

fn parse_property_trailer(trailer: &[u8]) -> Result<(u8, u8, u8, u16)> {
    if trailer.len() < 4 {
        return Err(KnxError::malformed_trailer());
    }
    let object_index = trailer[0];
    let property_id = trailer[1];
    let count = trailer[2] >> 4;
    let start_index = (u16::from(trailer[2] & 0x0F) << 8) | u16::from(trailer[3]);
    Ok((object_index, property_id, count, start_index))
}

impl Apci {
    /// Encode into `(code, trailer)`: `code` is the 10-bit APCI value,
    /// `trailer` holds any payload bytes beyond the two code octets (for
    /// `Small` group values the value is folded into `code`'s low bits).
    pub fn encode(&self) -> Result<(u16, Vec<u8>)> {
        match self {
            Self::GroupValueRead => Ok((code::GROUP_VALUE_READ, Vec::new())),
            Self::GroupValueResponse(v) => Ok(encode_group_value(code::GROUP_VALUE_RESPONSE, v)),
            Self::GroupValueWrite(v) => Ok(encode_group_value(code::GROUP_VALUE_WRITE, v)),
            Self::PropertyValueRead {
                object_index,
                property_id,
                count,
                start_index,
            } => {
                let trailer = property_trailer(*object_index, *property_id, *count, *start_index)?;
                Ok((code::PROPERTY_VALUE_READ, trailer.to_vec()))
            }
            Self::PropertyValueResponse {
                object_index,
                property_id,
                count,
                start_index,
                data,
            } => {
                let mut trailer = property_trailer(*object_index, *property_id, *count, *start_index)?.to_vec();
                trailer.extend_from_slice(data);
                Ok((code::PROPERTY_VALUE_RESPONSE, trailer))
            }
            Self::PropertyValueWrite {
                object_index,
                property_id,
                count,
                start_index,
                data,
            } => {
                let mut trailer = property_trailer(*object_index, *property_id, *count, *start_index)?.to_vec();
                trailer.extend_from_slice(data);
                Ok((code::PROPERTY_VALUE_WRITE, trailer))
            }
            Self::MemoryRead { number, address } => {
                if *number > 0x3F {
                    return Err(KnxError::wrong_payload_kind());
                }
                let code = code::MEMORY_READ | u16::from(*number);
                Ok((code, address.to_be_bytes().to_vec()))
            }
            Self::MemoryWrite { number, address, data } => {
                if *number > 0x3F {
                    return Err(KnxError::wrong_payload_kind());
                }
                let code = code::MEMORY_WRITE | u16::from(*number);
                let mut trailer = address.to_be_bytes().to_vec();
                trailer.extend_from_slice(data);
                Ok((code, trailer))
            }
            Self::MemoryResponse { number, address, data } => {
                if *number > 0x3F {
                    return Err(KnxError::wrong_payload_kind());
                }
                let code = code::MEMORY_RESPONSE | u16::from(*number);
                let mut trailer = address.to_be_bytes().to_vec();
                trailer.extend_from_slice(data);
                Ok((code, trailer))
            }
            Self::DeviceDescriptorRead { descriptor } => {
                if *descriptor > 0x3F {
                    return Err(KnxError::wrong_payload_kind());
                }
                Ok((code::DEVICE_DESCRIPTOR_READ | u16::from(*descriptor), Vec::new()))
            }
            Self::DeviceDescriptorResponse { descriptor, value } => {
                if *descriptor > 0x3F {
                    return Err(KnxError::wrong_payload_kind());
                }
                let code = code::DEVICE_DESCRIPTOR_RESPONSE | u16::from(*descriptor);
                Ok((code, value.to_be_bytes().to_vec()))
            }
            Self::Restart => Ok((code::RESTART, Vec::new())),
            Self::IndividualAddressRead => Ok((code::INDIVIDUAL_ADDRESS_READ, Vec::new())),
            Self::IndividualAddressWrite { address } => {
                Ok((code::INDIVIDUAL_ADDRESS_WRITE, address.to_be_bytes().to_vec()))
            }
            Self::IndividualAddressResponse => Ok((code::INDIVIDUAL_ADDRESS_RESPONSE, Vec::new())),
            Self::AdcRead { channel, count } => {
                if *channel > 0x3F {
                    return Err(KnxError::wrong_payload_kind());
                }
                Ok((code::ADC_READ | u16::from(*channel), vec![*count]))
            }
            Self::AdcResponse { channel, count, value } => {
                if *channel > 0x3F {
                    return Err(KnxError::wrong_payload_kind());
                }
                let mut trailer = vec![*count];
                trailer.extend_from_slice(&value.to_be_bytes());
                Ok((code::ADC_RESPONSE | u16::from(*channel), trailer))
            }
            Self::SecureApdu { scf, secured_data } => {
                let mut trailer = vec![*scf];
                trailer.extend_from_slice(secured_data);
                Ok((code::SECURE_APDU, trailer))
            }
            Self::Other { apci, data } => Ok((*apci, data.clone())),
        }
    }

    /// Decode from the two APCI octets (`hi` = the TPCI-shared octet, `lo` =
    /// the following octet) plus any remaining trailer bytes.
    pub fn decode(hi: u8, lo: u8, trailer: &[u8]) -> Result<Self> {
        let apci = (u16::from(hi & 0x03) << 8) | u16::from(lo);

        match apci & 0x3C0 {
            code::GROUP_VALUE_READ if apci == code::GROUP_VALUE_READ => Ok(Self::GroupValueRead),
            code::GROUP_VALUE_RESPONSE => Ok(Self::GroupValueResponse(decode_group_value(lo, trailer))),
            code::GROUP_VALUE_WRITE => Ok(Self::GroupValueWrite(decode_group_value(lo, trailer))),
            _ => Self::decode_extended(apci, lo, trailer),
        }
    }

    fn decode_extended(apci: u16, lo: u8, trailer: &[u8]) -> Result<Self> {
        match apci {
            code::INDIVIDUAL_ADDRESS_WRITE => {
                if trailer.len() < 2 {
                    return Err(KnxError::malformed_trailer());
                }
                Ok(Self::IndividualAddressWrite {
                    address: u16::from_be_bytes([trailer[0], trailer[1]]),
                })
            }
            code::INDIVIDUAL_ADDRESS_READ => Ok(Self::IndividualAddressRead),
            code::INDIVIDUAL_ADDRESS_RESPONSE => Ok(Self::IndividualAddressResponse),
            code::RESTART => Ok(Self::Restart),
            code::PROPERTY_VALUE_READ => {
                let (object_index, property_id, count, start_index) = parse_property_trailer(trailer)?;
                Ok(Self::PropertyValueRead {
                    object_index,
                    property_id,
                    count,
                    start_index,
                })
            }
            code::PROPERTY_VALUE_RESPONSE => {
                let (object_index, property_id, count, start_index) = parse_property_trailer(trailer)?;
                Ok(Self::PropertyValueResponse {
                    object_index,
                    property_id,
                    count,
                    start_index,
                    data: trailer[4..].to_vec(),
                })
            }
            code::PROPERTY_VALUE_WRITE => {
                let (object_index, property_id, count, start_index) = parse_property_trailer(trailer)?;
                Ok(Self::PropertyValueWrite {
                    object_index,
                    property_id,
                    count,
                    start_index,
                    data: trailer[4..].to_vec(),
                })
            }
            code::SECURE_APDU => {
                if trailer.is_empty() {
                    return Err(KnxError::malformed_trailer());
                }
                Ok(Self::SecureApdu {
                    scf: trailer[0],
                    secured_data: trailer[1..].to_vec(),
                })
            }
            _ => Self::decode_masked(apci, lo, trailer),
        }
    }

    fn decode_masked(apci: u16, lo: u8, trailer: &[u8]) -> Result<Self> {
        if apci & !0x3F == code::MEMORY_READ {
            if trailer.len() < 2 {
                return Err(KnxError::malformed_trailer());
            }
            return Ok(Self::MemoryRead {
                number: lo & 0x3F,
                address: u16::from_be_bytes([trailer[0], trailer[1]]),
            });
        }
        if apci & !0x3F == code::MEMORY_WRITE {
            if trailer.len() < 2 {
                return Err(KnxError::malformed_trailer());
            }
            return Ok(Self::MemoryWrite {
                number: lo & 0x3F,
                address: u16::from_be_bytes([trailer[0], trailer[1]]),
                data: trailer[2..].to_vec(),
            });
        }
        if apci & !0x3F == code::MEMORY_RESPONSE {
            if trailer.len() < 2 {
                return Err(KnxError::malformed_trailer());
            }
            return Ok(Self::MemoryResponse {
                number: lo & 0x3F,
                address: u16::from_be_bytes([trailer[0], trailer[1]]),
                data: trailer[2..].to_vec(),
            });
        }
        if apci & !0x3F == code::DEVICE_DESCRIPTOR_READ {
            return Ok(Self::DeviceDescriptorRead { descriptor: lo & 0x3F });
        }
        if apci & !0x3F == code::DEVICE_DESCRIPTOR_RESPONSE {
            if trailer.len() < 2 {
                return Err(KnxError::malformed_trailer());
            }
            return Ok(Self::DeviceDescriptorResponse {
                descriptor: lo & 0x3F,
                value: u16::from_be_bytes([trailer[0], trailer[1]]),
            });
        }
        if apci & !0x3F == code::ADC_READ {
            let count = trailer.first().copied().ok_or_else(KnxError::malformed_trailer)?;
            return Ok(Self::AdcRead { channel: lo & 0x3F, count });
        }
        if apci & !0x3F == code::ADC_RESPONSE {
            if trailer.len() < 3 {
                return Err(KnxError::malformed_trailer());
            }
            return Ok(Self::AdcResponse {
                channel: lo & 0x3F,
                count: trailer[0],
                value: u16::from_be_bytes([trailer[1], trailer[2]]),
            });
        }

        if apci & 0x3C0 == 0x3C0 {
            return Ok(Self::Other {
                apci,
                data: trailer.to_vec(),
            });
        }

        Err(KnxError::unknown_apci())
    }
}

fn encode_group_value(code: u16, value: &GroupValue) -> (u16, Vec<u8>) {
    match value {
        GroupValue::Small(v) => (code | u16::from(v & 0x3F), Vec::new()),
        GroupValue::Bytes(bytes) => (code, bytes.clone()),
    }
}

fn decode_group_value(lo: u8, trailer: &[u8]) -> GroupValue {
    if trailer.is_empty() {
        GroupValue::Small(lo & 0x3F)
    } else {
        GroupValue::Bytes(trailer.to_vec())
    }
}

impl GroupValue {
    /// Construct a small (≤6-bit) payload, validating the range.
    pub fn small(value: u8) -> Result<Self> {
        Self::small_or_err(value)
    }

    /// Construct a byte-string payload, validating the 1..14 length bound.
    pub fn bytes(data: Vec<u8>) -> Result<Self> {
        Self::bytes_or_err(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(apci: &Apci) -> Apci {
        let (code, trailer) = apci.encode().unwrap();
        let hi = ((code >> 8) & 0x03) as u8;
        let lo = (code & 0xFF) as u8;
        Apci::decode(hi, lo, &trailer).unwrap()
    }

    #[test]
    fn group_value_read_roundtrip() {
        assert_eq!(roundtrip(&Apci::GroupValueRead), Apci::GroupValueRead);
    }

    #[test]
    fn group_value_write_small_roundtrip() {
        let apci = Apci::GroupValueWrite(GroupValue::small(0x2A).unwrap());
        assert_eq!(roundtrip(&apci), apci);
    }

    #[test]
    fn group_value_write_bytes_roundtrip() {
        let apci = Apci::GroupValueWrite(GroupValue::bytes(vec![0x0D, 0x17, 0x2A]).unwrap());
        assert_eq!(roundtrip(&apci), apci);
    }

    #[test]
    fn group_value_write_bytes_rejects_empty_and_oversized() {
        assert!(GroupValue::bytes(Vec::new()).is_err());
        assert!(GroupValue::bytes(vec![0u8; 15]).is_err());
    }

    #[test]
    fn memory_services_roundtrip() {
        let read = Apci::MemoryRead { number: 4, address: 0x1234 };
        assert_eq!(roundtrip(&read), read);

        let write = Apci::MemoryWrite {
            number: 4,
            address: 0x1234,
            data: vec![0xAB, 0xCD],
        };
        assert_eq!(roundtrip(&write), write);
    }

    #[test]
    fn device_descriptor_roundtrip() {
        let read = Apci::DeviceDescriptorRead { descriptor: 0 };
        assert_eq!(roundtrip(&read), read);

        let resp = Apci::DeviceDescriptorResponse {
            descriptor: 0,
            value: 0x07B0,
        };
        assert_eq!(roundtrip(&resp), resp);
    }

    #[test]
    fn property_value_roundtrip() {
        let read = Apci::PropertyValueRead {
            object_index: 0,
            property_id: 0x0C,
            count: 1,
            start_index: 1,
        };
        assert_eq!(roundtrip(&read), read);

        let resp = Apci::PropertyValueResponse {
            object_index: 0,
            property_id: 0x0C,
            count: 1,
            start_index: 1,
            data: vec![0x00, 0x00, 0x07, 0xB0],
        };
        assert_eq!(roundtrip(&resp), resp);
    }

    #[test]
    fn secure_apdu_roundtrip() {
        let apci = Apci::SecureApdu {
            scf: 0x10,
            secured_data: vec![0x00, 0x25, 0x4a, 0xe1],
        };
        assert_eq!(roundtrip(&apci), apci);
    }

    #[test]
    fn individual_address_services_roundtrip() {
        assert_eq!(roundtrip(&Apci::IndividualAddressRead), Apci::IndividualAddressRead);
        assert_eq!(
            roundtrip(&Apci::IndividualAddressResponse),
            Apci::IndividualAddressResponse
        );
        let write = Apci::IndividualAddressWrite { address: 0x1102 };
        assert_eq!(roundtrip(&write), write);
    }

    #[test]
    fn restart_roundtrip() {
        assert_eq!(roundtrip(&Apci::Restart), Apci::Restart);
    }

    #[test]
    fn unknown_escape_code_decodes_to_other() {
        // 0x3E0 is an escape-range code this crate does not model.
        let hi = ((0x3E0u16 >> 8) & 0x03) as u8;
        let lo = (0x3E0u16 & 0xFF) as u8;
        let decoded = Apci::decode(hi, lo, &[0x01, 0x02]).unwrap();
        assert_eq!(
            decoded,
            Apci::Other {
                apci: 0x3E0,
                data: vec![0x01, 0x02]
            }
        );
    }

    #[test]
    fn unknown_primary_code_is_rejected() {
        // 0x0C0 is used (IndividualAddressWrite), pick an unused low nibble
        // outside modelled extended ranges and below the escape prefix.
        let hi = 0;
        let lo = 0x1F; // 0x01F, not a recognized primary/extended code.
        assert!(Apci::decode(hi, lo, &[]).is_err());
    }
}
