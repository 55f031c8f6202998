//! Data Secure (C5): AES-128-CCM telegram protection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use super::asdu::{block_0, counter_0, SecurityAlgorithm, SecurityControlField};
use super::primitives::ctr_mask_and_crypt;
use crate::address::{Destination, GroupAddress, IndividualAddress};
use crate::apci::Apci;
use crate::cemi::CemiFrame;
use crate::error::{KnxError, Result};

/// Milliseconds between the Unix epoch and 2018-01-05T00:00:00Z, the KNX
/// Data Secure sequence-number epoch.
const SEQUENCE_EPOCH_MS: u64 = 1_515_110_400_000;

/// Decrypted Data Secure key material: groups requiring secured
/// communication, and the last-accepted sequence number per peer.
pub struct DataSecure {
    group_keys: HashMap<GroupAddress, [u8; 16]>,
    ia_sequence_table: Mutex<HashMap<IndividualAddress, u64>>,
    sequence_number_sending: AtomicU64,
}

impl std::fmt::Debug for DataSecure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSecure")
            .field("secured_groups", &self.group_keys.len())
            .finish_non_exhaustive()
    }
}

impl DataSecure {
    #[must_use]
    pub fn new(group_keys: HashMap<GroupAddress, [u8; 16]>, ia_sequence_table: HashMap<IndividualAddress, u64>) -> Self {
        let initial = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(SEQUENCE_EPOCH_MS)
            .saturating_sub(SEQUENCE_EPOCH_MS)
            .max(1);
        Self {
            group_keys,
            ia_sequence_table: Mutex::new(ia_sequence_table),
            sequence_number_sending: AtomicU64::new(initial),
        }
    }

    #[must_use]
    pub fn requires_security(&self, destination: GroupAddress) -> bool {
        self.group_keys.contains_key(&destination)
    }

    /// Replace `frame`'s payload with a `SecureAPDU` if its destination
    /// requires Data Secure; a no-op otherwise.
    pub fn secure_outgoing(&self, frame: &mut CemiFrame) -> Result<()> {
        let dst = match &frame.destination {
            Destination::Group(g) => *g,
            _ => return Ok(()),
        };
        let Some(key) = self.group_keys.get(&dst) else {
            return Ok(());
        };

        let plain_apci = frame.payload.take().ok_or_else(KnxError::wrong_payload_kind)?;
        let (code, trailer) = plain_apci.encode()?;
        let mut plain_apdu = vec![((code >> 8) & 0x03) as u8, (code & 0xFF) as u8];
        plain_apdu.extend_from_slice(&trailer);

        let seq = self.sequence_number_sending.fetch_add(1, Ordering::SeqCst);
        let scf = SecurityControlField::for_data(SecurityAlgorithm::CcmEncryption);
        let src = u16::from(frame.source);
        let dst_raw = dst.raw();
        let tpci_octet = frame.tpci.encode(true, dst_raw == 0)? | 0x03;

        let b0 = block_0(seq, src, dst_raw, frame.flags.ctrl1, tpci_octet, plain_apdu.len() as u8);
        let c0 = counter_0(seq, src, dst_raw);

        let full_mac = super::primitives::cbc_mac(key, b0, &[&[scf.to_u8()][..], &plain_apdu].concat());
        let mut mac = [full_mac[0], full_mac[1], full_mac[2], full_mac[3]];

        let mut ciphertext = plain_apdu;
        ctr_mask_and_crypt(key, c0, &mut mac, &mut ciphertext);

        let mut secured_data = seq.to_be_bytes()[2..8].to_vec();
        secured_data.extend_from_slice(&ciphertext);
        secured_data.extend_from_slice(&mac);

        frame.payload = Some(Apci::SecureApdu { scf: scf.to_u8(), secured_data });
        Ok(())
    }

    /// If `frame` carries a `SecureAPDU`, verify and decrypt it in place,
    /// returning `true`. Returns `false` unchanged if the payload is plain.
    pub fn process_incoming(&self, frame: &mut CemiFrame) -> Result<bool> {
        let (scf, secured_data) = match &frame.payload {
            Some(Apci::SecureApdu { scf, secured_data }) => (*scf, secured_data.clone()),
            _ => return Ok(false),
        };
        let scf = SecurityControlField::from_u8(scf)?;
        if scf.tool_access || scf.system_broadcast {
            return Err(KnxError::unsupported_secure_variant());
        }
        let dst = match &frame.destination {
            Destination::Group(g) => *g,
            _ => return Err(KnxError::point_to_point_secure_unsupported()),
        };
        let key = self.group_keys.get(&dst).ok_or_else(KnxError::missing_key)?;

        if secured_data.len() < 10 {
            return Err(KnxError::mac_mismatch());
        }
        let seq_bytes = &secured_data[0..6];
        let mut seq_buf = [0u8; 8];
        seq_buf[2..8].copy_from_slice(seq_bytes);
        let seq = u64::from_be_bytes(seq_buf);
        let ciphertext_len = secured_data.len() - 6 - 4;
        let mut ciphertext = secured_data[6..6 + ciphertext_len].to_vec();
        let received_mac = &secured_data[6 + ciphertext_len..];
        let mut mac = [received_mac[0], received_mac[1], received_mac[2], received_mac[3]];

        {
            let table = self.ia_sequence_table.lock().expect("Data Secure sequence table mutex poisoned");
            let last = table.get(&frame.source).ok_or_else(KnxError::unknown_sender)?;
            if seq <= *last {
                return Err(KnxError::replay_rejected());
            }
        }

        let src = u16::from(frame.source);
        let dst_raw = dst.raw();
        let c0 = counter_0(seq, src, dst_raw);
        ctr_mask_and_crypt(key, c0, &mut mac, &mut ciphertext);

        let tpci_octet = frame.tpci.encode(true, dst_raw == 0)? | 0x03;
        let b0 = block_0(seq, src, dst_raw, frame.flags.ctrl1, tpci_octet, ciphertext.len() as u8);
        let expected = super::primitives::cbc_mac(key, b0, &[&[scf.to_u8()][..], &ciphertext].concat());
        if mac != expected[0..4] {
            return Err(KnxError::mac_mismatch());
        }

        self.ia_sequence_table
            .lock()
            .expect("Data Secure sequence table mutex poisoned")
            .insert(frame.source, seq);

        let hi = ciphertext[0] & 0x03;
        let lo = ciphertext[1];
        frame.payload = Some(Apci::decode(hi, lo, &ciphertext[2..])?);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::IndividualAddress;
    use crate::apci::GroupValue;
    use crate::cemi::{CemiFlags, CemiMessageCode};
    use crate::tpci::Tpci;

    fn sample_frame(payload: Apci) -> CemiFrame {
        let dst = Destination::Group(GroupAddress::new(0, 4, 0).unwrap());
        CemiFrame {
            message_code: CemiMessageCode::LDataReq,
            flags: CemiFlags::default_for(&dst),
            source: IndividualAddress::new(5, 0, 1).unwrap(),
            destination: dst,
            tpci: Tpci::DataGroup,
            payload: Some(payload),
        }
    }

    fn keyed_store(dst: GroupAddress, key: [u8; 16]) -> HashMap<GroupAddress, [u8; 16]> {
        let mut m = HashMap::new();
        m.insert(dst, key);
        m
    }

    #[test]
    fn secures_then_verifies_a_telegram_round_trip() {
        let dst = GroupAddress::new(0, 4, 0).unwrap();
        let key = [0x42u8; 16];
        let outgoing = DataSecure::new(keyed_store(dst, key), HashMap::new());
        let mut frame = sample_frame(Apci::GroupValueWrite(GroupValue::small(1).unwrap()));
        outgoing.secure_outgoing(&mut frame).unwrap();
        assert!(matches!(frame.payload, Some(Apci::SecureApdu { .. })));

        let mut seen = HashMap::new();
        seen.insert(frame.source, 0u64);
        let incoming = DataSecure::new(keyed_store(dst, key), seen);
        assert!(incoming.process_incoming(&mut frame).unwrap());
        assert_eq!(frame.payload, Some(Apci::GroupValueWrite(GroupValue::small(1).unwrap())));
    }

    #[test]
    fn replayed_sequence_number_is_rejected() {
        let dst = GroupAddress::new(0, 4, 0).unwrap();
        let key = [0x11u8; 16];
        let outgoing = DataSecure::new(keyed_store(dst, key), HashMap::new());
        let mut frame = sample_frame(Apci::GroupValueRead);
        outgoing.secure_outgoing(&mut frame).unwrap();

        let mut seen = HashMap::new();
        seen.insert(frame.source, 999_999);
        let incoming = DataSecure::new(keyed_store(dst, key), seen);
        assert!(incoming.process_incoming(&mut frame).unwrap_err().is_replay());
    }

    #[test]
    fn unknown_sender_is_rejected() {
        let dst = GroupAddress::new(0, 4, 0).unwrap();
        let key = [0x11u8; 16];
        let outgoing = DataSecure::new(keyed_store(dst, key), HashMap::new());
        let mut frame = sample_frame(Apci::GroupValueRead);
        outgoing.secure_outgoing(&mut frame).unwrap();

        let incoming = DataSecure::new(keyed_store(dst, key), HashMap::new());
        assert!(incoming.process_incoming(&mut frame).is_err());
    }

    #[test]
    fn plain_frame_to_unkeyed_destination_passes_through() {
        let outgoing = DataSecure::new(HashMap::new(), HashMap::new());
        let mut frame = sample_frame(Apci::GroupValueRead);
        outgoing.secure_outgoing(&mut frame).unwrap();
        assert_eq!(frame.payload, Some(Apci::GroupValueRead));
    }
}
