//! CBC-MAC and CTR keystream built directly on the AES-128 block cipher.
//!
//! KNX Data Secure's `block_0`/`counter_0` construction and 4-octet MAC
//! truncation don't match the generic `ccm` crate's wire assumptions, so the
//! MAC accumulator is a hand-written block-chaining loop and the keystream
//! reuses the `ctr` crate's stream cipher directly against our own IV.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use aes::Aes128;

pub type Block = [u8; 16];

/// CBC-MAC over `message`, zero-padding the final block. `block0` is
/// encrypted first (unconditionally, as CCM's `B_0`), then every 16-byte
/// chunk of `message` is XORed in and encrypted in turn. Returns the full
/// final cipher block; callers truncate to the 4 octets KNX Data Secure
/// uses as its MAC.
pub fn cbc_mac(key: &[u8; 16], block0: Block, message: &[u8]) -> Block {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut state = block0;
    encrypt_block(&cipher, &mut state);
    for chunk in message.chunks(16) {
        let mut block = [0u8; 16];
        block[..chunk.len()].copy_from_slice(chunk);
        for (s, b) in state.iter_mut().zip(block.iter()) {
            *s ^= b;
        }
        encrypt_block(&cipher, &mut state);
    }
    state
}

fn encrypt_block(cipher: &Aes128, block: &mut Block) {
    let mut ga = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut ga);
    block.copy_from_slice(&ga);
}

/// XOR-mask `mac` with the first keystream block derived from `counter0`,
/// then continue the same keystream over `payload` in place. Calling this
/// twice with the same key/counter/inputs undoes the transform, since CTR
/// is its own inverse — this one function serves both the outgoing
/// (encrypt) and incoming (decrypt) paths.
pub fn ctr_mask_and_crypt(key: &[u8; 16], counter0: Block, mac: &mut [u8; 4], payload: &mut [u8]) {
    let mut cipher = ctr::Ctr128BE::<Aes128>::new(GenericArray::from_slice(key), GenericArray::from_slice(&counter0));
    let mut mask = [0u8; 16];
    cipher.apply_keystream(&mut mask);
    for (m, k) in mac.iter_mut().zip(mask.iter()) {
        *m ^= k;
    }
    cipher.apply_keystream(payload);
}
