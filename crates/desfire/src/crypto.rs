//! Cryptographic primitives for the DESFire protocol
//!
//! This module provides the building blocks the authentication handshakes
//! and the secure key change rely on: AES-128 and two/three-key triple-DES
//! in CBC mode with caller-supplied IVs and no implicit padding, AES-CMAC,
//! the DESFire frame checksums, and the byte-rotation helper used on
//! challenge nonces.

use aes::Aes128;
use cipher::{
    Block, BlockCipher, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, BlockSizeUser, KeyInit,
    KeyIvInit, generic_array::GenericArray,
};
use cmac::{Cmac, Mac};
use crc::{CRC_16_ISO_IEC_14443_3_A, CRC_32_ISO_HDLC, Crc};
use des::{TdesEde2, TdesEde3};
use rand::{RngCore, rng};
use subtle::ConstantTimeEq;

/// AES block size in bytes
pub const BLOCK_AES: usize = 16;
/// DES block size in bytes
pub const BLOCK_DES: usize = 8;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_ISO_IEC_14443_3_A);

/// Last-byte constant of the CMAC subkey derivation (Rb from SP 800-38B)
const CMAC_RB: u8 = 0x87;

/// Error raised by the cipher primitives
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Cipher input is not block aligned
    #[error("Input length {len} is not a multiple of the {block}-byte block size")]
    BlockLength {
        /// Offending input length
        len: usize,
        /// Cipher block size
        block: usize,
    },

    /// Key material has a length no cipher variant accepts
    #[error("Unsupported key length: {0}")]
    KeyLength(usize),
}

fn check_blocks(len: usize, block: usize) -> Result<(), CryptoError> {
    if len % block != 0 {
        return Err(CryptoError::BlockLength { len, block });
    }
    Ok(())
}

fn cbc_encrypt_in_place<C>(mut encryptor: cbc::Encryptor<C>, data: &mut [u8])
where
    C: BlockCipher + BlockEncryptMut,
{
    for chunk in data.chunks_exact_mut(C::block_size()) {
        encryptor.encrypt_block_mut(GenericArray::from_mut_slice(chunk));
    }
}

fn cbc_decrypt_in_place<C>(mut decryptor: cbc::Decryptor<C>, data: &mut [u8])
where
    C: BlockCipher + BlockDecryptMut,
{
    for chunk in data.chunks_exact_mut(C::block_size()) {
        decryptor.decrypt_block_mut(GenericArray::from_mut_slice(chunk));
    }
}

/// AES-128 CBC encryption in place with a caller-supplied IV
pub fn aes_cbc_encrypt(key: &[u8; 16], iv: &[u8; 16], data: &mut [u8]) -> Result<(), CryptoError> {
    check_blocks(data.len(), BLOCK_AES)?;
    cbc_encrypt_in_place(cbc::Encryptor::<Aes128>::new(key.into(), iv.into()), data);
    Ok(())
}

/// AES-128 CBC decryption in place with a caller-supplied IV
pub fn aes_cbc_decrypt(key: &[u8; 16], iv: &[u8; 16], data: &mut [u8]) -> Result<(), CryptoError> {
    check_blocks(data.len(), BLOCK_AES)?;
    cbc_decrypt_in_place(cbc::Decryptor::<Aes128>::new(key.into(), iv.into()), data);
    Ok(())
}

/// Triple-DES CBC encryption in place
///
/// A 16-byte key selects two-key EDE (K1, K2, K1); a 24-byte key selects
/// three-key EDE.
pub fn tdes_cbc_encrypt(key: &[u8], iv: &[u8; 8], data: &mut [u8]) -> Result<(), CryptoError> {
    check_blocks(data.len(), BLOCK_DES)?;
    match key.len() {
        16 => cbc_encrypt_in_place(
            cbc::Encryptor::<TdesEde2>::new_from_slices(key, iv)
                .map_err(|_| CryptoError::KeyLength(key.len()))?,
            data,
        ),
        24 => cbc_encrypt_in_place(
            cbc::Encryptor::<TdesEde3>::new_from_slices(key, iv)
                .map_err(|_| CryptoError::KeyLength(key.len()))?,
            data,
        ),
        len => return Err(CryptoError::KeyLength(len)),
    }
    Ok(())
}

/// Triple-DES CBC decryption in place
pub fn tdes_cbc_decrypt(key: &[u8], iv: &[u8; 8], data: &mut [u8]) -> Result<(), CryptoError> {
    check_blocks(data.len(), BLOCK_DES)?;
    match key.len() {
        16 => cbc_decrypt_in_place(
            cbc::Decryptor::<TdesEde2>::new_from_slices(key, iv)
                .map_err(|_| CryptoError::KeyLength(key.len()))?,
            data,
        ),
        24 => cbc_decrypt_in_place(
            cbc::Decryptor::<TdesEde3>::new_from_slices(key, iv)
                .map_err(|_| CryptoError::KeyLength(key.len()))?,
            data,
        ),
        len => return Err(CryptoError::KeyLength(len)),
    }
    Ok(())
}

/// AES-CMAC (NIST SP 800-38B) with the full 16-byte output
pub fn aes_cmac(key: &[u8; 16], message: &[u8]) -> [u8; 16] {
    let mut mac = <Cmac<Aes128> as KeyInit>::new(GenericArray::from_slice(key));
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// AES-CMAC truncated to the first `len` bytes
pub fn aes_cmac_truncated(key: &[u8; 16], message: &[u8], len: usize) -> Vec<u8> {
    aes_cmac(key, message)[..len].to_vec()
}

/// Derive the CMAC subkeys K1 and K2 for the given cipher key
///
/// K1 = dbl(E(K, 0^16)), K2 = dbl(K1), where dbl is a left shift by one bit
/// with a conditional XOR of Rb into the last byte.
pub fn cmac_subkeys(key: &[u8; 16]) -> ([u8; 16], [u8; 16]) {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut l = Block::<Aes128>::default();
    cipher.encrypt_block(&mut l);

    let k1 = dbl(l.into());
    let k2 = dbl(k1);
    (k1, k2)
}

fn dbl(block: [u8; 16]) -> [u8; 16] {
    let mut out = [0u8; 16];
    let mut carry = 0u8;
    for (o, b) in out.iter_mut().zip(block.iter()).rev() {
        *o = (b << 1) | carry;
        carry = b >> 7;
    }
    if carry != 0 {
        out[15] ^= CMAC_RB;
    }
    out
}

/// Rotate a buffer left by `n` bytes
pub fn rotate_left(data: &[u8], n: usize) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }
    let n = n % data.len();
    let mut out = Vec::with_capacity(data.len());
    out.extend_from_slice(&data[n..]);
    out.extend_from_slice(&data[..n]);
    out
}

/// Pad a frame with 0x80 followed by zeros up to the next block boundary
///
/// Applied only when the data is not already a positive multiple of the
/// block size.
pub fn pad_frame(data: &mut Vec<u8>, block: usize) {
    if !data.is_empty() && data.len() % block == 0 {
        return;
    }
    data.push(0x80);
    while data.len() % block != 0 {
        data.push(0x00);
    }
}

/// DESFire CRC32 (reflected ISO 3309, init and xorout 0xFFFFFFFF), emitted
/// least-significant byte first
pub fn crc32_le(data: &[u8]) -> [u8; 4] {
    CRC32.checksum(data).to_le_bytes()
}

/// DESFire legacy CRC16 (CCITT reflected with init 0x6363), emitted
/// least-significant byte first
pub fn crc16_le(data: &[u8]) -> [u8; 2] {
    CRC16.checksum(data).to_le_bytes()
}

/// Timing-independent equality of two byte strings
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// Fill a buffer from the platform CSPRNG
pub fn fill_random(buf: &mut [u8]) {
    rng().fill_bytes(buf);
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    // NIST SP 800-38A F.2.1, CBC-AES128 encrypt
    #[test]
    fn test_aes_cbc_vectors() {
        let key = hex!("2b7e151628aed2a6abf7158809cf4f3c");
        let iv = hex!("000102030405060708090a0b0c0d0e0f");
        let mut data = hex!(
            "6bc1bee22e409f96e93d7e117393172a"
            "ae2d8a571e03ac9c9eb76fac45af8e51"
        );

        aes_cbc_encrypt(&key, &iv, &mut data).unwrap();
        assert_eq!(
            data,
            hex!(
                "7649abac8119b246cee98e9b12e9197d"
                "5086cb9b507219ee95db113a917678b2"
            )
        );

        aes_cbc_decrypt(&key, &iv, &mut data).unwrap();
        assert_eq!(data[..16], hex!("6bc1bee22e409f96e93d7e117393172a"));
    }

    #[test]
    fn test_aes_cbc_rejects_partial_block() {
        let key = [0u8; 16];
        let iv = [0u8; 16];
        let mut data = [0u8; 15];
        assert!(matches!(
            aes_cbc_encrypt(&key, &iv, &mut data),
            Err(CryptoError::BlockLength { len: 15, block: 16 })
        ));
    }

    // With K1 == K2, two-key EDE degenerates to single DES; the classic
    // "Now is t" vector applies.
    #[test]
    fn test_tdes_degenerate_vector() {
        let key = hex!("0123456789abcdef0123456789abcdef");
        let iv = [0u8; 8];
        let mut data = hex!("4e6f772069732074");

        tdes_cbc_encrypt(&key, &iv, &mut data).unwrap();
        assert_eq!(data, hex!("3fa40e8a984d4815"));

        tdes_cbc_decrypt(&key, &iv, &mut data).unwrap();
        assert_eq!(data, hex!("4e6f772069732074"));
    }

    #[test]
    fn test_tdes_three_key_chaining() {
        let key = hex!("0123456789abcdef23456789abcdef01456789abcdef0123");
        let iv = hex!("0001020304050607");
        let original = hex!("00112233445566778899aabbccddeeff");
        let mut data = original;

        tdes_cbc_encrypt(&key, &iv, &mut data).unwrap();
        assert_ne!(data, original);
        tdes_cbc_decrypt(&key, &iv, &mut data).unwrap();
        assert_eq!(data, original);
    }

    #[test]
    fn test_tdes_rejects_bad_key_length() {
        let iv = [0u8; 8];
        let mut data = [0u8; 8];
        assert!(matches!(
            tdes_cbc_encrypt(&[0u8; 8], &iv, &mut data),
            Err(CryptoError::KeyLength(8))
        ));
    }

    // RFC 4493 test vectors
    #[test]
    fn test_aes_cmac_vectors() {
        let key = hex!("2b7e151628aed2a6abf7158809cf4f3c");

        assert_eq!(aes_cmac(&key, &[]), hex!("bb1d6929e95937287fa37d129b756746"));
        assert_eq!(
            aes_cmac(&key, &hex!("6bc1bee22e409f96e93d7e117393172a")),
            hex!("070a16b46b4d4144f79bdd9dd04a287c")
        );
        assert_eq!(
            aes_cmac(
                &key,
                &hex!(
                    "6bc1bee22e409f96e93d7e117393172a"
                    "ae2d8a571e03ac9c9eb76fac45af8e51"
                    "30c81c46a35ce411"
                )
            ),
            hex!("dfa66747de9ae63030ca32611497c827")
        );
    }

    #[test]
    fn test_cmac_subkeys() {
        let key = hex!("2b7e151628aed2a6abf7158809cf4f3c");
        let (k1, k2) = cmac_subkeys(&key);

        // RFC 4493 subkey generation example
        assert_eq!(k1, hex!("fbeed618357133667c85e08f7236a8de"));
        assert_eq!(k2, hex!("f7ddac306ae266ccf90bc11ee46d513b"));

        // K2 must equal dbl(K1)
        assert_eq!(k2, dbl(k1));
    }

    #[test]
    fn test_aes_cmac_truncated() {
        let key = hex!("2b7e151628aed2a6abf7158809cf4f3c");
        let full = aes_cmac(&key, b"abc");
        assert_eq!(aes_cmac_truncated(&key, b"abc", 8), &full[..8]);
    }

    #[test]
    fn test_rotate_left() {
        assert_eq!(rotate_left(&[1, 2, 3, 4], 1), vec![2, 3, 4, 1]);
        assert_eq!(rotate_left(&[1, 2, 3, 4], 4), vec![1, 2, 3, 4]);
        assert_eq!(rotate_left(&[1, 2, 3, 4], 5), vec![2, 3, 4, 1]);
        assert!(rotate_left(&[], 3).is_empty());
    }

    #[test]
    fn test_rotate_left_composition() {
        let data: Vec<u8> = (0u8..16).collect();
        let mut rotated = data.clone();
        for _ in 0..5 {
            rotated = rotate_left(&rotated, 1);
        }
        assert_eq!(rotated, rotate_left(&data, 5));
    }

    #[test]
    fn test_pad_frame() {
        let mut data = vec![0xAA; 21];
        pad_frame(&mut data, 16);
        assert_eq!(data.len(), 32);
        assert_eq!(data[21], 0x80);
        assert!(data[22..].iter().all(|&b| b == 0x00));

        // Already aligned data is left alone
        let mut data = vec![0xAA; 16];
        pad_frame(&mut data, 16);
        assert_eq!(data.len(), 16);

        // The empty frame still gets a padding block
        let mut data = Vec::new();
        pad_frame(&mut data, 16);
        assert_eq!(data.len(), 16);
        assert_eq!(data[0], 0x80);
    }

    #[test]
    fn test_crc32_vectors() {
        assert_eq!(crc32_le(&[]), [0x00, 0x00, 0x00, 0x00]);
        assert_eq!(u32::from_le_bytes(crc32_le(b"123456789")), 0xCBF4_3926);
    }

    #[test]
    fn test_crc16_vector() {
        assert_eq!(u16::from_le_bytes(crc16_le(b"123456789")), 0xBF05);
    }

    #[test]
    fn test_ct_eq() {
        assert!(ct_eq(&[1, 2, 3], &[1, 2, 3]));
        assert!(!ct_eq(&[1, 2, 3], &[1, 2, 4]));
        assert!(!ct_eq(&[1, 2, 3], &[1, 2]));
    }

    #[test]
    fn test_fill_random() {
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        fill_random(&mut a);
        fill_random(&mut b);
        // Not a randomness test, just a sanity check the buffers are filled
        assert_ne!(a, b);
    }
}
