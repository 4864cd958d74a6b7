//! Authentication handshakes
//!
//! All three DESFire handshakes share one shape: the card sends an
//! encrypted RndB, the host answers with the encrypted concatenation of its
//! own RndA and the rotated RndB, and the card proves knowledge of the key
//! by returning the rotated RndA. The variants differ in block size,
//! cipher, IV policy, response preamble, and session-key derivation, so
//! they are modeled as one [`Handshake`] state machine dispatching on
//! [`AuthKind`].
//!
//! The state machine is pure: it consumes and produces frame payloads and
//! never touches the transport, which keeps every step testable with fixed
//! nonces. The engine drives it and applies the outcome to the session.

use zeroize::{Zeroize, Zeroizing};

use crate::constants::ins;
use crate::crypto::{self, CryptoError};
use crate::error::{Error, Result};
use crate::session::SessionKeys;

const ZERO_IV_DES: [u8; 8] = [0u8; 8];
const ZERO_IV_AES: [u8; 16] = [0u8; 16];

/// The four authentication command variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    /// Legacy DES/3DES handshake (opcode 0x0A)
    LegacyDes,
    /// AES handshake with byte-spliced session keys (opcode 0xAA)
    Aes,
    /// EV2 first authentication, establishing a transaction id (opcode 0x71)
    Ev2First,
    /// EV2 non-first authentication within a transaction (opcode 0x77)
    Ev2NonFirst,
}

impl AuthKind {
    /// DESFire opcode starting this handshake
    pub const fn opcode(self) -> u8 {
        match self {
            Self::LegacyDes => ins::AUTHENTICATE_LEGACY,
            Self::Aes => ins::AUTHENTICATE_AES,
            Self::Ev2First => ins::AUTHENTICATE_EV2_FIRST,
            Self::Ev2NonFirst => ins::AUTHENTICATE_EV2_NON_FIRST,
        }
    }

    /// Cipher block and nonce size of this handshake
    pub const fn block_size(self) -> usize {
        match self {
            Self::LegacyDes => crypto::BLOCK_DES,
            _ => crypto::BLOCK_AES,
        }
    }
}

/// Result of a completed handshake
#[derive(Debug)]
pub(crate) struct AuthOutcome {
    /// Derived session keys (absent for the legacy handshake)
    pub keys: Option<SessionKeys>,
    /// Transaction identifier (present after EV2First)
    pub transaction_id: Option<[u8; 4]>,
}

enum HandshakeState {
    AwaitingEncRndB,
    AwaitingEncRndAPrime,
    Done,
}

/// One in-flight authentication
pub(crate) struct Handshake {
    kind: AuthKind,
    key_no: u8,
    key: Zeroizing<Vec<u8>>,
    rnd_a: Zeroizing<Vec<u8>>,
    rnd_b: Zeroizing<Vec<u8>>,
    // Last block of the challenge ciphertext, the legacy decrypt IV
    challenge_tail: Zeroizing<Vec<u8>>,
    state: HandshakeState,
}

impl Handshake {
    /// Start a handshake with a fresh random RndA
    pub fn new(kind: AuthKind, key_no: u8, key: &[u8]) -> Result<Self> {
        let mut rnd_a = vec![0u8; kind.block_size()];
        crypto::fill_random(&mut rnd_a);
        Self::with_rnd_a(kind, key_no, key, rnd_a)
    }

    /// Start a handshake with a caller-chosen RndA
    pub(crate) fn with_rnd_a(
        kind: AuthKind,
        key_no: u8,
        key: &[u8],
        rnd_a: Vec<u8>,
    ) -> Result<Self> {
        let key_ok = match kind {
            AuthKind::LegacyDes => matches!(key.len(), 16 | 24),
            _ => key.len() == 16,
        };
        if !key_ok {
            return Err(CryptoError::KeyLength(key.len()).into());
        }
        debug_assert_eq!(rnd_a.len(), kind.block_size());

        Ok(Self {
            kind,
            key_no,
            key: Zeroizing::new(key.to_vec()),
            rnd_a: Zeroizing::new(rnd_a),
            rnd_b: Zeroizing::new(Vec::new()),
            challenge_tail: Zeroizing::new(Vec::new()),
            state: HandshakeState::AwaitingEncRndB,
        })
    }

    /// Handshake variant
    pub const fn kind(&self) -> AuthKind {
        self.kind
    }

    /// Key number this handshake authenticates
    pub const fn key_no(&self) -> u8 {
        self.key_no
    }

    /// Opcode and data of the frame that opens the handshake
    pub fn initial_frame(&self) -> (u8, Vec<u8>) {
        let data = match self.kind {
            // EV2First announces an empty PCDcap2
            AuthKind::Ev2First => vec![self.key_no, 0x00, 0x00],
            _ => vec![self.key_no],
        };
        (self.kind.opcode(), data)
    }

    fn aes_key(&self) -> &[u8; 16] {
        // Key length is validated in the constructor
        self.key.as_slice().try_into().expect("AES key length")
    }

    /// Process the card's encrypted RndB and produce the challenge frame
    pub fn respond(&mut self, enc_rnd_b: &[u8]) -> Result<Vec<u8>> {
        if !matches!(self.state, HandshakeState::AwaitingEncRndB) {
            return Err(Error::Protocol("handshake already consumed RndB"));
        }

        let block = self.kind.block_size();
        if enc_rnd_b.len() != block {
            self.burn();
            return Err(Error::CryptoLength {
                len: enc_rnd_b.len(),
                expected: block,
            });
        }

        let mut rnd_b = enc_rnd_b.to_vec();
        match self.kind {
            AuthKind::LegacyDes => crypto::tdes_cbc_decrypt(&self.key, &ZERO_IV_DES, &mut rnd_b)?,
            _ => crypto::aes_cbc_decrypt(self.aes_key(), &ZERO_IV_AES, &mut rnd_b)?,
        }
        self.rnd_b = Zeroizing::new(rnd_b);

        let mut challenge = Vec::with_capacity(2 * block);
        challenge.extend_from_slice(&self.rnd_a);
        challenge.extend_from_slice(&crypto::rotate_left(&self.rnd_b, 1));

        match self.kind {
            AuthKind::LegacyDes => {
                // The received ciphertext chains into the challenge
                let iv: [u8; 8] = enc_rnd_b.try_into().expect("checked block size");
                crypto::tdes_cbc_encrypt(&self.key, &iv, &mut challenge)?;
            }
            _ => crypto::aes_cbc_encrypt(self.aes_key(), &ZERO_IV_AES, &mut challenge)?,
        }

        self.challenge_tail = Zeroizing::new(challenge[challenge.len() - block..].to_vec());
        self.state = HandshakeState::AwaitingEncRndAPrime;
        Ok(challenge)
    }

    /// Verify the card's final frame and derive the session material
    pub fn finish(&mut self, payload: &[u8]) -> Result<AuthOutcome> {
        if !matches!(self.state, HandshakeState::AwaitingEncRndAPrime) {
            return Err(Error::Protocol("handshake is not awaiting RndA'"));
        }

        let block = self.kind.block_size();
        let (transaction_id, enc_prime) = match self.kind {
            AuthKind::Ev2First => {
                // TI(4) ‖ E(RndA')(16), optionally followed by PDcap2
                if payload.len() < 4 + block {
                    self.burn();
                    return Err(Error::CryptoLength {
                        len: payload.len(),
                        expected: 4 + block,
                    });
                }
                let ti: [u8; 4] = payload[..4].try_into().expect("checked length");
                (Some(ti), &payload[4..4 + block])
            }
            _ => {
                if payload.len() != block {
                    self.burn();
                    return Err(Error::CryptoLength {
                        len: payload.len(),
                        expected: block,
                    });
                }
                (None, payload)
            }
        };

        let mut prime = enc_prime.to_vec();
        match self.kind {
            AuthKind::LegacyDes => {
                let iv: [u8; 8] = self.challenge_tail.as_slice().try_into().expect("tail size");
                crypto::tdes_cbc_decrypt(&self.key, &iv, &mut prime)?;
            }
            _ => crypto::aes_cbc_decrypt(self.aes_key(), &ZERO_IV_AES, &mut prime)?,
        }

        let expected = crypto::rotate_left(&self.rnd_a, 1);
        let matches = crypto::ct_eq(&prime, &expected);
        prime.zeroize();
        if !matches {
            self.burn();
            return Err(Error::AuthMismatch);
        }

        let keys = match self.kind {
            AuthKind::LegacyDes => None,
            AuthKind::Aes => Some(splice_session_keys(&self.rnd_a, &self.rnd_b)),
            AuthKind::Ev2First | AuthKind::Ev2NonFirst => {
                let (sv1, sv2) = session_vectors(&self.rnd_a, &self.rnd_b);
                Some(SessionKeys::new(
                    crypto::aes_cmac(self.aes_key(), &sv1),
                    crypto::aes_cmac(self.aes_key(), &sv2),
                ))
            }
        };

        self.state = HandshakeState::Done;
        Ok(AuthOutcome {
            keys,
            transaction_id,
        })
    }

    /// Wipe nonce and key material immediately
    fn burn(&mut self) {
        self.rnd_a.zeroize();
        self.rnd_b.zeroize();
        self.challenge_tail.zeroize();
        self.key.zeroize();
        self.state = HandshakeState::Done;
    }
}

/// AES session keys spliced from the two nonces
fn splice_session_keys(rnd_a: &[u8], rnd_b: &[u8]) -> SessionKeys {
    let mut enc = [0u8; 16];
    enc[0..4].copy_from_slice(&rnd_a[0..4]);
    enc[4..8].copy_from_slice(&rnd_b[0..4]);
    enc[8..12].copy_from_slice(&rnd_a[12..16]);
    enc[12..16].copy_from_slice(&rnd_b[12..16]);

    let mut mac = [0u8; 16];
    mac[0..4].copy_from_slice(&rnd_a[4..8]);
    mac[4..8].copy_from_slice(&rnd_b[4..8]);
    mac[8..12].copy_from_slice(&rnd_a[8..12]);
    mac[12..16].copy_from_slice(&rnd_b[8..12]);

    SessionKeys::new(enc, mac)
}

/// EV2 session-vector inputs for the CMAC key derivation
pub(crate) fn session_vectors(rnd_a: &[u8], rnd_b: &[u8]) -> ([u8; 16], [u8; 16]) {
    let mut sv1 = [0u8; 16];
    sv1[0..6].copy_from_slice(&[0xA5, 0x5A, 0x00, 0x01, 0x00, 0x80]);
    sv1[6..8].copy_from_slice(&rnd_a[0..2]);
    sv1[8..10].copy_from_slice(&rnd_b[0..2]);
    sv1[10..13].copy_from_slice(&rnd_a[13..16]);
    sv1[13..16].copy_from_slice(&rnd_b[13..16]);

    let mut sv2 = sv1;
    sv2[0..2].copy_from_slice(&[0x5A, 0xA5]);

    (sv1, sv2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn rnd_a_16() -> Vec<u8> {
        (0xA1..=0xB0).collect()
    }

    fn rnd_b_16() -> Vec<u8> {
        (0xB1..=0xC0).collect()
    }

    #[test]
    fn test_initial_frames() {
        let hs = Handshake::with_rnd_a(AuthKind::LegacyDes, 0, &[0u8; 16], vec![0u8; 8]).unwrap();
        assert_eq!(hs.initial_frame(), (0x0A, vec![0x00]));

        let hs = Handshake::with_rnd_a(AuthKind::Ev2First, 2, &[0u8; 16], vec![0u8; 16]).unwrap();
        assert_eq!(hs.initial_frame(), (0x71, vec![0x02, 0x00, 0x00]));

        let hs = Handshake::with_rnd_a(AuthKind::Ev2NonFirst, 1, &[0u8; 16], vec![0u8; 16]).unwrap();
        assert_eq!(hs.initial_frame(), (0x77, vec![0x01]));
    }

    #[test]
    fn test_key_length_validation() {
        assert!(Handshake::new(AuthKind::Aes, 0, &[0u8; 24]).is_err());
        assert!(Handshake::new(AuthKind::LegacyDes, 0, &[0u8; 8]).is_err());
        assert!(Handshake::new(AuthKind::LegacyDes, 0, &[0u8; 24]).is_ok());
    }

    // Simulate the card side of the legacy handshake with the module's own
    // primitives: the card CBC-chains its reply onto the last challenge
    // ciphertext block.
    #[test]
    fn test_legacy_handshake_round() {
        let key = hex!("5ab7b5b41110b90273ea816751e41d88");
        let rnd_a = hex!("0fd9e6f7eb7e1bd9").to_vec();
        let rnd_b = hex!("cf62e7b53ed842cb");

        let mut enc_rnd_b = rnd_b;
        crypto::tdes_cbc_encrypt(&key, &ZERO_IV_DES, &mut enc_rnd_b).unwrap();

        let mut hs =
            Handshake::with_rnd_a(AuthKind::LegacyDes, 0, &key, rnd_a.clone()).unwrap();
        let challenge = hs.respond(&enc_rnd_b).unwrap();
        assert_eq!(challenge.len(), 16);

        // Card side: recover RndA ‖ rol1(RndB) from the challenge
        let mut recovered = challenge.clone();
        crypto::tdes_cbc_decrypt(&key, &enc_rnd_b, &mut recovered).unwrap();
        assert_eq!(&recovered[..8], rnd_a.as_slice());
        assert_eq!(&recovered[8..], crypto::rotate_left(&hex!("cf62e7b53ed842cb"), 1));

        // Card side: answer with E(rol1(RndA)), chained on the last
        // challenge block
        let tail: [u8; 8] = challenge[8..16].try_into().unwrap();
        let mut enc_prime = crypto::rotate_left(&rnd_a, 1);
        crypto::tdes_cbc_encrypt(&key, &tail, &mut enc_prime).unwrap();

        let outcome = hs.finish(&enc_prime).unwrap();
        assert!(outcome.keys.is_none());
        assert!(outcome.transaction_id.is_none());
    }

    #[test]
    fn test_aes_handshake_splices_session_keys() {
        let key = [0u8; 16];
        let rnd_a = rnd_a_16();
        let rnd_b = rnd_b_16();

        let mut enc_rnd_b = rnd_b.clone();
        crypto::aes_cbc_encrypt(&key, &ZERO_IV_AES, &mut enc_rnd_b).unwrap();

        let mut hs = Handshake::with_rnd_a(AuthKind::Aes, 0, &key, rnd_a.clone()).unwrap();
        let challenge = hs.respond(&enc_rnd_b).unwrap();
        assert_eq!(challenge.len(), 32);

        let mut enc_prime = crypto::rotate_left(&rnd_a, 1);
        crypto::aes_cbc_encrypt(&key, &ZERO_IV_AES, &mut enc_prime).unwrap();

        let outcome = hs.finish(&enc_prime).unwrap();
        let keys = outcome.keys.unwrap();
        assert_eq!(
            keys.enc(),
            &hex!("a1a2a3a4b1b2b3b4adaeafb0bdbebfc0")
        );
        assert_eq!(
            keys.mac(),
            &hex!("a5a6a7a8b5b6b7b8a9aaabacb9babbbc")
        );
        assert!(outcome.transaction_id.is_none());
    }

    #[test]
    fn test_ev2_session_vectors() {
        let (sv1, sv2) = session_vectors(&rnd_a_16(), &rnd_b_16());
        assert_eq!(sv1, hex!("a55a00010080a1a2b1b2aeafb0bebfc0"));
        assert_eq!(sv2, hex!("5aa500010080a1a2b1b2aeafb0bebfc0"));
    }

    #[test]
    fn test_ev2_first_handshake() {
        let key = hex!("0123456789abcdef0123456789abcdef");
        let rnd_a = rnd_a_16();
        let rnd_b = rnd_b_16();

        let mut enc_rnd_b = rnd_b.clone();
        crypto::aes_cbc_encrypt(&key, &ZERO_IV_AES, &mut enc_rnd_b).unwrap();

        let mut hs = Handshake::with_rnd_a(AuthKind::Ev2First, 0, &key, rnd_a.clone()).unwrap();
        let _challenge = hs.respond(&enc_rnd_b).unwrap();

        let mut enc_prime = crypto::rotate_left(&rnd_a, 1);
        crypto::aes_cbc_encrypt(&key, &ZERO_IV_AES, &mut enc_prime).unwrap();

        // TI ‖ E(RndA') ‖ PDcap2; the trailing capabilities are ignored
        let mut payload = vec![0xDE, 0xAD, 0xBE, 0xEF];
        payload.extend_from_slice(&enc_prime);
        payload.extend_from_slice(&[0u8; 6]);

        let outcome = hs.finish(&payload).unwrap();
        assert_eq!(outcome.transaction_id, Some([0xDE, 0xAD, 0xBE, 0xEF]));

        let (sv1, sv2) = session_vectors(&rnd_a, &rnd_b);
        let keys = outcome.keys.unwrap();
        assert_eq!(keys.enc(), &crypto::aes_cmac(&key, &sv1));
        assert_eq!(keys.mac(), &crypto::aes_cmac(&key, &sv2));
    }

    #[test]
    fn test_short_rnd_b_is_fatal() {
        let mut hs =
            Handshake::with_rnd_a(AuthKind::Aes, 0, &[0u8; 16], rnd_a_16()).unwrap();
        let err = hs.respond(&[0u8; 8]).unwrap_err();
        assert!(matches!(
            err,
            Error::CryptoLength { len: 8, expected: 16 }
        ));
        // The handshake is burned; further steps are refused
        assert!(hs.respond(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_challenge_mismatch() {
        let key = [0u8; 16];
        let rnd_b = rnd_b_16();
        let mut enc_rnd_b = rnd_b;
        crypto::aes_cbc_encrypt(&key, &ZERO_IV_AES, &mut enc_rnd_b).unwrap();

        let mut hs = Handshake::with_rnd_a(AuthKind::Aes, 0, &key, rnd_a_16()).unwrap();
        let _ = hs.respond(&enc_rnd_b).unwrap();

        // A garbage final frame must not authenticate
        assert!(matches!(
            hs.finish(&[0x55; 16]).unwrap_err(),
            Error::AuthMismatch
        ));
    }

    #[test]
    fn test_out_of_order_steps() {
        let mut hs = Handshake::with_rnd_a(AuthKind::Aes, 0, &[0u8; 16], rnd_a_16()).unwrap();
        assert!(matches!(
            hs.finish(&[0u8; 16]).unwrap_err(),
            Error::Protocol(_)
        ));
    }
}
