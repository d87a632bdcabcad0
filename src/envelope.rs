//! Hybrid public-key encryption envelopes.
//!
//! An envelope carries a payload of arbitrary size to the holder of a
//! [`UserPublicKey`]'s private half. The payload is encrypted under a fresh
//! one-time [`SymmetricKey`](crate::symmetric::SymmetricKey); that key is
//! wrapped for the recipient with an ephemeral X25519 key agreement. Neither
//! the one-time key nor the ephemeral key is ever reused, and the payload
//! size limits of pure asymmetric encryption never apply.
//!
//! # Format
//!
//! ```text
//! +---------+=============+=========+================+
//! | Version | Wrapped key |   IV    |   Ciphertext   |
//! +---------+=============+=========+================+
//!
//! - Wrapped key, IV, and Ciphertext are each length-prefixed (u32, big-endian)
//! - Wrapped key is a 32-byte ephemeral X25519 public key, a 24-byte wrap
//!     nonce, and the one-time key encrypted under the ECDH shared secret
//!     (XChaCha20-Poly1305, 16-byte tag)
//! - IV is the 24-byte nonce for the payload
//! - Ciphertext is the payload encrypted under the one-time key, tag included
//! ```
//!
//! Each length prefix is checked against its declared maximum before any
//! allocation, and the buffer must be fully consumed; anything else fails
//! with a length error. A failure in either cryptographic step is reported
//! as [`CryptoError::DecryptFailed`].

use byteorder::ReadBytesExt;
use rand_core::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::identity::{User, UserPublicKey};
use crate::symmetric::{Nonce, SymmetricKey, NONCE_BYTES, SYMMETRIC_KEY_BYTES, TAG_BYTES};
use crate::wire;

/// Default envelope format version.
pub const DEFAULT_ENVELOPE_VERSION: u8 = 1;

/// Minimum accepted envelope format version.
pub const MIN_ENVELOPE_VERSION: u8 = 1;

/// Maximum accepted envelope format version.
pub const MAX_ENVELOPE_VERSION: u8 = 1;

const EPH_KEY_BYTES: usize = 32;

/// Exact length of the wrapped-key field for version 1.
pub const WRAPPED_KEY_BYTES: usize = EPH_KEY_BYTES + NONCE_BYTES + SYMMETRIC_KEY_BYTES + TAG_BYTES;

/// Declared maximum for the wrapped-key field across all versions.
pub const MAX_WRAPPED_KEY_BYTES: usize = 256;

/// Declared maximum envelope payload.
pub const MAX_PAYLOAD_BYTES: usize = 8 * 1024 * 1024;

/// Encrypt a payload so only the holder of `recipient`'s private half can
/// read it.
pub fn seal<R>(
    csprng: &mut R,
    recipient: &UserPublicKey,
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError>
where
    R: CryptoRng + RngCore,
{
    if plaintext.len() > MAX_PAYLOAD_BYTES {
        return Err(CryptoError::SizeLimit {
            step: "seal envelope payload",
            max: MAX_PAYLOAD_BYTES,
            actual: plaintext.len(),
        });
    }

    let payload_key = SymmetricKey::generate(csprng);
    let iv = Nonce::generate(csprng);
    let ciphertext = payload_key.encrypt(&iv, plaintext);

    let eph = x25519_dalek::EphemeralSecret::random_from_rng(&mut *csprng);
    let eph_pub = x25519_dalek::PublicKey::from(&eph);
    let shared = eph.diffie_hellman(recipient.exchange_key());
    let wrap_key = SymmetricKey::from_bytes(*shared.as_bytes());
    let wrap_nonce = Nonce::generate(csprng);

    let mut wrapped_key = Vec::with_capacity(WRAPPED_KEY_BYTES);
    wrapped_key.extend_from_slice(eph_pub.as_bytes());
    wrapped_key.extend_from_slice(wrap_nonce.as_bytes());
    wrapped_key.extend_from_slice(&wrap_key.encrypt(&wrap_nonce, payload_key.as_bytes()));

    let mut out = Vec::with_capacity(1 + 12 + wrapped_key.len() + NONCE_BYTES + ciphertext.len());
    out.push(DEFAULT_ENVELOPE_VERSION);
    wire::write_bytes(&mut out, &wrapped_key);
    wire::write_bytes(&mut out, iv.as_bytes());
    wire::write_bytes(&mut out, &ciphertext);
    Ok(out)
}

/// Decrypt an envelope sealed for this user.
pub fn open(user: &User, envelope: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut buf = envelope;
    let version = buf.read_u8().map_err(CryptoError::Io)?;
    if !(MIN_ENVELOPE_VERSION..=MAX_ENVELOPE_VERSION).contains(&version) {
        return Err(CryptoError::UnsupportedVersion(version));
    }

    let wrapped_key = wire::read_bytes(&mut buf, "read envelope wrapped key", MAX_WRAPPED_KEY_BYTES)?;
    if wrapped_key.len() != WRAPPED_KEY_BYTES {
        return Err(CryptoError::BadLength {
            step: "read envelope wrapped key",
            expected: WRAPPED_KEY_BYTES,
            actual: wrapped_key.len(),
        });
    }
    let iv = wire::read_bytes(&mut buf, "read envelope iv", NONCE_BYTES)?;
    let iv: [u8; NONCE_BYTES] = iv[..].try_into().map_err(|_| CryptoError::BadLength {
        step: "read envelope iv",
        expected: NONCE_BYTES,
        actual: iv.len(),
    })?;
    let ciphertext = wire::read_bytes(
        &mut buf,
        "read envelope ciphertext",
        MAX_PAYLOAD_BYTES + TAG_BYTES,
    )?;
    wire::expect_end(buf, "read envelope")?;

    let mut kw = &wrapped_key[..];
    let eph_bytes: [u8; EPH_KEY_BYTES] = wire::read_array(&mut kw, "read ephemeral key")?;
    let wrap_nonce: [u8; NONCE_BYTES] = wire::read_array(&mut kw, "read wrap nonce")?;

    let eph_pub = x25519_dalek::PublicKey::from(eph_bytes);
    let shared = user.exchange_secret().diffie_hellman(&eph_pub);
    let wrap_key = SymmetricKey::from_bytes(*shared.as_bytes());
    let payload_key = Zeroizing::new(wrap_key.decrypt(&Nonce::from_bytes(wrap_nonce), kw)?);
    let payload_key: [u8; SYMMETRIC_KEY_BYTES] = payload_key[..]
        .try_into()
        .map_err(|_| CryptoError::DecryptFailed)?;
    let payload_key = SymmetricKey::from_bytes(payload_key);

    payload_key.decrypt(&Nonce::from_bytes(iv), &ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::User;

    #[test]
    fn roundtrip() {
        let mut csprng = rand::rngs::OsRng;
        let recipient = User::generate(&mut csprng);
        let plaintext = b"I am sensitive information, about to be encrypted";

        let envelope = seal(&mut csprng, recipient.public(), plaintext).unwrap();
        let opened = open(&recipient, &envelope).unwrap();
        assert_eq!(&opened[..], &plaintext[..]);
    }

    #[test]
    fn empty_payload_roundtrip() {
        let mut csprng = rand::rngs::OsRng;
        let recipient = User::generate(&mut csprng);
        let envelope = seal(&mut csprng, recipient.public(), b"").unwrap();
        assert_eq!(open(&recipient, &envelope).unwrap(), b"");
    }

    #[test]
    fn fresh_key_material_every_seal() {
        let mut csprng = rand::rngs::OsRng;
        let recipient = User::generate(&mut csprng);
        let a = seal(&mut csprng, recipient.public(), b"same plaintext").unwrap();
        let b = seal(&mut csprng, recipient.public(), b"same plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_recipient_fails() {
        let mut csprng = rand::rngs::OsRng;
        let recipient = User::generate(&mut csprng);
        let other = User::generate(&mut csprng);

        let envelope = seal(&mut csprng, recipient.public(), b"for one party only").unwrap();
        match open(&other, &envelope) {
            Err(CryptoError::DecryptFailed) => (),
            res => panic!("expected DecryptFailed, got {:?}", res),
        }
    }

    #[test]
    fn corruption_anywhere_fails() {
        let mut csprng = rand::rngs::OsRng;
        let recipient = User::generate(&mut csprng);
        let envelope = seal(&mut csprng, recipient.public(), b"payload under test").unwrap();

        // One byte in the wrapped key, the IV, and the ciphertext each.
        for idx in [6usize, 1 + 4 + WRAPPED_KEY_BYTES + 4 + 2, envelope.len() - 1] {
            let mut bad = envelope.clone();
            bad[idx] ^= 0xFF;
            assert!(open(&recipient, &bad).is_err(), "corruption at {} accepted", idx);
        }
    }

    #[test]
    fn truncation_fails() {
        let mut csprng = rand::rngs::OsRng;
        let recipient = User::generate(&mut csprng);
        let envelope = seal(&mut csprng, recipient.public(), b"payload under test").unwrap();

        for keep in [0, 1, 5, 40, envelope.len() - 1] {
            let bad = &envelope[..keep];
            assert!(open(&recipient, bad).is_err(), "truncation to {} accepted", keep);
        }
    }

    #[test]
    fn trailing_bytes_fail() {
        let mut csprng = rand::rngs::OsRng;
        let recipient = User::generate(&mut csprng);
        let mut envelope = seal(&mut csprng, recipient.public(), b"payload").unwrap();
        envelope.push(0);
        match open(&recipient, &envelope) {
            Err(CryptoError::BadLength { .. }) => (),
            res => panic!("expected BadLength, got {:?}", res),
        }
    }

    #[test]
    fn oversized_wrapped_key_prefix_is_rejected() {
        let mut csprng = rand::rngs::OsRng;
        let recipient = User::generate(&mut csprng);
        let mut envelope = vec![DEFAULT_ENVELOPE_VERSION];
        envelope.extend_from_slice(&(4096u32).to_be_bytes());
        envelope.resize(envelope.len() + 4096, 0);
        match open(&recipient, &envelope) {
            Err(CryptoError::SizeLimit { .. }) => (),
            res => panic!("expected SizeLimit, got {:?}", res),
        }
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut csprng = rand::rngs::OsRng;
        let recipient = User::generate(&mut csprng);
        let mut envelope = seal(&mut csprng, recipient.public(), b"payload").unwrap();
        envelope[0] = 9;
        match open(&recipient, &envelope) {
            Err(CryptoError::UnsupportedVersion(9)) => (),
            res => panic!("expected UnsupportedVersion, got {:?}", res),
        }
    }

    #[test]
    fn oversized_payload_is_rejected_at_seal() {
        let mut csprng = rand::rngs::OsRng;
        let recipient = User::generate(&mut csprng);
        let big = vec![0u8; MAX_PAYLOAD_BYTES + 1];
        match seal(&mut csprng, recipient.public(), &big) {
            Err(CryptoError::SizeLimit { .. }) => (),
            res => panic!("expected SizeLimit, got {:?}", res.map(|v| v.len())),
        }
    }
}
