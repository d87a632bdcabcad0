//! Symmetric-key encryption.
//!
//! This module provides the [`SymmetricKey`] used for all bulk encryption in
//! Haven: chunk ciphertexts and the payload of a hybrid envelope. The one
//! supported algorithm is XChaCha20 with a Poly1305 AEAD construction, taking
//! an explicit 24-byte [`Nonce`] and producing ciphertext with a 16-byte
//! authentication tag and no padding.
//!
//! A key is either drawn fresh from a cryptographic RNG, or derived
//! deterministically from a [`ContentHash`] for convergent chunk encryption.
//! Derivation runs a domain-separated BLAKE2b read over the digest; the state
//! is local to the call, so concurrent derivations never observe each other.
//!
//! Keys are zeroed on drop and never display their raw bytes.

use std::fmt;

use blake2::Digest;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand_core::{CryptoRng, RngCore};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::hash::{Blake2b256, ContentHash};

/// Symmetric key length in bytes.
pub const SYMMETRIC_KEY_BYTES: usize = 32;

/// Nonce length in bytes.
pub const NONCE_BYTES: usize = 24;

/// Poly1305 authentication tag length in bytes.
pub const TAG_BYTES: usize = 16;

// Domain separation for convergent chunk-key derivation.
const CHUNK_KEY_CONTEXT: &[u8] = b"haven.symmetric.chunk-key.v1";

/// A 256-bit secret key for XChaCha20-Poly1305.
#[derive(Clone)]
pub struct SymmetricKey {
    key: [u8; SYMMETRIC_KEY_BYTES],
}

impl SymmetricKey {
    /// Draw a fresh key from a cryptographic RNG.
    pub fn generate<R>(csprng: &mut R) -> SymmetricKey
    where
        R: CryptoRng + RngCore,
    {
        let mut key = [0u8; SYMMETRIC_KEY_BYTES];
        csprng.fill_bytes(&mut key);
        SymmetricKey { key }
    }

    /// Wrap raw key bytes. The caller is responsible for how they were made.
    pub fn from_bytes(key: [u8; SYMMETRIC_KEY_BYTES]) -> SymmetricKey {
        SymmetricKey { key }
    }

    /// Deterministically derive the convergent key for content with the given
    /// hash. Identical hashes always derive identical keys.
    pub fn derive_from_hash(hash: &ContentHash) -> SymmetricKey {
        let mut state = Blake2b256::new();
        state.update(CHUNK_KEY_CONTEXT);
        state.update([hash.version()]);
        state.update(hash.digest());
        SymmetricKey {
            key: state.finalize().into(),
        }
    }

    /// Get the raw key bytes. Only for writing into an encrypted export.
    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_BYTES] {
        &self.key
    }

    /// Encrypt a payload under the given nonce, returning `ciphertext ‖ tag`.
    pub fn encrypt(&self, nonce: &Nonce, plaintext: &[u8]) -> Vec<u8> {
        let aead = XChaCha20Poly1305::new(Key::from_slice(&self.key));
        // The cipher only errors once the payload approaches 256 GiB; every
        // caller in this crate is bounded far below that.
        aead.encrypt(XNonce::from_slice(&nonce.0), plaintext)
            .expect("payload exceeded the XChaCha20-Poly1305 length bound")
    }

    /// Decrypt `ciphertext ‖ tag` under the given nonce.
    pub fn decrypt(&self, nonce: &Nonce, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < TAG_BYTES {
            return Err(CryptoError::BadLength {
                step: "read ciphertext tag",
                expected: TAG_BYTES,
                actual: ciphertext.len(),
            });
        }
        let aead = XChaCha20Poly1305::new(Key::from_slice(&self.key));
        aead.decrypt(XNonce::from_slice(&nonce.0), ciphertext)
            .map_err(|_| CryptoError::DecryptFailed)
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl Eq for SymmetricKey {}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.key.ct_eq(&other.key))
    }
}

impl fmt::Debug for SymmetricKey {
    /// Never prints the key bytes.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("key", &"<secret>")
            .finish()
    }
}

/// An explicit 24-byte initialization vector.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Nonce([u8; NONCE_BYTES]);

impl Nonce {
    /// Draw a fresh nonce from a cryptographic RNG.
    pub fn generate<R>(csprng: &mut R) -> Nonce
    where
        R: CryptoRng + RngCore,
    {
        let mut nonce = [0u8; NONCE_BYTES];
        csprng.fill_bytes(&mut nonce);
        Nonce(nonce)
    }

    pub fn from_bytes(bytes: [u8; NONCE_BYTES]) -> Nonce {
        Nonce(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_BYTES] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let mut csprng = rand::rngs::OsRng;
        let key = SymmetricKey::generate(&mut csprng);
        let nonce = Nonce::generate(&mut csprng);
        let plaintext = b"I am sensitive information, about to be encrypted";

        let ct = key.encrypt(&nonce, plaintext);
        assert_eq!(ct.len(), plaintext.len() + TAG_BYTES);
        let pt = key.decrypt(&nonce, &ct).unwrap();
        assert_eq!(&pt[..], &plaintext[..]);
    }

    #[test]
    fn wrong_key_fails() {
        let mut csprng = rand::rngs::OsRng;
        let key = SymmetricKey::generate(&mut csprng);
        let other = SymmetricKey::generate(&mut csprng);
        let nonce = Nonce::generate(&mut csprng);

        let ct = key.encrypt(&nonce, b"secret data");
        match other.decrypt(&nonce, &ct) {
            Err(CryptoError::DecryptFailed) => (),
            other => panic!("expected DecryptFailed, got {:?}", other),
        }
    }

    #[test]
    fn wrong_nonce_fails() {
        let mut csprng = rand::rngs::OsRng;
        let key = SymmetricKey::generate(&mut csprng);
        let nonce = Nonce::from_bytes([1u8; NONCE_BYTES]);
        let other = Nonce::from_bytes([2u8; NONCE_BYTES]);

        let ct = key.encrypt(&nonce, b"secret data");
        assert!(key.decrypt(&other, &ct).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let mut csprng = rand::rngs::OsRng;
        let key = SymmetricKey::generate(&mut csprng);
        let nonce = Nonce::generate(&mut csprng);

        let mut ct = key.encrypt(&nonce, b"secret data");
        ct[0] ^= 0xFF;
        assert!(key.decrypt(&nonce, &ct).is_err());
    }

    #[test]
    fn short_ciphertext_is_bad_length() {
        let mut csprng = rand::rngs::OsRng;
        let key = SymmetricKey::generate(&mut csprng);
        let nonce = Nonce::generate(&mut csprng);
        match key.decrypt(&nonce, &[0u8; 3]) {
            Err(CryptoError::BadLength { .. }) => (),
            other => panic!("expected BadLength, got {:?}", other),
        }
    }

    #[test]
    fn derivation_is_deterministic() {
        let h = ContentHash::new(b"the same chunk");
        let k1 = SymmetricKey::derive_from_hash(&h);
        let k2 = SymmetricKey::derive_from_hash(&ContentHash::new(b"the same chunk"));
        assert_eq!(k1, k2);

        let k3 = SymmetricKey::derive_from_hash(&ContentHash::new(b"another chunk"));
        assert_ne!(k1, k3);
    }

    #[test]
    fn derived_key_differs_from_raw_digest() {
        // The derivation is domain-separated, not the digest itself.
        let h = ContentHash::new(b"chunk");
        let k = SymmetricKey::derive_from_hash(&h);
        assert_ne!(k.as_bytes(), h.digest());
    }

    #[test]
    fn debug_redacts() {
        let key = SymmetricKey::from_bytes([0xAB; SYMMETRIC_KEY_BYTES]);
        let shown = format!("{:?}", key);
        assert!(!shown.contains("ab"), "debug output leaked key bytes");
    }

    #[test]
    fn empty_payload_roundtrip() {
        let mut csprng = rand::rngs::OsRng;
        let key = SymmetricKey::generate(&mut csprng);
        let nonce = Nonce::generate(&mut csprng);
        let ct = key.encrypt(&nonce, b"");
        assert_eq!(ct.len(), TAG_BYTES);
        assert_eq!(key.decrypt(&nonce, &ct).unwrap(), b"");
    }
}
