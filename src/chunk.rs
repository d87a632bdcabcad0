//! Content-derived chunk encryption.
//!
//! File content in Haven is split into chunks of at most 4 MiB. Each
//! [`Chunk`] derives its symmetric key from its own content hash, so
//! identical plaintext chunks, uploaded by any user, encrypt to identical
//! ciphertexts. The storage layer can then deduplicate repeated content
//! without ever seeing plaintext (convergent encryption).
//!
//! # Trade-off
//!
//! Convergent encryption leaks one thing on purpose: anyone who can guess a
//! chunk's exact content can derive its key and check whether a stored
//! ciphertext matches the guess (the confirmation-of-file attack). For
//! low-entropy or guessable content, this path does not provide
//! confidentiality against an adversary willing to test candidates. Callers
//! holding such content should encrypt it to a recipient with
//! [`crate::envelope`] instead.
//!
//! The IV is derived from the content hash alongside the key, under its own
//! context. The (key, IV) pair therefore repeats only when the plaintext
//! repeats, which reduces to encrypting the same message twice.

use blake2::Digest;

use crate::error::CryptoError;
use crate::hash::{Blake2b256, ContentHash};
use crate::symmetric::{Nonce, SymmetricKey, NONCE_BYTES, TAG_BYTES};

/// Largest payload a single chunk may carry: 4 MiB.
pub const MAX_CHUNK_BYTES: usize = 4 * 1024 * 1024;

// Domain separation for convergent IV derivation.
const CHUNK_NONCE_CONTEXT: &[u8] = b"haven.chunk.nonce.v1";

/// An immutable chunk of plaintext, paired with the key derived from its own
/// content hash. The hash and key are computed once, at construction.
pub struct Chunk {
    data: Vec<u8>,
    hash: ContentHash,
    key: SymmetricKey,
}

impl Chunk {
    /// Wrap plaintext into a chunk, deriving its content hash and key.
    /// Fails if the payload exceeds [`MAX_CHUNK_BYTES`].
    pub fn new(data: Vec<u8>) -> Result<Chunk, CryptoError> {
        if data.len() > MAX_CHUNK_BYTES {
            return Err(CryptoError::SizeLimit {
                step: "create chunk",
                max: MAX_CHUNK_BYTES,
                actual: data.len(),
            });
        }
        let hash = ContentHash::new(&data);
        let key = SymmetricKey::derive_from_hash(&hash);
        Ok(Chunk { data, hash, key })
    }

    /// The plaintext payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The content hash, which is also the chunk's storage address.
    pub fn hash(&self) -> &ContentHash {
        &self.hash
    }

    /// The symmetric key derived from the content hash.
    pub fn key(&self) -> &SymmetricKey {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Encrypt the chunk under its derived key, returning `IV ‖ ciphertext`.
    /// The IV is derived from the content hash, so identical chunks produce
    /// identical output.
    pub fn encrypt(&self) -> Vec<u8> {
        let nonce = derive_nonce(&self.hash);
        let ciphertext = self.key.encrypt(&nonce, &self.data);
        let mut out = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
        out.extend_from_slice(nonce.as_bytes());
        out.extend_from_slice(&ciphertext);
        out
    }

    /// Decrypt `IV ‖ ciphertext` produced by [`encrypt`](Self::encrypt),
    /// given the chunk key (typically re-derived from the content hash held
    /// in a file's metadata).
    pub fn decrypt(key: &SymmetricKey, encrypted: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if encrypted.len() < NONCE_BYTES + TAG_BYTES {
            return Err(CryptoError::BadLength {
                step: "read encrypted chunk",
                expected: NONCE_BYTES + TAG_BYTES,
                actual: encrypted.len(),
            });
        }
        let (nonce, ciphertext) = encrypted.split_at(NONCE_BYTES);
        let nonce: [u8; NONCE_BYTES] = nonce.try_into().map_err(|_| CryptoError::BadLength {
            step: "read encrypted chunk iv",
            expected: NONCE_BYTES,
            actual: nonce.len(),
        })?;
        key.decrypt(&Nonce::from_bytes(nonce), ciphertext)
    }
}

fn derive_nonce(hash: &ContentHash) -> Nonce {
    let mut state = Blake2b256::new();
    state.update(CHUNK_NONCE_CONTEXT);
    state.update([hash.version()]);
    state.update(hash.digest());
    let digest = state.finalize();
    let mut nonce = [0u8; NONCE_BYTES];
    nonce.copy_from_slice(&digest[..NONCE_BYTES]);
    Nonce::from_bytes(nonce)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let chunk = Chunk::new(b"hello, encrypted world!".to_vec()).unwrap();
        let encrypted = chunk.encrypt();
        let decrypted = Chunk::decrypt(chunk.key(), &encrypted).unwrap();
        assert_eq!(decrypted, chunk.data());
    }

    #[test]
    fn key_rederives_from_hash_alone() {
        // A reader holding only the content hash can reconstruct the key.
        let chunk = Chunk::new(b"shared document page".to_vec()).unwrap();
        let encrypted = chunk.encrypt();

        let key = SymmetricKey::derive_from_hash(chunk.hash());
        let decrypted = Chunk::decrypt(&key, &encrypted).unwrap();
        assert_eq!(decrypted, chunk.data());
    }

    #[test]
    fn convergence() {
        let a = Chunk::new(b"identical content".to_vec()).unwrap();
        let b = Chunk::new(b"identical content".to_vec()).unwrap();
        assert_eq!(a.key(), b.key());
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.encrypt(), b.encrypt());

        let c = Chunk::new(b"divergent content".to_vec()).unwrap();
        assert_ne!(a.key(), c.key());
        assert_ne!(a.encrypt(), c.encrypt());
    }

    #[test]
    fn size_bound() {
        let exactly = vec![7u8; MAX_CHUNK_BYTES];
        assert!(Chunk::new(exactly).is_ok());

        let over = vec![7u8; MAX_CHUNK_BYTES + 1];
        match Chunk::new(over) {
            Err(CryptoError::SizeLimit {
                max: MAX_CHUNK_BYTES,
                actual,
                ..
            }) => assert_eq!(actual, MAX_CHUNK_BYTES + 1),
            res => panic!("expected SizeLimit, got {:?}", res.map(|c| c.len())),
        }
    }

    #[test]
    fn wrong_key_fails() {
        let chunk = Chunk::new(b"some chunk".to_vec()).unwrap();
        let other = Chunk::new(b"other chunk".to_vec()).unwrap();
        let encrypted = chunk.encrypt();
        match Chunk::decrypt(other.key(), &encrypted) {
            Err(CryptoError::DecryptFailed) => (),
            res => panic!("expected DecryptFailed, got {:?}", res),
        }
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let chunk = Chunk::new(b"some chunk".to_vec()).unwrap();
        let mut encrypted = chunk.encrypt();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0x01;
        assert!(Chunk::decrypt(chunk.key(), &encrypted).is_err());
    }

    #[test]
    fn short_input_is_bad_length() {
        let chunk = Chunk::new(b"some chunk".to_vec()).unwrap();
        match Chunk::decrypt(chunk.key(), &[0u8; NONCE_BYTES]) {
            Err(CryptoError::BadLength { .. }) => (),
            res => panic!("expected BadLength, got {:?}", res),
        }
    }

    #[test]
    fn empty_chunk_roundtrip() {
        let chunk = Chunk::new(Vec::new()).unwrap();
        assert!(chunk.is_empty());
        let encrypted = chunk.encrypt();
        assert_eq!(encrypted.len(), NONCE_BYTES + TAG_BYTES);
        assert_eq!(Chunk::decrypt(chunk.key(), &encrypted).unwrap(), b"");
    }
}
