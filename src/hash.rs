//! Content hashing.
//!
//! A [`ContentHash`] is a cryptographically secure digest of a byte sequence.
//! It is impractical to find two different byte sequences with an identical
//! hash. Haven uses it in two roles: as the content address a chunk is stored
//! and fetched under, and as the seed material for convergent chunk-key
//! derivation (see [`crate::chunk`]).
//!
//! # Supported Versions
//! - 1: BLAKE2b with a 32-byte digest

use std::cmp;
use std::cmp::Ordering;
use std::fmt;
use std::hash;
use std::io::Read;

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use byteorder::ReadBytesExt;
use subtle::ConstantTimeEq;

use crate::error::CryptoError;

/// Default hash algorithm version.
pub const DEFAULT_HASH_VERSION: u8 = 1;

/// Minimum accepted hash algorithm version.
pub const MIN_HASH_VERSION: u8 = 1;

/// Maximum accepted hash algorithm version.
pub const MAX_HASH_VERSION: u8 = 1;

/// Digest length in bytes.
pub const HASH_BYTES: usize = 32;

pub(crate) type Blake2b256 = Blake2b<U32>;

/// Cryptographically secure hash of data.
#[derive(Clone)]
pub struct ContentHash {
    version: u8,
    digest: [u8; HASH_BYTES],
}

/// A hasher that can incrementally take in data and produce a hash at any time.
#[derive(Clone)]
pub struct HashState {
    version: u8,
    state: Blake2b256,
}

impl Eq for ContentHash {}

impl PartialEq for ContentHash {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version && bool::from(self.digest.ct_eq(&other.digest))
    }
}

// Not constant time; no cryptographic operation requires Ord. This is solely
// for ordering in a BTree.
impl cmp::Ord for ContentHash {
    fn cmp(&self, other: &ContentHash) -> Ordering {
        self.version
            .cmp(&other.version)
            .then_with(|| self.digest.cmp(&other.digest))
    }
}

impl cmp::PartialOrd for ContentHash {
    fn partial_cmp(&self, other: &ContentHash) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl hash::Hash for ContentHash {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.version.hash(state);
        self.digest.hash(state);
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ContentHash")
            .field("version", &self.version)
            .field("digest", &format_args!("{:x?}", &self.digest[..]))
            .finish()
    }
}

impl fmt::Display for ContentHash {
    /// Display as a base58-encoded string.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

impl ContentHash {
    /// Hash the given data with the default algorithm version.
    pub fn new(data: &[u8]) -> ContentHash {
        let mut state = HashState::new();
        state.update(data);
        state.finalize()
    }

    /// Hash the given data with a specific algorithm version, failing if the
    /// version is unsupported.
    pub fn with_version(version: u8, data: &[u8]) -> Result<ContentHash, CryptoError> {
        let mut state = HashState::with_version(version)?;
        state.update(data);
        Ok(state.finalize())
    }

    /// Get the hash algorithm version.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Get the raw digest bytes.
    pub fn digest(&self) -> &[u8; HASH_BYTES] {
        &self.digest
    }

    /// Length of the hash when encoded as bytes.
    pub fn size(&self) -> usize {
        1 + HASH_BYTES
    }

    /// Encode onto an existing byte vector: the version byte followed by the
    /// digest.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.reserve(self.size());
        buf.push(self.version);
        buf.extend_from_slice(&self.digest);
    }

    /// Decode from a byte slice, advancing it past the hash.
    pub fn decode(buf: &mut &[u8]) -> Result<ContentHash, CryptoError> {
        let version = buf.read_u8().map_err(CryptoError::Io)?;
        if !(MIN_HASH_VERSION..=MAX_HASH_VERSION).contains(&version) {
            return Err(CryptoError::UnsupportedVersion(version));
        }
        let mut hash = ContentHash {
            version,
            digest: [0; HASH_BYTES],
        };
        buf.read_exact(&mut hash.digest).map_err(CryptoError::Io)?;
        Ok(hash)
    }

    /// Convert into a base58-encoded string.
    pub fn to_base58(&self) -> String {
        let mut raw = Vec::with_capacity(self.size());
        self.encode(&mut raw);
        bs58::encode(&raw).into_string()
    }

    /// Attempt to parse a base58-encoded hash.
    pub fn from_base58(s: &str) -> Result<ContentHash, CryptoError> {
        let raw = bs58::decode(s)
            .into_vec()
            .map_err(|_| CryptoError::BadFormat("hash is not valid base58"))?;
        let mut buf = &raw[..];
        let hash = Self::decode(&mut buf)?;
        if !buf.is_empty() {
            return Err(CryptoError::BadLength {
                step: "decode base58 hash",
                expected: hash.size(),
                actual: raw.len(),
            });
        }
        Ok(hash)
    }
}

impl HashState {
    pub fn new() -> HashState {
        HashState {
            version: DEFAULT_HASH_VERSION,
            state: Blake2b256::new(),
        }
    }

    pub fn with_version(version: u8) -> Result<HashState, CryptoError> {
        if !(MIN_HASH_VERSION..=MAX_HASH_VERSION).contains(&version) {
            return Err(CryptoError::UnsupportedVersion(version));
        }
        Ok(HashState {
            version,
            state: Blake2b256::new(),
        })
    }

    pub fn update(&mut self, data: &[u8]) {
        self.state.update(data);
    }

    /// Produce a hash of the data so far without consuming the state.
    pub fn get_hash(&self) -> ContentHash {
        self.clone().finalize()
    }

    pub fn finalize(self) -> ContentHash {
        ContentHash {
            version: self.version,
            digest: self.state.finalize().into(),
        }
    }
}

impl Default for HashState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HashState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "HashState {{ version: {:?} }}", &self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc_dec(h: &ContentHash) {
        let mut v = Vec::new();
        h.encode(&mut v);
        let hd = ContentHash::decode(&mut &v[..]).unwrap();
        assert_eq!(h, &hd);
    }

    #[test]
    fn known_vector() {
        // BLAKE2b-256("abc")
        let expected =
            hex::decode("bddd813c634239723171ef3fee98579b94964e3bb1cb3e427262c8c068d52319")
                .unwrap();
        let h = ContentHash::new(b"abc");
        assert_eq!(h.version(), 1);
        assert_eq!(&h.digest()[..], &expected[..]);
    }

    #[test]
    fn deterministic_and_distinct() {
        let a = ContentHash::new(b"chunk contents");
        let b = ContentHash::new(b"chunk contents");
        let c = ContentHash::new(b"different contents");
        assert_eq!(a, b);
        assert_ne!(a, c);
        enc_dec(&a);
    }

    #[test]
    fn incremental_matches_oneshot() {
        let mut state = HashState::new();
        state.update(b"split ");
        state.update(b"across ");
        let partial = state.get_hash();
        state.update(b"updates");
        let h = state.finalize();
        assert_eq!(h, ContentHash::new(b"split across updates"));
        assert_eq!(partial, ContentHash::new(b"split across "));
    }

    #[test]
    fn bad_versions() {
        match ContentHash::with_version(0, b"data").unwrap_err() {
            CryptoError::UnsupportedVersion(0) => (),
            e => panic!("expected UnsupportedVersion, got {:?}", e),
        }
        match HashState::with_version(2).unwrap_err() {
            CryptoError::UnsupportedVersion(2) => (),
            e => panic!("expected UnsupportedVersion, got {:?}", e),
        }
        let mut enc = Vec::new();
        ContentHash::new(b"data").encode(&mut enc);
        enc[0] = 0;
        assert!(ContentHash::decode(&mut &enc[..]).is_err());
    }

    #[test]
    fn base58_roundtrip() {
        let h = ContentHash::new(b"addressable");
        let s = h.to_base58();
        let h2 = ContentHash::from_base58(&s).unwrap();
        assert_eq!(h, h2);
        assert!(ContentHash::from_base58("not!!base58").is_err());
        // Trailing garbage after a valid hash must be rejected.
        let mut raw = Vec::new();
        h.encode(&mut raw);
        raw.push(7);
        assert!(ContentHash::from_base58(&bs58::encode(&raw).into_string()).is_err());
    }
}
