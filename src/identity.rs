//! User identity keys.
//!
//! A Haven identity is a pair of asymmetric keys carried together: an Ed25519
//! key for signatures and an X25519 key for the hybrid encryption envelope
//! (see [`crate::envelope`]). The public halves travel as a [`UserPublicKey`];
//! a [`User`] holds the private halves as well, and every operation that only
//! verifies or encrypts-to-recipient takes the public form.
//!
//! Keys are generated either from a cryptographic RNG, or deterministically
//! from a `(username, password)` pair. Deterministic generation is
//! bit-for-bit reproducible across processes and machines, which is what lets
//! a user walk up to a fresh device and re-derive their identity from memory
//! of their password alone. The username is mixed into the derivation as a
//! salt, so two users sharing a password still get unrelated keys.
//!
//! # Example
//!
//! ```
//! # use haven_crypto::identity::User;
//! let mut csprng = rand::rngs::OsRng;
//! let user = User::generate(&mut csprng);
//!
//! let signature = user.sign(b"I am data, about to be signed");
//! assert!(user.public().verify(b"I am data, about to be signed", &signature));
//! ```
//!
//! # Format
//!
//! A [`UserPublicKey`] is encoded as a version byte, the 32-byte Ed25519
//! verifying key, then the 32-byte X25519 public key. The private encoding
//! replaces both keys with their secret halves and is only ever produced for
//! export into an encrypted envelope.

use std::convert::TryFrom;
use std::fmt;

use blake2::Digest;
use ed25519_dalek::Signer;
use rand_core::{CryptoRng, RngCore};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::hash::{Blake2b256, ContentHash};

/// Default identity algorithm version.
pub const DEFAULT_IDENTITY_VERSION: u8 = 1;

/// Minimum accepted identity algorithm version.
pub const MIN_IDENTITY_VERSION: u8 = 1;

/// Maximum accepted identity algorithm version.
pub const MAX_IDENTITY_VERSION: u8 = 1;

/// Signature length in bytes.
pub const SIGNATURE_BYTES: usize = ed25519_dalek::SIGNATURE_LENGTH;

const SIGN_KEY_BYTES: usize = 32;
const EXCHANGE_KEY_BYTES: usize = 32;

/// Encoded public key length: version byte plus both public halves.
pub const PUBLIC_KEY_BYTES: usize = 1 + SIGN_KEY_BYTES + EXCHANGE_KEY_BYTES;

/// Encoded private key length: version byte plus both secret halves.
pub const PRIVATE_KEY_BYTES: usize = 1 + SIGN_KEY_BYTES + EXCHANGE_KEY_BYTES;

// Domain separation for password-derived key seeds.
const SIGN_SEED_CONTEXT: &[u8] = b"haven.identity.sign-seed.v1";
const EXCHANGE_SEED_CONTEXT: &[u8] = b"haven.identity.exchange-seed.v1";

/// The public half of a user identity: verifies signatures, encrypts
/// envelopes to the holder of the private half.
#[derive(Clone)]
pub struct UserPublicKey {
    version: u8,
    sign: ed25519_dalek::VerifyingKey,
    exchange: x25519_dalek::PublicKey,
}

impl UserPublicKey {
    /// Get the identity algorithm version.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Verify a signature over raw message bytes.
    ///
    /// Fails closed: any cryptographic failure is an ordinary `false`, never
    /// a fault in the caller.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.sign.verify_strict(message, &signature.0).is_ok()
    }

    /// Verify a signature produced by [`User::hash_and_sign`]. The two paths
    /// are not interchangeable: a raw-signed message will not verify here.
    pub fn verify_hashed(&self, message: &[u8], signature: &Signature) -> bool {
        let digest = ContentHash::new(message);
        self.sign.verify_strict(digest.digest(), &signature.0).is_ok()
    }

    /// Length of this key once encoded as bytes.
    pub fn size(&self) -> usize {
        PUBLIC_KEY_BYTES
    }

    /// Encode onto an existing byte vector. Writes the version byte followed
    /// by both public halves; no length information is included.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.reserve(self.size());
        buf.push(self.version);
        buf.extend_from_slice(self.sign.as_bytes());
        buf.extend_from_slice(self.exchange.as_bytes());
    }

    /// Convert into a byte vector. For extending an existing vector, see
    /// [`encode`](Self::encode).
    pub fn to_vec(&self) -> Vec<u8> {
        let mut v = Vec::new();
        self.encode(&mut v);
        v
    }

    /// Convert into a base58-encoded string.
    pub fn to_base58(&self) -> String {
        bs58::encode(&self.to_vec()).into_string()
    }

    /// Attempt to parse a base58-encoded public key.
    pub fn from_base58(s: &str) -> Result<Self, CryptoError> {
        let raw = bs58::decode(s)
            .into_vec()
            .map_err(|_| CryptoError::BadFormat("public key is not valid base58"))?;
        Self::try_from(&raw[..])
    }

    pub(crate) fn exchange_key(&self) -> &x25519_dalek::PublicKey {
        &self.exchange
    }
}

impl TryFrom<&[u8]> for UserPublicKey {
    type Error = CryptoError;

    /// Value must be exactly the encoded length (no trailing bytes allowed).
    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let (version, data) = value.split_first().ok_or(CryptoError::BadLength {
            step: "get public key version",
            expected: 1,
            actual: 0,
        })?;
        if !(MIN_IDENTITY_VERSION..=MAX_IDENTITY_VERSION).contains(version) {
            return Err(CryptoError::UnsupportedVersion(*version));
        }
        if data.len() != SIGN_KEY_BYTES + EXCHANGE_KEY_BYTES {
            return Err(CryptoError::BadLength {
                step: "get public key material",
                expected: SIGN_KEY_BYTES + EXCHANGE_KEY_BYTES,
                actual: data.len(),
            });
        }
        let (sign_bytes, exchange_bytes) = data.split_at(SIGN_KEY_BYTES);
        let sign_bytes: [u8; SIGN_KEY_BYTES] =
            sign_bytes.try_into().map_err(|_| CryptoError::BadKey)?;
        let exchange_bytes: [u8; EXCHANGE_KEY_BYTES] =
            exchange_bytes.try_into().map_err(|_| CryptoError::BadKey)?;
        let sign = ed25519_dalek::VerifyingKey::from_bytes(&sign_bytes)
            .map_err(|_| CryptoError::BadKey)?;
        let exchange = x25519_dalek::PublicKey::from(exchange_bytes);
        Ok(UserPublicKey {
            version: *version,
            sign,
            exchange,
        })
    }
}

impl Eq for UserPublicKey {}

impl PartialEq for UserPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && bool::from(
                self.sign.as_bytes().ct_eq(other.sign.as_bytes())
                    & self.exchange.as_bytes().ct_eq(other.exchange.as_bytes()),
            )
    }
}

impl fmt::Debug for UserPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("UserPublicKey")
            .field("version", &self.version)
            .field("sign", &format_args!("{:x?}", self.sign.as_bytes()))
            .field("exchange", &format_args!("{:x?}", self.exchange.as_bytes()))
            .finish()
    }
}

impl fmt::Display for UserPublicKey {
    /// Display as a base58-encoded string.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

/// A full user identity: the public key plus both private halves.
///
/// Anything a `User` can do with only its public half is exposed through
/// [`UserPublicKey`]; borrow it with [`public`](Self::public).
#[derive(Clone)]
pub struct User {
    public: UserPublicKey,
    sign: ed25519_dalek::SigningKey,
    exchange: x25519_dalek::StaticSecret,
}

impl User {
    /// Generate a fresh identity from a cryptographic RNG.
    pub fn generate<R>(csprng: &mut R) -> User
    where
        R: CryptoRng + RngCore,
    {
        let sign = ed25519_dalek::SigningKey::generate(csprng);
        let exchange = x25519_dalek::StaticSecret::random_from_rng(&mut *csprng);
        Self::from_parts(sign, exchange)
    }

    /// Deterministically generate the identity for a `(username, password)`
    /// pair. Identical inputs always yield a bit-for-bit identical identity.
    ///
    /// Each secret half is seeded from a domain-separated BLAKE2b read over
    /// the length-framed username followed by the password. The derivation
    /// state is local to this call; concurrent derivations share nothing.
    pub fn generate_from_password(username: &str, password: &str) -> User {
        let sign_seed = derive_seed(SIGN_SEED_CONTEXT, username, password);
        let exchange_seed = derive_seed(EXCHANGE_SEED_CONTEXT, username, password);
        let sign = ed25519_dalek::SigningKey::from_bytes(&sign_seed);
        let exchange = x25519_dalek::StaticSecret::from(*exchange_seed);
        Self::from_parts(sign, exchange)
    }

    fn from_parts(
        sign: ed25519_dalek::SigningKey,
        exchange: x25519_dalek::StaticSecret,
    ) -> User {
        let public = UserPublicKey {
            version: DEFAULT_IDENTITY_VERSION,
            sign: sign.verifying_key(),
            exchange: x25519_dalek::PublicKey::from(&exchange),
        };
        User {
            public,
            sign,
            exchange,
        }
    }

    /// The shareable public half of this identity.
    pub fn public(&self) -> &UserPublicKey {
        &self.public
    }

    /// Sign raw message bytes.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.sign.sign(message))
    }

    /// Hash the message, then sign the 32-byte digest. Pairs with
    /// [`UserPublicKey::verify_hashed`], and only with it.
    pub fn hash_and_sign(&self, message: &[u8]) -> Signature {
        let digest = ContentHash::new(message);
        Signature(self.sign.sign(digest.digest()))
    }

    /// Export both secret halves for packing into an encrypted envelope.
    /// The returned buffer is zeroed when dropped.
    pub fn export_private(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Vec::with_capacity(PRIVATE_KEY_BYTES);
        out.push(self.public.version);
        out.extend_from_slice(self.sign.as_bytes());
        out.extend_from_slice(self.exchange.as_bytes());
        Zeroizing::new(out)
    }

    /// Reconstruct an identity from an exported private encoding.
    pub fn import_private(value: &[u8]) -> Result<User, CryptoError> {
        let (version, data) = value.split_first().ok_or(CryptoError::BadLength {
            step: "get private key version",
            expected: 1,
            actual: 0,
        })?;
        if !(MIN_IDENTITY_VERSION..=MAX_IDENTITY_VERSION).contains(version) {
            return Err(CryptoError::UnsupportedVersion(*version));
        }
        if data.len() != SIGN_KEY_BYTES + EXCHANGE_KEY_BYTES {
            return Err(CryptoError::BadLength {
                step: "get private key material",
                expected: SIGN_KEY_BYTES + EXCHANGE_KEY_BYTES,
                actual: data.len(),
            });
        }
        let (sign_bytes, exchange_bytes) = data.split_at(SIGN_KEY_BYTES);
        let sign_bytes: [u8; SIGN_KEY_BYTES] =
            sign_bytes.try_into().map_err(|_| CryptoError::BadKey)?;
        let exchange_bytes: [u8; EXCHANGE_KEY_BYTES] =
            exchange_bytes.try_into().map_err(|_| CryptoError::BadKey)?;
        let sign = ed25519_dalek::SigningKey::from_bytes(&sign_bytes);
        let exchange = x25519_dalek::StaticSecret::from(exchange_bytes);
        Ok(Self::from_parts(sign, exchange))
    }

    pub(crate) fn exchange_secret(&self) -> &x25519_dalek::StaticSecret {
        &self.exchange
    }
}

impl fmt::Debug for User {
    /// Never prints the private halves.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("User")
            .field("public", &self.public)
            .finish()
    }
}

impl fmt::Display for User {
    /// Display just the public key (never the private halves).
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.public, f)
    }
}

fn derive_seed(context: &[u8], username: &str, password: &str) -> Zeroizing<[u8; 32]> {
    // The username field is length-framed so ("ab", "c") and ("a", "bc")
    // never hash the same bytes.
    let mut state = Blake2b256::new();
    state.update(context);
    state.update((username.len() as u64).to_be_bytes());
    state.update(username.as_bytes());
    state.update(password.as_bytes());
    Zeroizing::new(state.finalize().into())
}

/// An Ed25519 signature over either raw message bytes or a content digest.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

impl Signature {
    /// Get the raw signature bytes.
    pub fn to_bytes(&self) -> [u8; SIGNATURE_BYTES] {
        self.0.to_bytes()
    }

    /// Encode onto an existing byte vector.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_bytes());
    }
}

impl TryFrom<&[u8]> for Signature {
    type Error = CryptoError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; SIGNATURE_BYTES] =
            value.try_into().map_err(|_| CryptoError::BadLength {
                step: "get signature bytes",
                expected: SIGNATURE_BYTES,
                actual: value.len(),
            })?;
        Ok(Signature(ed25519_dalek::Signature::from_bytes(&bytes)))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Signature({:x?})", &self.to_bytes()[..8])
    }
}
