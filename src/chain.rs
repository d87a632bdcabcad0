//! Key-rotation link chains.
//!
//! A username's active public key may change over time. Continuity is proven
//! by a [`KeyChain`]: an ordered, non-empty sequence of
//! [`UserPublicKeyLink`] records, each binding `{username, public key,
//! validity window}` under a signature. The first link is self-signed by the
//! key it names (root of trust, created at registration); every later link is
//! signed by the key named in the link before it, handing authority off from
//! key to key. A verifier can walk the whole chain from the registration
//! signature without trusting the directory service that stored it.
//!
//! A chain is append-only. A verifier that has previously accepted a chain
//! should only accept a replacement that [`KeyChain::is_extension_of`] the
//! accepted one; which of two competing valid forks wins is directory
//! policy, decided outside this module.
//!
//! # Format
//!
//! A link is encoded as a version byte, the length-prefixed username, the
//! encoded public key, the window start and end (u64 milliseconds,
//! big-endian, `u64::MAX` for an open end), then the 64-byte signature. The
//! signature covers every byte before it.

use std::convert::TryFrom;
use std::fmt;

use byteorder::{BigEndian, ReadBytesExt};
use thiserror::Error;

use crate::error::CryptoError;
use crate::identity::{Signature, User, UserPublicKey, PUBLIC_KEY_BYTES, SIGNATURE_BYTES};
use crate::wire;

/// Default link format version.
pub const DEFAULT_LINK_VERSION: u8 = 1;

/// Minimum accepted link format version.
pub const MIN_LINK_VERSION: u8 = 1;

/// Maximum accepted link format version.
pub const MAX_LINK_VERSION: u8 = 1;

/// Longest accepted username, in bytes.
pub const MAX_USERNAME_BYTES: usize = 100;

/// Largest accepted encoded link.
pub const MAX_LINK_BYTES: usize = 1024;

/// Most links accepted in one chain.
pub const MAX_CHAIN_LINKS: usize = 256;

/// Chain validation failures. Each carries the index of the first link at
/// which the walk broke; nothing past that index was evaluated.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ChainError {
    #[error("chain is empty")]
    Empty,
    #[error("chain has {len} links, more than the maximum {max}")]
    TooLong { len: usize, max: usize },
    #[error("link 0 is not self-signed by its own named key")]
    RootNotSelfSigned,
    #[error("link {index}: signature does not verify under the preceding link's key")]
    BrokenLink { index: usize },
    #[error("link {index}: username does not match the chain's username")]
    UsernameMismatch { index: usize },
    #[error("link {index}: validity window starts before the preceding link's")]
    NonMonotonicWindow { index: usize },
    #[error("validity window is empty (end not after start)")]
    EmptyWindow,
    #[error("rotation must be signed by the chain's current tail key")]
    WrongRotationKey,
    #[error("rotation time predates the tail link's validity start")]
    RotationTooEarly,
}

/// A half-open time range `[start, end)` in milliseconds since the epoch.
/// `u64::MAX` as the end marks a window with no scheduled expiry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ValidityWindow {
    start_millis: u64,
    end_millis: u64,
}

impl ValidityWindow {
    /// End marker for a window with no scheduled expiry.
    pub const OPEN_END: u64 = u64::MAX;

    /// Create a window, rejecting empty ones.
    pub fn new(start_millis: u64, end_millis: u64) -> Result<ValidityWindow, ChainError> {
        if end_millis <= start_millis {
            return Err(ChainError::EmptyWindow);
        }
        Ok(ValidityWindow {
            start_millis,
            end_millis,
        })
    }

    /// A window from `start_millis` with no scheduled expiry.
    pub fn open(start_millis: u64) -> ValidityWindow {
        ValidityWindow {
            start_millis,
            end_millis: Self::OPEN_END,
        }
    }

    pub fn start_millis(&self) -> u64 {
        self.start_millis
    }

    pub fn end_millis(&self) -> u64 {
        self.end_millis
    }

    pub fn contains(&self, instant_millis: u64) -> bool {
        instant_millis >= self.start_millis && instant_millis < self.end_millis
    }
}

impl fmt::Display for ValidityWindow {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.end_millis == Self::OPEN_END {
            write!(f, "[{}, ∞)", self.start_millis)
        } else {
            write!(f, "[{}, {})", self.start_millis, self.end_millis)
        }
    }
}

/// One signed claim that `key` speaks for `username` during `claim`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct UserPublicKeyLink {
    username: String,
    key: UserPublicKey,
    claim: ValidityWindow,
    signature: Signature,
}

impl UserPublicKeyLink {
    /// Create the self-signed first link of a chain, as made at registration.
    pub fn sign_root(
        user: &User,
        username: &str,
        claim: ValidityWindow,
    ) -> Result<UserPublicKeyLink, CryptoError> {
        Self::sign_with(user, username, user.public(), claim)
    }

    /// Create a link naming `new_key`, attested by `authority`. For the link
    /// to verify in a chain, `authority` must hold the key named by the link
    /// before it.
    pub fn sign_next(
        authority: &User,
        username: &str,
        new_key: &UserPublicKey,
        claim: ValidityWindow,
    ) -> Result<UserPublicKeyLink, CryptoError> {
        Self::sign_with(authority, username, new_key, claim)
    }

    fn sign_with(
        authority: &User,
        username: &str,
        key: &UserPublicKey,
        claim: ValidityWindow,
    ) -> Result<UserPublicKeyLink, CryptoError> {
        if username.is_empty() {
            return Err(CryptoError::BadFormat("username is empty"));
        }
        if username.len() > MAX_USERNAME_BYTES {
            return Err(CryptoError::SizeLimit {
                step: "sign link username",
                max: MAX_USERNAME_BYTES,
                actual: username.len(),
            });
        }
        let payload = signing_payload(username, key, &claim);
        let signature = authority.sign(&payload);
        Ok(UserPublicKeyLink {
            username: username.to_owned(),
            key: key.clone(),
            claim,
            signature,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// The public key this link names as active during its window.
    pub fn key(&self) -> &UserPublicKey {
        &self.key
    }

    pub fn claim(&self) -> &ValidityWindow {
        &self.claim
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Check this link's signature under the given attesting key.
    pub fn verify_signed_by(&self, authority: &UserPublicKey) -> bool {
        let payload = signing_payload(&self.username, &self.key, &self.claim);
        authority.verify(&payload, &self.signature)
    }

    /// Length of this link once encoded as bytes.
    pub fn size(&self) -> usize {
        1 + 4 + self.username.len() + PUBLIC_KEY_BYTES + 8 + 8 + SIGNATURE_BYTES
    }

    /// Encode onto an existing byte vector.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.reserve(self.size());
        buf.extend_from_slice(&signing_payload(&self.username, &self.key, &self.claim));
        self.signature.encode(buf);
    }

    /// Decode from a byte slice, advancing it past the link.
    pub fn decode(buf: &mut &[u8]) -> Result<UserPublicKeyLink, CryptoError> {
        let version = buf.read_u8().map_err(CryptoError::Io)?;
        if !(MIN_LINK_VERSION..=MAX_LINK_VERSION).contains(&version) {
            return Err(CryptoError::UnsupportedVersion(version));
        }
        let username = wire::read_str(buf, "read link username", MAX_USERNAME_BYTES)?;
        if username.is_empty() {
            return Err(CryptoError::BadFormat("username is empty"));
        }
        let key_bytes: [u8; PUBLIC_KEY_BYTES] = wire::read_array(buf, "read link public key")?;
        let key = UserPublicKey::try_from(&key_bytes[..])?;
        let start_millis = wire::read_u64(buf)?;
        let end_millis = wire::read_u64(buf)?;
        let claim = ValidityWindow::new(start_millis, end_millis).map_err(CryptoError::Chain)?;
        let sig_bytes: [u8; SIGNATURE_BYTES] = wire::read_array(buf, "read link signature")?;
        let signature = Signature::try_from(&sig_bytes[..])?;
        Ok(UserPublicKeyLink {
            username,
            key,
            claim,
            signature,
        })
    }
}

// The signature covers the link encoding minus the trailing signature bytes.
fn signing_payload(username: &str, key: &UserPublicKey, claim: &ValidityWindow) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + 4 + username.len() + PUBLIC_KEY_BYTES + 16);
    buf.push(DEFAULT_LINK_VERSION);
    wire::write_str(&mut buf, username);
    key.encode(&mut buf);
    wire::write_u64(&mut buf, claim.start_millis());
    wire::write_u64(&mut buf, claim.end_millis());
    buf
}

/// An ordered, non-empty, signature-linked sequence of key claims for one
/// username. Immutable once constructed; every constructor verifies.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct KeyChain {
    links: Vec<UserPublicKeyLink>,
}

impl KeyChain {
    /// Start a chain from a self-signed registration link.
    pub fn register(link: UserPublicKeyLink) -> Result<KeyChain, ChainError> {
        Self::from_links(vec![link])
    }

    /// Assemble a chain from links, verifying it in full.
    pub fn from_links(links: Vec<UserPublicKeyLink>) -> Result<KeyChain, ChainError> {
        let chain = KeyChain { links };
        chain.verify()?;
        Ok(chain)
    }

    pub fn links(&self) -> &[UserPublicKeyLink] {
        &self.links
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Chains are never empty; this exists for the conventional pairing with
    /// [`len`](Self::len).
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// The username every link in this chain claims.
    pub fn username(&self) -> &str {
        &self.links[0].username
    }

    /// The key named by the newest link.
    pub fn current_key(&self) -> &UserPublicKey {
        &self.links[self.links.len() - 1].key
    }

    /// The link whose claim covers the given instant, if any. A link's
    /// effective window is clipped by its successor's start: once authority
    /// is handed off, the older key no longer speaks for the username.
    pub fn active_at(&self, instant_millis: u64) -> Option<&UserPublicKeyLink> {
        for (i, link) in self.links.iter().enumerate() {
            let handoff = self
                .links
                .get(i + 1)
                .map(|next| next.claim.start_millis)
                .unwrap_or(ValidityWindow::OPEN_END);
            let end = link.claim.end_millis.min(handoff);
            if instant_millis >= link.claim.start_millis && instant_millis < end {
                return Some(link);
            }
        }
        None
    }

    /// Walk the chain in order and check every hand-off of authority.
    ///
    /// Fails closed at the first broken link: once a signature, username, or
    /// window check fails, later links are not evaluated, since authority
    /// past a break cannot be trusted.
    pub fn verify(&self) -> Result<(), ChainError> {
        if self.links.is_empty() {
            return Err(ChainError::Empty);
        }
        if self.links.len() > MAX_CHAIN_LINKS {
            return Err(ChainError::TooLong {
                len: self.links.len(),
                max: MAX_CHAIN_LINKS,
            });
        }

        let root = &self.links[0];
        if !root.verify_signed_by(&root.key) {
            return Err(ChainError::RootNotSelfSigned);
        }

        for index in 1..self.links.len() {
            let prev = &self.links[index - 1];
            let link = &self.links[index];
            if link.username != prev.username {
                return Err(ChainError::UsernameMismatch { index });
            }
            if link.claim.start_millis < prev.claim.start_millis {
                return Err(ChainError::NonMonotonicWindow { index });
            }
            if !link.verify_signed_by(&prev.key) {
                return Err(ChainError::BrokenLink { index });
            }
        }
        Ok(())
    }

    /// Hand the username off to `new_key` at `at_millis`, returning the
    /// extended chain. `old` must hold the current tail key and signs the new
    /// link. When the tail is the self-signed root with no scheduled expiry,
    /// its window is also truncated to end at the hand-off and re-signed, so
    /// the old claim closes without a gap. A later link's tail cannot be
    /// re-signed (its signer is the key before it), so its effective window
    /// is instead bounded by the new link's start (see
    /// [`active_at`](Self::active_at)).
    pub fn rotate(
        &self,
        old: &User,
        new_key: &UserPublicKey,
        at_millis: u64,
    ) -> Result<KeyChain, CryptoError> {
        let tail = self.links.last().ok_or(ChainError::Empty)?;
        if old.public() != &tail.key {
            return Err(CryptoError::Chain(ChainError::WrongRotationKey));
        }
        if at_millis < tail.claim.start_millis {
            return Err(CryptoError::Chain(ChainError::RotationTooEarly));
        }

        let mut links = self.links.clone();
        if links.len() == 1
            && tail.claim.end_millis == ValidityWindow::OPEN_END
            && at_millis > tail.claim.start_millis
        {
            let truncated = ValidityWindow::new(tail.claim.start_millis, at_millis)
                .map_err(CryptoError::Chain)?;
            links[0] = UserPublicKeyLink::sign_root(old, &tail.username, truncated)?;
        }
        links.push(UserPublicKeyLink::sign_next(
            old,
            &tail.username,
            new_key,
            ValidityWindow::open(at_millis),
        )?);
        KeyChain::from_links(links).map_err(CryptoError::Chain)
    }

    /// Whether this chain is an append-only extension of a previously
    /// accepted chain. Every accepted link except the tail must be identical;
    /// the accepted tail may only have had its window end truncated (same
    /// username, key, and start). Both chains must verify on their own.
    ///
    /// This is a policy building block for a directory service; it does not
    /// arbitrate between competing forks.
    pub fn is_extension_of(&self, accepted: &KeyChain) -> bool {
        if self.verify().is_err() || accepted.verify().is_err() {
            return false;
        }
        if self.links.len() < accepted.links.len() {
            return false;
        }
        let tail = accepted.links.len() - 1;
        if self.links[..tail] != accepted.links[..tail] {
            return false;
        }
        let old_tail = &accepted.links[tail];
        let new_tail = &self.links[tail];
        new_tail.username == old_tail.username
            && new_tail.key == old_tail.key
            && new_tail.claim.start_millis == old_tail.claim.start_millis
            && new_tail.claim.end_millis <= old_tail.claim.end_millis
    }

    /// Encode as a link count followed by each link, length-prefixed.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.links.len() as u32).to_be_bytes());
        for link in &self.links {
            let mut raw = Vec::with_capacity(link.size());
            link.encode(&mut raw);
            wire::write_bytes(buf, &raw);
        }
    }

    /// Decode and fully verify a chain, advancing the slice past it.
    pub fn decode(buf: &mut &[u8]) -> Result<KeyChain, CryptoError> {
        let count = buf.read_u32::<BigEndian>().map_err(CryptoError::Io)? as usize;
        if count > MAX_CHAIN_LINKS {
            return Err(CryptoError::SizeLimit {
                step: "read chain link count",
                max: MAX_CHAIN_LINKS,
                actual: count,
            });
        }
        let mut links = Vec::with_capacity(count);
        for _ in 0..count {
            let raw = wire::read_bytes(buf, "read chain link", MAX_LINK_BYTES)?;
            let mut link_buf = &raw[..];
            let link = UserPublicKeyLink::decode(&mut link_buf)?;
            wire::expect_end(link_buf, "read chain link")?;
            links.push(link);
        }
        KeyChain::from_links(links).map_err(CryptoError::Chain)
    }
}

impl fmt::Display for KeyChain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "KeyChain({}, {} links, current {})",
            self.username(),
            self.len(),
            self.current_key()
        )
    }
}
