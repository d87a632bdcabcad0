//! Directory service client.
//!
//! The directory maps usernames to [`KeyChain`]s and relays follow requests
//! and metadata-blob pointers between users. Its storage is not trusted:
//! every chain received here is re-verified locally before it is returned,
//! and every length-prefixed field is parsed against an explicit maximum so
//! a malicious directory cannot force unbounded allocation.
//!
//! The [`Directory`] trait carries the semantic operations; [`HttpDirectory`]
//! speaks them over HTTP POST to `core/<operation>` endpoints. The request
//! encoders and response parsers are standalone functions, so a server or an
//! in-memory test double can reuse the exact same wire forms.
//!
//! Unknown usernames are a legitimate protocol outcome and come back as
//! `Ok(None)`; everything else surfaces as a [`DirectoryError`].

use std::convert::TryFrom;

use byteorder::{BigEndian, ReadBytesExt};
use thiserror::Error;
use url::Url;

use crate::chain::KeyChain;
use crate::error::CryptoError;
use crate::hash::ContentHash;
use crate::identity::UserPublicKey;
use crate::wire;

/// Largest accepted encoded public key field.
pub const MAX_PUBLIC_KEY_FIELD_BYTES: usize = 80;

/// Largest opaque blob accepted from or sent to the directory.
pub const MAX_BLOB_BYTES: usize = 8 * 1024 * 1024;

// Hard cap on any single directory response body.
const MAX_RESPONSE_BYTES: usize = MAX_BLOB_BYTES + 1024;

/// Directory protocol failures.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The transport failed or the server answered with an error status.
    #[error("directory transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The response violated the protocol framing, its declared bounds, or
    /// carried a chain that fails verification.
    #[error("directory protocol violation: {0}")]
    Protocol(#[from] CryptoError),
    /// The operation endpoint could not be built from the base URL.
    #[error("invalid directory endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}

/// The username→key directory every Haven node talks to.
///
/// Only the semantic payloads are fixed here; storage, replication, and fork
/// arbitration live behind the trait.
pub trait Directory {
    /// Look up the currently active public key for a username. Unknown
    /// usernames are `Ok(None)`.
    fn get_public_key(&self, username: &str) -> Result<Option<UserPublicKey>, DirectoryError>;

    /// Reverse lookup: the username a public key is registered under.
    fn get_username(&self, key: &UserPublicKey) -> Result<String, DirectoryError>;

    /// Fetch and locally re-verify the full key chain for a username.
    /// Unknown usernames are `Ok(None)`.
    fn get_chain(&self, username: &str) -> Result<Option<KeyChain>, DirectoryError>;

    /// Publish a chain. The server re-verifies before accepting; `Ok(false)`
    /// means it refused.
    fn update_chain(&self, username: &str, chain: &KeyChain) -> Result<bool, DirectoryError>;

    /// Leave an encrypted follow request for the holder of `target`. The
    /// permission blob is a hybrid envelope per [`crate::envelope`].
    fn follow_request(
        &self,
        target: &UserPublicKey,
        envelope: &[u8],
    ) -> Result<bool, DirectoryError>;

    /// Collect the follow requests left for `owner`, as one opaque blob the
    /// caller decrypts with their own private key.
    fn get_follow_requests(&self, owner: &UserPublicKey) -> Result<Vec<u8>, DirectoryError>;

    /// Remove a follow request; `signed_request` is signed per
    /// [`crate::identity::User::sign`].
    fn remove_follow_request(
        &self,
        owner: &UserPublicKey,
        signed_request: &[u8],
    ) -> Result<bool, DirectoryError>;

    /// Point the sharing key's metadata blob at new content;
    /// `signed_payload` is signed by the sharing key.
    fn set_metadata_blob(
        &self,
        owner: &UserPublicKey,
        sharing: &UserPublicKey,
        signed_payload: &[u8],
    ) -> Result<bool, DirectoryError>;

    /// Remove the sharing key's metadata blob pointer.
    fn remove_metadata_blob(
        &self,
        sharing: &UserPublicKey,
        signed_payload: &[u8],
    ) -> Result<bool, DirectoryError>;

    /// Fetch the content address the sharing key's metadata blob points at.
    /// `Ok(None)` when no pointer is set, distinct from any error.
    fn get_metadata_blob(
        &self,
        sharing: &UserPublicKey,
    ) -> Result<Option<ContentHash>, DirectoryError>;
}

// --- Request encoders -------------------------------------------------------

pub fn encode_username_request(username: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    wire::write_str(&mut buf, username);
    buf
}

pub fn encode_key_request(key: &UserPublicKey) -> Vec<u8> {
    let mut buf = Vec::new();
    wire::write_bytes(&mut buf, &key.to_vec());
    buf
}

pub fn encode_update_chain_request(username: &str, chain: &KeyChain) -> Vec<u8> {
    let mut buf = Vec::new();
    wire::write_str(&mut buf, username);
    chain.encode(&mut buf);
    buf
}

pub fn encode_key_blob_request(key: &UserPublicKey, blob: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    wire::write_bytes(&mut buf, &key.to_vec());
    wire::write_bytes(&mut buf, blob);
    buf
}

pub fn encode_set_metadata_request(
    owner: &UserPublicKey,
    sharing: &UserPublicKey,
    signed_payload: &[u8],
) -> Vec<u8> {
    let mut buf = Vec::new();
    wire::write_bytes(&mut buf, &owner.to_vec());
    wire::write_bytes(&mut buf, &sharing.to_vec());
    wire::write_bytes(&mut buf, signed_payload);
    buf
}

// --- Response parsers --------------------------------------------------------

/// Parse a boolean acceptance response. Anything but a single 0 or 1 byte is
/// a protocol violation.
pub fn parse_bool_response(buf: &[u8]) -> Result<bool, CryptoError> {
    let mut rd = buf;
    let value = rd.read_u8().map_err(CryptoError::Io)?;
    wire::expect_end(rd, "read bool response")?;
    match value {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(CryptoError::BadFormat("boolean response byte out of range")),
    }
}

/// Parse a presence-prefixed public key response.
pub fn parse_optional_key_response(buf: &[u8]) -> Result<Option<UserPublicKey>, CryptoError> {
    let mut rd = buf;
    let present = rd.read_u8().map_err(CryptoError::Io)?;
    match present {
        0 => {
            wire::expect_end(rd, "read absent public key response")?;
            Ok(None)
        }
        1 => {
            let raw = wire::read_bytes(&mut rd, "read public key", MAX_PUBLIC_KEY_FIELD_BYTES)?;
            let key = UserPublicKey::try_from(&raw[..])?;
            wire::expect_end(rd, "read public key response")?;
            Ok(Some(key))
        }
        _ => Err(CryptoError::BadFormat("presence byte out of range")),
    }
}

pub fn parse_username_response(buf: &[u8]) -> Result<String, CryptoError> {
    let mut rd = buf;
    let username = wire::read_str(&mut rd, "read username", crate::chain::MAX_USERNAME_BYTES)?;
    wire::expect_end(rd, "read username response")?;
    Ok(username)
}

/// Parse a chain response, re-verifying the chain. A zero link count means
/// the username is unknown.
pub fn parse_chain_response(buf: &[u8]) -> Result<Option<KeyChain>, CryptoError> {
    let mut peek = buf;
    let count = peek.read_u32::<BigEndian>().map_err(CryptoError::Io)?;
    if count == 0 {
        wire::expect_end(peek, "read empty chain response")?;
        return Ok(None);
    }
    let mut rd = buf;
    let chain = KeyChain::decode(&mut rd)?;
    wire::expect_end(rd, "read chain response")?;
    Ok(Some(chain))
}

pub fn parse_blob_response(buf: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut rd = buf;
    let blob = wire::read_bytes(&mut rd, "read blob response", MAX_BLOB_BYTES)?;
    wire::expect_end(rd, "read blob response")?;
    Ok(blob)
}

/// Parse a metadata pointer response. An explicit zero-length field means no
/// pointer is set; that is a distinct, legitimate outcome, not an error.
pub fn parse_metadata_response(buf: &[u8]) -> Result<Option<ContentHash>, CryptoError> {
    let mut rd = buf;
    let raw = wire::read_bytes(&mut rd, "read metadata pointer", 64)?;
    wire::expect_end(rd, "read metadata response")?;
    if raw.is_empty() {
        return Ok(None);
    }
    let mut hash_buf = &raw[..];
    let hash = ContentHash::decode(&mut hash_buf)?;
    wire::expect_end(hash_buf, "read metadata pointer")?;
    Ok(Some(hash))
}

// --- HTTP client -------------------------------------------------------------

/// Directory client over HTTP. Operations POST their request body to
/// `core/<operation>` under the base URL.
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    base: Url,
    client: reqwest::blocking::Client,
}

impl HttpDirectory {
    pub fn new(base: Url) -> Result<HttpDirectory, DirectoryError> {
        let client = reqwest::blocking::Client::builder().build()?;
        Ok(HttpDirectory { base, client })
    }

    /// The directory this client talks to.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn call(&self, operation: &str, body: Vec<u8>) -> Result<Vec<u8>, DirectoryError> {
        let url = self.base.join(operation)?;
        tracing::debug!(%url, request_len = body.len(), "directory request");
        let response = self
            .client
            .post(url.clone())
            .body(body)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                tracing::warn!(%url, error = %e, "directory request failed");
                e
            })?;
        let bytes = response.bytes()?;
        if bytes.len() > MAX_RESPONSE_BYTES {
            return Err(DirectoryError::Protocol(CryptoError::SizeLimit {
                step: "read directory response",
                max: MAX_RESPONSE_BYTES,
                actual: bytes.len(),
            }));
        }
        Ok(bytes.to_vec())
    }
}

impl Directory for HttpDirectory {
    fn get_public_key(&self, username: &str) -> Result<Option<UserPublicKey>, DirectoryError> {
        let resp = self.call("core/getPublicKey", encode_username_request(username))?;
        Ok(parse_optional_key_response(&resp)?)
    }

    fn get_username(&self, key: &UserPublicKey) -> Result<String, DirectoryError> {
        let resp = self.call("core/getUsername", encode_key_request(key))?;
        Ok(parse_username_response(&resp)?)
    }

    fn get_chain(&self, username: &str) -> Result<Option<KeyChain>, DirectoryError> {
        let resp = self.call("core/getChain", encode_username_request(username))?;
        Ok(parse_chain_response(&resp)?)
    }

    fn update_chain(&self, username: &str, chain: &KeyChain) -> Result<bool, DirectoryError> {
        let resp = self.call(
            "core/updateChain",
            encode_update_chain_request(username, chain),
        )?;
        Ok(parse_bool_response(&resp)?)
    }

    fn follow_request(
        &self,
        target: &UserPublicKey,
        envelope: &[u8],
    ) -> Result<bool, DirectoryError> {
        let resp = self.call(
            "core/followRequest",
            encode_key_blob_request(target, envelope),
        )?;
        Ok(parse_bool_response(&resp)?)
    }

    fn get_follow_requests(&self, owner: &UserPublicKey) -> Result<Vec<u8>, DirectoryError> {
        let resp = self.call("core/getFollowRequests", encode_key_request(owner))?;
        Ok(parse_blob_response(&resp)?)
    }

    fn remove_follow_request(
        &self,
        owner: &UserPublicKey,
        signed_request: &[u8],
    ) -> Result<bool, DirectoryError> {
        let resp = self.call(
            "core/removeFollowRequest",
            encode_key_blob_request(owner, signed_request),
        )?;
        Ok(parse_bool_response(&resp)?)
    }

    fn set_metadata_blob(
        &self,
        owner: &UserPublicKey,
        sharing: &UserPublicKey,
        signed_payload: &[u8],
    ) -> Result<bool, DirectoryError> {
        let resp = self.call(
            "core/addMetadataBlob",
            encode_set_metadata_request(owner, sharing, signed_payload),
        )?;
        Ok(parse_bool_response(&resp)?)
    }

    fn remove_metadata_blob(
        &self,
        sharing: &UserPublicKey,
        signed_payload: &[u8],
    ) -> Result<bool, DirectoryError> {
        let resp = self.call(
            "core/removeMetadataBlob",
            encode_key_blob_request(sharing, signed_payload),
        )?;
        Ok(parse_bool_response(&resp)?)
    }

    fn get_metadata_blob(
        &self,
        sharing: &UserPublicKey,
    ) -> Result<Option<ContentHash>, DirectoryError> {
        let resp = self.call("core/getMetadataBlob", encode_key_request(sharing))?;
        Ok(parse_metadata_response(&resp)?)
    }
}
