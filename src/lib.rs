/*!
Cryptographic core for the Haven peer-to-peer encrypted storage and sharing
network. Users are identified by asymmetric key pairs rather than passwords,
file content is split into encrypted chunks addressed by content hash, and a
username's key may rotate over time through a signed link chain registered
with a directory service.

The pieces, leaf-first:

- [`hash`]: the 256-bit content hash, used both as a content address and as
  key-derivation seed material.
- [`symmetric`]: the 256-bit symmetric key and authenticated stream cipher.
- [`identity`]: user key pairs (signing + key exchange), including
  deterministic generation from a username and password.
- [`envelope`]: hybrid public-key encryption of arbitrary payloads.
- [`chunk`]: the content-derived convergent chunk cipher.
- [`chain`]: the key-rotation link chain and its verification.
- [`directory`]: the client protocol for the username→key directory.

# Example

```
use haven_crypto::{CryptoSrc, chunk::Chunk, identity::User};

let mut csprng = rand::rngs::OsRng;
let mut rng: &mut dyn CryptoSrc = &mut csprng;

// An identity a user can re-derive from memory alone.
let alice = User::generate_from_password("alice", "correct horse");

// A chunk encrypts under a key derived from its own content.
let chunk = Chunk::new(b"file contents".to_vec()).unwrap();
let stored = chunk.encrypt();

// Share the chunk's address with a friend, privately.
let friend = User::generate(&mut rng);
let grant = chunk.hash().to_base58().into_bytes();
let sealed = haven_crypto::envelope::seal(&mut rng, friend.public(), &grant).unwrap();
assert_eq!(haven_crypto::envelope::open(&friend, &sealed).unwrap(), grant);
# let _ = (alice, stored);
```

# Cryptographic Algorithms Used

The currently used algorithms are:

- Hashing: BLAKE2b with a 32-byte digest
- Signing: Ed25519
- Symmetric Encryption: AEAD cipher using XChaCha20 and Poly1305.
- DH key exchange: X25519 (hybrid envelopes)

# Cryptographic Versioning

Every encoded object leads with a version byte, and each of the four core
algorithms may be upgraded over time. Upgrades should be infrequent, and are
done roughly when an existing recommended algorithm is regarded as weak but
not yet broken: a new algorithm is implemented under the next version number,
deployments learn to accept it, the default moves, and only much later does
the minimum accepted version move up. If an algorithm is considered outright
broken, the default and minimum are raised as soon as possible instead;
breaking compatibility with deployed data is an acceptable cost when security
is compromised.

The signing and DH exchange algorithms will almost certainly be upgraded in
the future, as both will need to move to post-quantum algorithms.
*/

mod error;
pub use self::error::CryptoError;

pub mod chain;
pub mod chunk;
pub mod directory;
pub mod envelope;
pub mod hash;
pub mod identity;
pub mod symmetric;

mod wire;

use rand_core::{CryptoRng, RngCore};

/// Holds a cryptographic random number generator (RNG). This trait is needed
/// so that a RNG can be passed around as a trait object.
pub trait CryptoSrc: CryptoRng + RngCore {}
impl<T: CryptoRng + RngCore> CryptoSrc for T {}
