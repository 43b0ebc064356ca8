use std::{fmt, str::FromStr};

use base58::{FromBase58, ToBase58};
use multihash::{Code, Multihash, MultihashDigest};
use ring::signature::UnparsedPublicKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::SigScheme;

const IDENTITY: u64 = 0x00;
const SHA2_256: u64 = 0x12;

/// Encoded keys up to this length are embedded in the [`PeerId`] rather than hashed.
///
/// This keeps Ed25519 peer IDs self-describing, so the public key needn't travel alongside.
const MAX_INLINE_KEY_LENGTH: usize = 42;

/// The public half of a [`Key`](crate::Key), tagged with its scheme.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey {
    scheme: SigScheme,
    raw: Vec<u8>,
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("scheme", &self.scheme)
            .field("peer_id", &self.peer_id())
            .finish()
    }
}

impl PublicKey {
    pub(crate) fn new_unchecked(scheme: SigScheme, raw: Vec<u8>) -> Self {
        Self { scheme, raw }
    }

    /// Decode a public key from its wire form: a scheme tag byte, then the raw key.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (&tag, raw) = bytes.split_first()?;
        let scheme = SigScheme::from_tag(tag)?;
        if raw.len() != scheme.public_key_len() {
            return None;
        }

        Some(Self::new_unchecked(scheme, raw.to_vec()))
    }

    /// Encode the public key to its wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.raw.len());
        out.push(self.scheme.tag());
        out.extend_from_slice(&self.raw);
        out
    }

    /// The signature scheme of this key.
    pub fn scheme(&self) -> SigScheme {
        self.scheme
    }

    /// The raw key bytes (without the scheme tag).
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Check a signature over `message`.
    pub fn verify(&self, message: &[u8], sig: &[u8]) -> bool {
        UnparsedPublicKey::new(self.scheme.verification(), &self.raw)
            .verify(message, sig)
            .is_ok()
    }

    /// The peer ID derived from this key.
    pub fn peer_id(&self) -> PeerId {
        PeerId::from_public_key(self)
    }
}

/// A peer's durable identity, derived deterministically from its public key.
///
/// A [multihash](https://multiformats.io/multihash/) of the encoded public key: short keys are
/// embedded verbatim (identity code), longer ones are hashed with SHA-256. The text form is
/// base58 of the multihash bytes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PeerId(Multihash);

impl PeerId {
    /// Derive the peer ID of a public key.
    pub fn from_public_key(key: &PublicKey) -> Self {
        let encoded = key.to_bytes();
        if encoded.len() <= MAX_INLINE_KEY_LENGTH {
            if let Ok(inline) = Multihash::wrap(IDENTITY, &encoded) {
                return Self(inline);
            }
        }

        Self(Code::Sha2_256.digest(&encoded))
    }

    /// Parse a peer ID from its binary multihash form.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let hash = Multihash::from_bytes(bytes).ok()?;
        if hash.to_bytes() != bytes {
            return None;
        }

        match hash.code() {
            IDENTITY => PublicKey::from_bytes(hash.digest()).map(|_| Self(hash)),
            SHA2_256 if hash.digest().len() == 32 => Some(Self(hash)),
            _ => None,
        }
    }

    /// The binary multihash form of the peer ID.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes()
    }

    /// The underlying multihash.
    pub fn multihash(&self) -> &Multihash {
        &self.0
    }

    /// The public key, if it is embedded in the peer ID.
    pub fn public_key(&self) -> Option<PublicKey> {
        match self.0.code() {
            IDENTITY => PublicKey::from_bytes(self.0.digest()),
            _ => None,
        }
    }

    /// Whether `key` is the key this peer ID was derived from.
    pub fn matches(&self, key: &PublicKey) -> bool {
        *self == key.peer_id()
    }

    /// Encode as base58.
    pub fn to_base58(&self) -> String {
        self.to_bytes().to_base58()
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.to_base58())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

/// A string was not a valid peer ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid peer id")]
pub struct InvalidPeerId;

impl FromStr for PeerId {
    type Err = InvalidPeerId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.from_base58().map_err(|_| InvalidPeerId)?;
        Self::from_bytes(&bytes).ok_or(InvalidPeerId)
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Key;

    #[test]
    fn ed25519_ids_embed_the_key() {
        let key = Key::generate().unwrap();
        let id = key.peer_id();
        assert_eq!(id.multihash().code(), IDENTITY);
        assert_eq!(id.public_key(), Some(key.public_key()));
        assert!(id.matches(&key.public_key()));
    }

    #[test]
    fn ecdsa_ids_are_hashed() {
        let key = Key::generate_for(SigScheme::EcdsaP256).unwrap();
        let id = key.peer_id();
        assert_eq!(id.multihash().code(), SHA2_256);
        assert_eq!(id.multihash().digest().len(), 32);
        assert_eq!(id.public_key(), None);
        assert!(id.matches(&key.public_key()));
        assert!(!id.matches(&Key::generate().unwrap().public_key()));
    }

    #[test]
    fn derivation_is_deterministic() {
        let key = Key::generate_for(SigScheme::EcdsaP384).unwrap();
        assert_eq!(key.peer_id(), key.public_key().peer_id());
        assert_eq!(key.peer_id(), key.clone().peer_id());
    }

    #[test]
    fn text_form_parses_back() {
        let id = Key::generate().unwrap().peer_id();
        let parsed: PeerId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!("not!base58".parse::<PeerId>(), Err(InvalidPeerId));
        assert_eq!("abc".parse::<PeerId>(), Err(InvalidPeerId));
        assert!(PeerId::from_bytes(&[0x12, 3, 1, 2, 3]).is_none());
        let mut trailing = Key::generate().unwrap().peer_id().to_bytes();
        trailing.push(0);
        assert!(PeerId::from_bytes(&trailing).is_none());
        assert!(PublicKey::from_bytes(&[1, 0, 0]).is_none());
        assert!(PublicKey::from_bytes(&[9; 33]).is_none());
    }

    #[test]
    fn signatures_verify_only_for_their_key() {
        let key = Key::generate().unwrap();
        let other = Key::generate().unwrap();
        let sig = key.sign(b"hello").unwrap();
        assert!(key.public_key().verify(b"hello", &sig));
        assert!(!key.public_key().verify(b"hellO", &sig));
        assert!(!other.public_key().verify(b"hello", &sig));
    }
}
