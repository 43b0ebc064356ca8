use std::sync::Arc;

use rcgen::KeyPair;
use ring::{
    rand::SystemRandom,
    signature::{self, EcdsaKeyPair, Ed25519KeyPair, KeyPair as _},
};

use crate::{Error, PeerId, PublicKey};

/// A key pair that identifies a peer, on either side of the handshake.
#[derive(Debug, Clone)]
pub struct Key {
    pub(crate) scheme: SigScheme,
    pub(crate) key: Arc<KeyPair>,
    signer: Arc<Signer>,
}

impl std::ops::Deref for Key {
    type Target = KeyPair;
    fn deref(&self) -> &Self::Target {
        &self.key
    }
}

#[derive(Debug)]
enum Signer {
    Ed25519(Ed25519KeyPair),
    Ecdsa(EcdsaKeyPair),
}

/// A signature scheme for generating and using a [`Key`].
///
/// Peers with different schemes interoperate: the scheme travels with the public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigScheme {
    /// Small keys using the [Ed25519](https://ed25519.cr.yp.to/) scheme.
    Ed25519,

    /// Keys using the [ECDSA] scheme and the NIST P-256 curve.
    ///
    /// [ECDSA]: https://en.wikipedia.org/wiki/Elliptic_Curve_Digital_Signature_Algorithm
    EcdsaP256,

    /// Keys using the [ECDSA] scheme and the NIST P-384 curve.
    ///
    /// [ECDSA]: https://en.wikipedia.org/wiki/Elliptic_Curve_Digital_Signature_Algorithm
    EcdsaP384,
}

impl SigScheme {
    pub(crate) fn rcgen(self) -> &'static rcgen::SignatureAlgorithm {
        match self {
            SigScheme::Ed25519 => &rcgen::PKCS_ED25519,
            SigScheme::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            SigScheme::EcdsaP384 => &rcgen::PKCS_ECDSA_P384_SHA384,
        }
    }

    pub(crate) fn verification(self) -> &'static dyn signature::VerificationAlgorithm {
        match self {
            SigScheme::Ed25519 => &signature::ED25519,
            SigScheme::EcdsaP256 => &signature::ECDSA_P256_SHA256_ASN1,
            SigScheme::EcdsaP384 => &signature::ECDSA_P384_SHA384_ASN1,
        }
    }

    /// Length of the raw public key for this scheme.
    pub(crate) fn public_key_len(self) -> usize {
        match self {
            SigScheme::Ed25519 => 32,
            SigScheme::EcdsaP256 => 65,
            SigScheme::EcdsaP384 => 97,
        }
    }

    pub(crate) fn tag(self) -> u8 {
        match self {
            SigScheme::Ed25519 => 1,
            SigScheme::EcdsaP256 => 2,
            SigScheme::EcdsaP384 => 3,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(SigScheme::Ed25519),
            2 => Some(SigScheme::EcdsaP256),
            3 => Some(SigScheme::EcdsaP384),
            _ => None,
        }
    }
}

impl Key {
    /// Generate a new random key using the default scheme.
    pub fn generate() -> Result<Self, Error> {
        Self::generate_for(SigScheme::Ed25519)
    }

    /// Generate a new random key using a particular scheme.
    pub fn generate_for(scheme: SigScheme) -> Result<Self, Error> {
        Self::load(KeyPair::generate_for(scheme.rcgen())?, scheme)
    }

    /// Load an existing key from a [`rcgen::KeyPair`].
    ///
    /// Fails if `scheme` doesn't match the keypair.
    pub fn load(key: KeyPair, scheme: SigScheme) -> Result<Self, Error> {
        if !key.compatible_algs().any(|alg| alg == scheme.rcgen()) {
            return Err(Error::IncompatibleKey(scheme));
        }

        let der = key.serialize_der();
        let signer = match scheme {
            SigScheme::Ed25519 => Signer::Ed25519(Ed25519KeyPair::from_pkcs8_maybe_unchecked(&der)?),
            SigScheme::EcdsaP256 => Signer::Ecdsa(EcdsaKeyPair::from_pkcs8(
                &signature::ECDSA_P256_SHA256_ASN1_SIGNING,
                &der,
                &SystemRandom::new(),
            )?),
            SigScheme::EcdsaP384 => Signer::Ecdsa(EcdsaKeyPair::from_pkcs8(
                &signature::ECDSA_P384_SHA384_ASN1_SIGNING,
                &der,
                &SystemRandom::new(),
            )?),
        };

        Ok(Self {
            scheme,
            key: Arc::new(key),
            signer: Arc::new(signer),
        })
    }

    /// The signature scheme of this key.
    pub fn scheme(&self) -> SigScheme {
        self.scheme
    }

    /// The public half of this key.
    pub fn public_key(&self) -> PublicKey {
        let raw = match &*self.signer {
            Signer::Ed25519(kp) => kp.public_key().as_ref(),
            Signer::Ecdsa(kp) => kp.public_key().as_ref(),
        };
        PublicKey::new_unchecked(self.scheme, raw.to_vec())
    }

    /// The peer ID derived from this key.
    pub fn peer_id(&self) -> PeerId {
        self.public_key().peer_id()
    }

    /// Sign a message with this key.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(match &*self.signer {
            Signer::Ed25519(kp) => kp.sign(message).as_ref().to_vec(),
            Signer::Ecdsa(kp) => kp.sign(&SystemRandom::new(), message)?.as_ref().to_vec(),
        })
    }
}
