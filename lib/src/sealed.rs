//! Server-sealed blobs: `base64url(json) "." base64url(signature)`.
//!
//! The server signs `domain || json` with its own key, so it can later hand the blob back to
//! itself through the client without keeping any state. The domain label stops a blob sealed
//! for one purpose (a challenge) from being accepted for another (a bearer token).

use serde::{Serialize, de::DeserializeOwned};

use crate::{
    Error, Key, PublicKey,
    params::{decode_b64, encode_b64},
};

pub(crate) const OPAQUE_DOMAIN: &str = "kagi-opaque";
pub(crate) const BEARER_DOMAIN: &str = "kagi-bearer";

fn signed_bytes(domain: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(domain.len() + 1 + payload.len());
    out.extend_from_slice(domain.as_bytes());
    out.push(0);
    out.extend_from_slice(payload);
    out
}

pub(crate) fn seal<T: Serialize>(key: &Key, domain: &str, value: &T) -> Result<String, Error> {
    let payload = serde_json::to_vec(value)?;
    let sig = key.sign(&signed_bytes(domain, &payload))?;
    Ok(format!("{}.{}", encode_b64(&payload), encode_b64(&sig)))
}

/// Returns `None` for anything that isn't a well-formed blob signed by `key` for `domain`.
pub(crate) fn unseal<T: DeserializeOwned>(key: &PublicKey, domain: &str, sealed: &str) -> Option<T> {
    let (payload, sig) = sealed.split_once('.')?;
    let payload = decode_b64(payload)?;
    let sig = decode_b64(sig)?;
    if !key.verify(&signed_bytes(domain, &payload), &sig) {
        return None;
    }

    serde_json::from_slice(&payload).ok()
}
