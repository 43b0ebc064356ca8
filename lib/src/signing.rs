//! Canonical payloads for handshake signatures.
//!
//! A payload is the scheme name followed by each `key=value` part, sorted by key, each prefixed
//! with its length as an unsigned varint. Client and server proofs sign disjoint sets of keys so
//! that one can never stand in for the other.

use crate::{Error, Key, PublicKey, params::PEER_ID_AUTH_SCHEME};

/// One `key=value` part of a signed payload.
pub(crate) type Part<'a> = (&'a str, &'a [u8]);

pub(crate) fn data_to_sign(parts: &[Part<'_>]) -> Vec<u8> {
    let mut parts = parts.to_vec();
    parts.sort_by(|a, b| a.0.cmp(b.0));

    let mut out = PEER_ID_AUTH_SCHEME.as_bytes().to_vec();
    let mut buf = unsigned_varint::encode::usize_buffer();
    for (key, value) in parts {
        let len = key.len() + 1 + value.len();
        out.extend_from_slice(unsigned_varint::encode::usize(len, &mut buf));
        out.extend_from_slice(key.as_bytes());
        out.push(b'=');
        out.extend_from_slice(value);
    }
    out
}

pub(crate) fn sign(key: &Key, parts: &[Part<'_>]) -> Result<Vec<u8>, Error> {
    key.sign(&data_to_sign(parts))
}

pub(crate) fn verify(key: &PublicKey, parts: &[Part<'_>], sig: &[u8]) -> bool {
    key.verify(&data_to_sign(parts), sig)
}

/// Parts of the client's proof over the server-issued challenge.
pub(crate) fn client_parts<'a>(
    challenge_client: &'a str,
    hostname: &'a str,
    server_public_key: &'a [u8],
) -> [Part<'a>; 3] {
    [
        ("challenge-client", challenge_client.as_bytes()),
        ("hostname", hostname.as_bytes()),
        ("server-public-key", server_public_key),
    ]
}

/// Parts of the server's proof over the client-issued challenge.
///
/// The client's public key is only bound when the server already knows it, i.e. when the
/// client sent its challenge in the second round.
pub(crate) fn server_parts<'a>(
    challenge_server: &'a str,
    hostname: &'a str,
    client_public_key: Option<&'a [u8]>,
) -> Vec<Part<'a>> {
    let mut parts = vec![
        ("challenge-server", challenge_server.as_bytes()),
        ("hostname", hostname.as_bytes()),
    ];
    if let Some(key) = client_public_key {
        parts.push(("client-public-key", key));
    }
    parts
}
