//! The `libp2p-PeerID` authentication header parameters.
//!
//! All handshake messages and bearer tokens travel as `libp2p-PeerID key="value", ...` in the
//! `Authorization`, `WWW-Authenticate` and `Authentication-Info` headers.

use base64::{Engine, engine::general_purpose::URL_SAFE};
use tracing::trace;

use crate::AuthError;

/// The authentication scheme identifier.
pub const PEER_ID_AUTH_SCHEME: &str = "libp2p-PeerID";

/// Longest header value we're willing to parse.
pub const MAX_AUTH_HEADER_SIZE: usize = 2048;

/// Parameters of a `libp2p-PeerID` header.
///
/// Unknown parameters are ignored when parsing; absent ones are omitted when encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthParams {
    /// Challenge issued by the server, for the client to sign.
    pub challenge_client: Option<String>,

    /// Challenge issued by the client, for the server to sign.
    pub challenge_server: Option<String>,

    /// Server-sealed state binding the client challenge to a hostname and time.
    pub opaque: Option<String>,

    /// The sender's public key.
    pub public_key: Option<String>,

    /// The sender's signature.
    pub sig: Option<String>,

    /// A bearer token.
    pub bearer: Option<String>,
}

impl AuthParams {
    /// Parse a header value.
    pub fn parse(header: &str) -> Result<Self, AuthError> {
        if header.len() > MAX_AUTH_HEADER_SIZE {
            return Err(AuthError::MalformedRequest);
        }

        let rest = header
            .trim()
            .strip_prefix(PEER_ID_AUTH_SCHEME)
            .ok_or(AuthError::MalformedRequest)?;
        if !(rest.is_empty() || rest.starts_with(' ')) {
            return Err(AuthError::MalformedRequest);
        }

        let mut params = Self::default();
        for pair in rest.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or(AuthError::MalformedRequest)?;
            let value = unquote(value.trim()).ok_or(AuthError::MalformedRequest)?;

            let slot = match key.trim() {
                "challenge-client" => &mut params.challenge_client,
                "challenge-server" => &mut params.challenge_server,
                "opaque" => &mut params.opaque,
                "public-key" => &mut params.public_key,
                "sig" => &mut params.sig,
                "bearer" => &mut params.bearer,
                other => {
                    trace!(param = other, "ignoring unknown auth parameter");
                    continue;
                }
            };

            if slot.replace(value.to_string()).is_some() {
                return Err(AuthError::MalformedRequest);
            }
        }

        Ok(params)
    }

    /// Encode to a header value.
    pub fn encode(&self) -> String {
        let fields = [
            ("bearer", &self.bearer),
            ("challenge-client", &self.challenge_client),
            ("challenge-server", &self.challenge_server),
            ("opaque", &self.opaque),
            ("public-key", &self.public_key),
            ("sig", &self.sig),
        ];

        let encoded = fields
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| format!("{k}=\"{v}\"")))
            .collect::<Vec<_>>()
            .join(", ");

        if encoded.is_empty() {
            PEER_ID_AUTH_SCHEME.to_string()
        } else {
            format!("{PEER_ID_AUTH_SCHEME} {encoded}")
        }
    }

    /// Parameters carrying only a bearer token.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            bearer: Some(token.into()),
            ..Default::default()
        }
    }
}

fn unquote(value: &str) -> Option<&str> {
    match value.strip_prefix('"') {
        Some(inner) => inner.strip_suffix('"').filter(|v| !v.contains('"')),
        None if !value.contains('"') => Some(value),
        None => None,
    }
}

pub(crate) fn encode_b64(bytes: &[u8]) -> String {
    URL_SAFE.encode(bytes)
}

pub(crate) fn decode_b64(value: &str) -> Option<Vec<u8>> {
    URL_SAFE.decode(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_and_bare_values() {
        let params = AuthParams::parse(
            r#"libp2p-PeerID challenge-client="AAAA==", opaque=xyz, sig="c2ln""#,
        )
        .unwrap();
        assert_eq!(params.challenge_client.as_deref(), Some("AAAA=="));
        assert_eq!(params.opaque.as_deref(), Some("xyz"));
        assert_eq!(params.sig.as_deref(), Some("c2ln"));
        assert_eq!(params.bearer, None);
    }

    #[test]
    fn encoding_parses_back() {
        let params = AuthParams {
            challenge_server: Some("Zm9vYmFy".into()),
            public_key: Some("AQID".into()),
            ..Default::default()
        };
        let header = params.encode();
        assert!(header.starts_with("libp2p-PeerID "));
        assert_eq!(AuthParams::parse(&header).unwrap(), params);
    }

    #[test]
    fn bare_scheme_is_empty() {
        assert_eq!(AuthParams::parse("libp2p-PeerID").unwrap(), AuthParams::default());
        assert_eq!(AuthParams::default().encode(), "libp2p-PeerID");
    }

    #[test]
    fn ignores_unknown_parameters() {
        let params = AuthParams::parse(r#"libp2p-PeerID future="1", bearer="tok""#).unwrap();
        assert_eq!(params, AuthParams::bearer("tok"));
    }

    #[test]
    fn rejects_other_schemes() {
        assert_eq!(
            AuthParams::parse(r#"Bearer abc"#),
            Err(AuthError::MalformedRequest)
        );
        assert_eq!(
            AuthParams::parse(r#"libp2p-PeerIDX bearer="abc""#),
            Err(AuthError::MalformedRequest)
        );
    }

    #[test]
    fn rejects_duplicates() {
        assert_eq!(
            AuthParams::parse(r#"libp2p-PeerID sig="a", sig="b""#),
            Err(AuthError::MalformedRequest)
        );
    }

    #[test]
    fn rejects_broken_quoting() {
        assert_eq!(
            AuthParams::parse(r#"libp2p-PeerID sig="a"#),
            Err(AuthError::MalformedRequest)
        );
        assert_eq!(
            AuthParams::parse(r#"libp2p-PeerID sig"#),
            Err(AuthError::MalformedRequest)
        );
    }

    #[test]
    fn rejects_oversized_headers() {
        let header = format!(r#"libp2p-PeerID opaque="{}""#, "a".repeat(MAX_AUTH_HEADER_SIZE));
        assert_eq!(AuthParams::parse(&header), Err(AuthError::MalformedRequest));
    }
}
