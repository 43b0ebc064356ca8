use std::str::FromStr;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// A Kagi error.
///
/// Authentication failures are wrapped as [`Error::Auth`]; the rest are key handling, transport
/// and configuration errors.
#[derive(Debug, thiserror::Error)]
#[allow(missing_docs)]
pub enum Error {
    #[error("key error: {0}")]
    Key(#[from] rcgen::Error),

    #[error("key rejected: {0}")]
    KeyRejected(String),

    #[error("key pair is not compatible with {0:?}")]
    IncompatibleKey(crate::SigScheme),

    #[error("cryptographic operation failed")]
    Crypto,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("refusing to authenticate over plaintext without insecure_no_tls")]
    InsecureNoTls,

    #[error("no valid hostnames configured")]
    NoValidHostnames,

    #[error("{0} must be a positive number of milliseconds")]
    InvalidTtl(&'static str),

    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("bad response: {0}")]
    BadResponse(&'static str),

    #[error("no token for hostname {0}")]
    NoToken(String),
}

impl From<ring::error::KeyRejected> for Error {
    fn from(e: ring::error::KeyRejected) -> Self {
        Error::KeyRejected(e.to_string())
    }
}

impl From<ring::error::Unspecified> for Error {
    fn from(_: ring::error::Unspecified) -> Self {
        Error::Crypto
    }
}

/// Why an authentication step was refused.
///
/// These are deliberately coarse: the same kind is reported to the remote side, so they must not
/// tell an attacker more than "which step failed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum AuthError {
    /// The declared host is not one this server authenticates for.
    #[error("untrusted host")]
    UntrustedHost,

    /// A proof did not verify against the declared public key.
    #[error("invalid signature")]
    InvalidSignature,

    /// The challenge is older than the server accepts.
    #[error("challenge expired")]
    ChallengeExpired,

    /// The challenge was already consumed by an earlier proof.
    #[error("replayed challenge")]
    ReplayedChallenge,

    /// No bearer token was presented.
    #[error("missing token")]
    MissingToken,

    /// A bearer token could not be parsed or did not verify.
    #[error("malformed token")]
    MalformedToken,

    /// The bearer token is past its expiry.
    #[error("token expired")]
    TokenExpired,

    /// The token or challenge was issued for a different hostname.
    #[error("hostname mismatch")]
    HostnameMismatch,

    /// The server failed to prove its identity.
    #[error("server authentication failed")]
    ServerAuthFailed,

    /// The handshake message was missing fields or could not be parsed.
    #[error("malformed request")]
    MalformedRequest,
}

impl AuthError {
    /// Stable code used on the wire.
    pub fn code(self) -> &'static str {
        match self {
            AuthError::UntrustedHost => "untrusted-host",
            AuthError::InvalidSignature => "invalid-signature",
            AuthError::ChallengeExpired => "challenge-expired",
            AuthError::ReplayedChallenge => "replayed-challenge",
            AuthError::MissingToken => "missing-token",
            AuthError::MalformedToken => "malformed-token",
            AuthError::TokenExpired => "token-expired",
            AuthError::HostnameMismatch => "hostname-mismatch",
            AuthError::ServerAuthFailed => "server-auth-failed",
            AuthError::MalformedRequest => "malformed-request",
        }
    }

    /// HTTP status the server answers with.
    pub fn status(self) -> StatusCode {
        match self {
            AuthError::UntrustedHost | AuthError::HostnameMismatch | AuthError::MalformedRequest => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl FromStr for AuthError {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "untrusted-host" => AuthError::UntrustedHost,
            "invalid-signature" => AuthError::InvalidSignature,
            "challenge-expired" => AuthError::ChallengeExpired,
            "replayed-challenge" => AuthError::ReplayedChallenge,
            "missing-token" => AuthError::MissingToken,
            "malformed-token" => AuthError::MalformedToken,
            "token-expired" => AuthError::TokenExpired,
            "hostname-mismatch" => AuthError::HostnameMismatch,
            "server-auth-failed" => AuthError::ServerAuthFailed,
            "malformed-request" => AuthError::MalformedRequest,
            _ => return Err(()),
        })
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (self.status(), self.code()).into_response()
    }
}
