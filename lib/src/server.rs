use std::{collections::HashSet, sync::Arc};

use axum::{
    Router,
    extract::State,
    http::{
        HeaderMap, StatusCode, Uri,
        header::{AUTHORIZATION, HOST, WWW_AUTHENTICATE},
    },
    response::{IntoResponse, Response},
    routing::{MethodRouter, any},
};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::{debug, error, info, warn};

use crate::{
    AuthError, Error, Key, PeerId, PublicKey,
    challenge::{ChallengeCache, ClaimError},
    params::{AuthParams, decode_b64, encode_b64},
    sealed::{self, BEARER_DOMAIN, OPAQUE_DOMAIN},
    signing,
};

/// Protocol identifier of the peer ID authentication endpoint.
pub const HTTP_PEER_ID_AUTH_PROTO: &str = "/http-peer-id-auth/1.0.0";

/// Where the authentication endpoint lives when discovery doesn't say otherwise.
pub const DEFAULT_AUTH_PATH: &str = "/auth";

/// How long bearer tokens are valid for by default.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::HOUR;

/// How long a client has to answer a challenge by default.
pub const DEFAULT_CHALLENGE_TTL: Duration = Duration::minutes(5);

/// Header carrying the server's proof and the bearer token on success.
pub const AUTHENTICATION_INFO: &str = "authentication-info";

const CHALLENGE_LEN: usize = 32;

/// Shortest challenge a client may ask the server to sign.
const MIN_CHALLENGE_SERVER_LEN: usize = 32;

/// How requests reach the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Transport {
    /// Plain HTTP: handshakes and tokens are visible on the wire.
    #[default]
    Plaintext,

    /// TLS is terminated in front of this server.
    Tls,
}

/// Options for a [`ServerPeerIdAuth`].
///
/// Validated once by [`ServerPeerIdAuth::new()`], and immutable afterwards.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// How long issued bearer tokens are valid for. Defaults to one hour.
    pub token_ttl: Duration,

    /// How long a client has to answer a challenge. Defaults to five minutes.
    pub challenge_ttl: Duration,

    /// Acknowledge that authentication runs over an unencrypted channel.
    ///
    /// Required when `transport` is [`Transport::Plaintext`]: bearer tokens sent in the clear
    /// can be stolen and replayed by anyone on the path until they expire.
    pub insecure_no_tls: bool,

    /// How requests reach the server. Defaults to plaintext.
    pub transport: Transport,

    /// `Host` values this server authenticates for.
    ///
    /// Requests declaring any other host are refused before any challenge is issued, so the
    /// server can't be used to sign proofs for somebody else's hostname.
    pub valid_hostnames: HashSet<String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            token_ttl: DEFAULT_TOKEN_TTL,
            challenge_ttl: DEFAULT_CHALLENGE_TTL,
            insecure_no_tls: false,
            transport: Transport::default(),
            valid_hostnames: HashSet::new(),
        }
    }
}

impl ServerOptions {
    /// Default options accepting the given hostnames.
    pub fn with_hostnames<S: Into<String>>(hostnames: impl IntoIterator<Item = S>) -> Self {
        Self {
            valid_hostnames: hostnames.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// Outcome of one request to the authentication endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    /// A fresh challenge, sent as `401` with `WWW-Authenticate`.
    Challenge(AuthParams),

    /// The client proved its identity; `info` carries the bearer token (and the server's proof
    /// if the client asked for it late), sent as `200` with `Authentication-Info`.
    Authenticated {
        /// The client's verified identity.
        peer_id: PeerId,
        /// Parameters for the `Authentication-Info` header.
        info: AuthParams,
    },

    /// The request carried a valid bearer token.
    TokenValid(PeerId),
}

#[derive(Debug, Serialize, Deserialize)]
struct Opaque {
    challenge: String,
    hostname: String,
    created_at: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct BearerToken {
    peer: PeerId,
    hostname: String,
    issued_at: i64,
    expires_at: i64,
}

/// The server side of peer ID authentication.
///
/// Mount it with [`router()`](Self::router) or [`method_router()`](Self::method_router) (or via
/// [`HttpHost`](crate::HttpHost)), then call [`unwrap_bearer_token()`](Self::unwrap_bearer_token)
/// from protected handlers to learn who is calling.
#[derive(Debug)]
pub struct ServerPeerIdAuth {
    key: Key,
    public_key: PublicKey,
    public_key_b64: String,
    options: ServerOptions,
    token_ttl_ms: i64,
    challenge_ttl_ms: i64,
    challenges: ChallengeCache,
}

impl ServerPeerIdAuth {
    /// Create the authenticator, validating its options.
    pub fn new(key: Key, options: ServerOptions) -> Result<Self, Error> {
        if options.valid_hostnames.is_empty() {
            return Err(Error::NoValidHostnames);
        }

        if options.transport == Transport::Plaintext {
            if !options.insecure_no_tls {
                return Err(Error::InsecureNoTls);
            }
            warn!("peer id auth running without TLS: bearer tokens travel in the clear");
        }

        let token_ttl_ms = ttl_millis(options.token_ttl, "token_ttl")?;
        let challenge_ttl_ms = ttl_millis(options.challenge_ttl, "challenge_ttl")?;

        let public_key = key.public_key();
        Ok(Self {
            public_key_b64: encode_b64(&public_key.to_bytes()),
            public_key,
            token_ttl_ms,
            challenge_ttl_ms,
            challenges: ChallengeCache::new(options.challenge_ttl),
            options,
            key,
        })
    }

    /// This server's peer ID.
    pub fn peer_id(&self) -> PeerId {
        self.public_key.peer_id()
    }

    /// The options this server runs with.
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Number of consumed challenges currently remembered for replay protection.
    pub fn consumed_challenges(&self) -> usize {
        self.challenges.len()
    }

    /// Run one step of the handshake for a request declaring `hostname`.
    ///
    /// `authorization` is the value of the `Authorization` header, if any.
    pub fn authenticate(
        &self,
        hostname: &str,
        authorization: Option<&str>,
    ) -> Result<Handshake, Error> {
        self.authenticate_at(hostname, authorization, now_millis())
    }

    fn authenticate_at(
        &self,
        hostname: &str,
        authorization: Option<&str>,
        now: i64,
    ) -> Result<Handshake, Error> {
        if !self.options.valid_hostnames.contains(hostname) {
            debug!(%hostname, "rejecting untrusted host");
            return Err(AuthError::UntrustedHost.into());
        }

        let Some(header) = authorization.filter(|h| !h.trim().is_empty()) else {
            return self.issue_challenge(hostname, None, now);
        };

        let params = AuthParams::parse(header)?;
        if let Some(token) = &params.bearer {
            return Ok(Handshake::TokenValid(
                self.verify_bearer(token, hostname, now)?,
            ));
        }

        match &params.opaque {
            None => self.issue_challenge(hostname, params.challenge_server.as_deref(), now),
            Some(opaque) => self.verify_client(hostname, &params, opaque, now),
        }
    }

    fn issue_challenge(
        &self,
        hostname: &str,
        challenge_server: Option<&str>,
        now: i64,
    ) -> Result<Handshake, Error> {
        let mut challenge = [0; CHALLENGE_LEN];
        SystemRandom::new().fill(&mut challenge)?;
        let challenge = encode_b64(&challenge);

        let opaque = sealed::seal(
            &self.key,
            OPAQUE_DOMAIN,
            &Opaque {
                challenge: challenge.clone(),
                hostname: hostname.into(),
                created_at: now,
            },
        )?;

        // the key goes out even without a proof, so server-last clients can bind to it
        let mut params = AuthParams {
            challenge_client: Some(challenge),
            opaque: Some(opaque),
            public_key: Some(self.public_key_b64.clone()),
            ..Default::default()
        };

        if let Some(challenge_server) = challenge_server {
            self.prove(&mut params, challenge_server, hostname, None)?;
        }

        debug!(%hostname, proof = challenge_server.is_some(), "issued challenge");
        Ok(Handshake::Challenge(params))
    }

    fn verify_client(
        &self,
        hostname: &str,
        params: &AuthParams,
        opaque: &str,
        now: i64,
    ) -> Result<Handshake, Error> {
        let (Some(sig), Some(public_key)) = (&params.sig, &params.public_key) else {
            return Err(AuthError::MalformedRequest.into());
        };
        let client_key = decode_b64(public_key)
            .and_then(|bytes| PublicKey::from_bytes(&bytes))
            .ok_or(AuthError::MalformedRequest)?;
        let sig = decode_b64(sig).ok_or(AuthError::MalformedRequest)?;

        let opaque: Opaque = sealed::unseal(&self.public_key, OPAQUE_DOMAIN, opaque)
            .ok_or(AuthError::MalformedRequest)?;
        if opaque.hostname != hostname {
            debug!(%hostname, issued_for = %opaque.hostname, "challenge hostname mismatch");
            return Err(AuthError::HostnameMismatch.into());
        }
        let age = now.saturating_sub(opaque.created_at);
        if age > self.challenge_ttl_ms {
            debug!(%hostname, "challenge expired");
            return Err(AuthError::ChallengeExpired.into());
        }

        let server_key = self.public_key.to_bytes();
        let parts = signing::client_parts(&opaque.challenge, hostname, &server_key);
        if !signing::verify(&client_key, &parts, &sig) {
            debug!(%hostname, "client proof did not verify");
            return Err(AuthError::InvalidSignature.into());
        }

        // only verified proofs may occupy the cache
        self.challenges
            .try_claim(opaque.challenge.as_bytes(), opaque.created_at)
            .map_err(|err| match err {
                ClaimError::Replayed => AuthError::ReplayedChallenge,
                ClaimError::Expired => AuthError::ChallengeExpired,
            })?;

        let peer_id = client_key.peer_id();
        let mut info = AuthParams::bearer(self.mint_token(&peer_id, hostname, now)?);
        if let Some(challenge_server) = &params.challenge_server {
            self.prove(
                &mut info,
                challenge_server,
                hostname,
                Some(client_key.to_bytes().as_slice()),
            )?;
        }

        info!(peer = %peer_id, %hostname, "peer authenticated");
        Ok(Handshake::Authenticated { peer_id, info })
    }

    fn prove(
        &self,
        params: &mut AuthParams,
        challenge_server: &str,
        hostname: &str,
        client_key: Option<&[u8]>,
    ) -> Result<(), Error> {
        if challenge_server.len() < MIN_CHALLENGE_SERVER_LEN {
            return Err(AuthError::MalformedRequest.into());
        }

        let parts = signing::server_parts(challenge_server, hostname, client_key);
        let sig = signing::sign(&self.key, &parts)?;
        params.public_key = Some(self.public_key_b64.clone());
        params.sig = Some(encode_b64(&sig));
        Ok(())
    }

    fn mint_token(&self, peer: &PeerId, hostname: &str, now: i64) -> Result<String, Error> {
        sealed::seal(
            &self.key,
            BEARER_DOMAIN,
            &BearerToken {
                peer: peer.clone(),
                hostname: hostname.into(),
                issued_at: now,
                expires_at: now.saturating_add(self.token_ttl_ms),
            },
        )
    }

    fn verify_bearer(&self, token: &str, hostname: &str, now: i64) -> Result<PeerId, AuthError> {
        let token: BearerToken = sealed::unseal(&self.public_key, BEARER_DOMAIN, token)
            .ok_or(AuthError::MalformedToken)?;
        if token.hostname != hostname {
            return Err(AuthError::HostnameMismatch);
        }
        if now >= token.expires_at {
            return Err(AuthError::TokenExpired);
        }

        Ok(token.peer)
    }

    /// Check the bearer token presented in a request, returning the caller's peer ID.
    ///
    /// `hostname` is the host the protected endpoint is served as; tokens issued for any other
    /// host are refused. Treat any error as "unauthenticated".
    pub fn unwrap_bearer_token(
        &self,
        headers: &HeaderMap,
        hostname: &str,
    ) -> Result<PeerId, AuthError> {
        let header = headers
            .get(AUTHORIZATION)
            .map(|value| value.to_str().map_err(|_| AuthError::MalformedToken));
        self.unwrap_bearer_at(header.transpose()?, hostname, now_millis())
    }

    fn unwrap_bearer_at(
        &self,
        authorization: Option<&str>,
        hostname: &str,
        now: i64,
    ) -> Result<PeerId, AuthError> {
        let header = authorization.ok_or(AuthError::MissingToken)?;
        let token = AuthParams::parse(header)
            .ok()
            .and_then(|params| params.bearer)
            .ok_or(AuthError::MalformedToken)?;

        self.verify_bearer(&token, hostname, now).inspect_err(|err| {
            debug!(%hostname, %err, "refused bearer token");
        })
    }

    /// A method router for the authentication endpoint.
    pub fn method_router<S>(self: Arc<Self>) -> MethodRouter<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        any(handle_auth).with_state(self)
    }

    /// A router serving the authentication endpoint at `path`.
    pub fn router(self: Arc<Self>, path: &str) -> Router {
        Router::new().route(path, self.method_router())
    }
}

async fn handle_auth(
    State(auth): State<Arc<ServerPeerIdAuth>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let hostname = request_hostname(&headers, &uri).unwrap_or_default();
    let authorization = match headers.get(AUTHORIZATION).map(|v| v.to_str()).transpose() {
        Ok(authorization) => authorization,
        Err(_) => {
            debug!(%hostname, "authorization header is not valid text");
            return AuthError::MalformedRequest.into_response();
        }
    };

    match auth.authenticate(&hostname, authorization) {
        Ok(Handshake::Challenge(params)) => {
            (StatusCode::UNAUTHORIZED, [(WWW_AUTHENTICATE, params.encode())]).into_response()
        }
        Ok(Handshake::Authenticated { info, .. }) => {
            (StatusCode::OK, [(AUTHENTICATION_INFO, info.encode())]).into_response()
        }
        Ok(Handshake::TokenValid(_)) => StatusCode::OK.into_response(),
        Err(Error::Auth(err)) => err.into_response(),
        Err(err) => {
            error!(%err, "authentication endpoint failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// The hostname a request declares: its `Host` header, or failing that the URI authority.
pub fn request_hostname(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|a| a.as_str().to_string()))
        .filter(|h| !h.is_empty())
}

/// A TTL in whole milliseconds, which must be positive and fit in an `i64`.
fn ttl_millis(ttl: Duration, name: &'static str) -> Result<i64, Error> {
    i64::try_from(ttl.whole_milliseconds())
        .ok()
        .filter(|ms| *ms > 0)
        .ok_or(Error::InvalidTtl(name))
}

pub(crate) fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
