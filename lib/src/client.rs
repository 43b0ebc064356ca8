use std::collections::HashMap;

use parking_lot::Mutex;
use reqwest::{
    Response, StatusCode,
    header::{AUTHORIZATION, HOST, HeaderValue, WWW_AUTHENTICATE},
};
use ring::rand::{SecureRandom, SystemRandom};
use tracing::{debug, info, trace};
use url::Url;

use crate::{
    AuthError, Error, Key, PeerId, PublicKey,
    params::{AuthParams, decode_b64, encode_b64},
    server::{AUTHENTICATION_INFO, DEFAULT_AUTH_PATH, HTTP_PEER_ID_AUTH_PROTO},
    signing,
    well_known::fetch_protocols,
};

const CHALLENGE_LEN: usize = 32;

/// The client side of peer ID authentication.
///
/// Runs the handshake against a server, verifies the server's identity, and keeps the bearer
/// tokens it is issued (one per hostname) for use on later requests.
#[derive(Debug)]
pub struct ClientPeerIdAuth {
    key: Key,
    http: reqwest::Client,
    tokens: Mutex<HashMap<String, String>>,
}

/// What the server proved about itself so far.
#[derive(Debug)]
struct ServerProof {
    public_key: PublicKey,
    verified: bool,
}

impl ClientPeerIdAuth {
    /// Create a client authenticator with a default HTTP client.
    pub fn new(key: Key) -> Self {
        Self::with_client(key, reqwest::Client::new())
    }

    /// Create a client authenticator using an existing HTTP client.
    pub fn with_client(key: Key, http: reqwest::Client) -> Self {
        Self {
            key,
            http,
            tokens: Default::default(),
        }
    }

    /// This client's peer ID.
    pub fn peer_id(&self) -> PeerId {
        self.key.peer_id()
    }

    /// The HTTP client used for handshakes.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Authenticate with the server at `auth_url`, trusting whichever identity it proves.
    ///
    /// `hostname` is sent as the `Host` and bound into both proofs. On success the bearer token
    /// is stored for `hostname` and the server's verified peer ID is returned.
    pub async fn mutual_auth(&self, auth_url: &Url, hostname: &str) -> Result<PeerId, Error> {
        self.handshake(auth_url, hostname, None).await
    }

    /// Authenticate with the server at `auth_url`, requiring it to prove it is `expected`.
    pub async fn mutual_auth_expecting(
        &self,
        auth_url: &Url,
        hostname: &str,
        expected: &PeerId,
    ) -> Result<PeerId, Error> {
        self.handshake(auth_url, hostname, Some(expected)).await
    }

    /// Authenticate with the server at `base`, finding the endpoint through discovery.
    ///
    /// Falls back to [`DEFAULT_AUTH_PATH`] if the server doesn't advertise the protocol.
    pub async fn mutual_auth_discovered(&self, base: &Url, hostname: &str) -> Result<PeerId, Error> {
        let path = match fetch_protocols(&self.http, base).await {
            Ok(protocols) => protocols
                .get(HTTP_PEER_ID_AUTH_PROTO)
                .map(|meta| meta.path.clone()),
            Err(err) => {
                debug!(%err, "protocol discovery failed");
                None
            }
        }
        .unwrap_or_else(|| DEFAULT_AUTH_PATH.into());

        let url = base
            .join(&path)
            .map_err(|_| Error::BadResponse("invalid auth path"))?;
        self.mutual_auth(&url, hostname).await
    }

    async fn handshake(
        &self,
        url: &Url,
        hostname: &str,
        expected: Option<&PeerId>,
    ) -> Result<PeerId, Error> {
        let my_key = self.key.public_key().to_bytes();

        let challenge_server = random_challenge()?;
        let resp = self
            .send(
                url,
                hostname,
                AuthParams {
                    challenge_server: Some(challenge_server.clone()),
                    ..Default::default()
                },
            )
            .await?;
        let challenge = expect_header(resp, StatusCode::UNAUTHORIZED, WWW_AUTHENTICATE.as_str())
            .await?;
        let (Some(challenge_client), Some(opaque)) = (challenge.challenge_client, challenge.opaque)
        else {
            return Err(Error::BadResponse("challenge missing parameters"));
        };

        let server = server_proof(
            challenge.public_key.as_deref(),
            challenge.sig.as_deref(),
            &signing::server_parts(&challenge_server, hostname, None),
        )?;
        if server.verified {
            check_expected(&server.public_key, expected)?;
            debug!(server = %server.public_key.peer_id(), "server proved identity first");
        }

        let server_key = server.public_key.to_bytes();
        let parts = signing::client_parts(&challenge_client, hostname, &server_key);
        let sig = signing::sign(&self.key, &parts)?;

        // server-last: ask again, now that the server knows who we are
        let late_challenge = if server.verified {
            None
        } else {
            Some(random_challenge()?)
        };

        let resp = self
            .send(
                url,
                hostname,
                AuthParams {
                    challenge_server: late_challenge.clone(),
                    opaque: Some(opaque),
                    public_key: Some(encode_b64(&my_key)),
                    sig: Some(encode_b64(&sig)),
                    ..Default::default()
                },
            )
            .await?;
        let info = expect_header(resp, StatusCode::OK, AUTHENTICATION_INFO).await?;

        if let Some(late_challenge) = late_challenge {
            let late = server_proof(
                info.public_key.as_deref(),
                info.sig.as_deref(),
                &signing::server_parts(&late_challenge, hostname, Some(my_key.as_slice())),
            )?;
            if !late.verified || late.public_key != server.public_key {
                debug!("server proof missing from authentication info");
                return Err(AuthError::ServerAuthFailed.into());
            }
            check_expected(&late.public_key, expected)?;
        }

        let token = info
            .bearer
            .ok_or(Error::BadResponse("no bearer token issued"))?;
        self.tokens.lock().insert(hostname.into(), token);

        let peer_id = server.public_key.peer_id();
        info!(server = %peer_id, %hostname, "mutual authentication complete");
        Ok(peer_id)
    }

    async fn send(&self, url: &Url, hostname: &str, params: AuthParams) -> Result<Response, Error> {
        let header = params.encode();
        trace!(%url, %header, "sending authorization");
        Ok(self
            .http
            .post(url.clone())
            .header(HOST, hostname)
            .header(AUTHORIZATION, header)
            .send()
            .await?)
    }

    /// The stored bearer token for `hostname`.
    pub fn token(&self, hostname: &str) -> Option<String> {
        self.tokens.lock().get(hostname).cloned()
    }

    /// The `Authorization` header value carrying the token for `hostname`.
    pub fn bearer_header(&self, hostname: &str) -> Option<String> {
        self.token(hostname)
            .map(|token| AuthParams::bearer(token).encode())
    }

    /// Forget the token for `hostname`.
    pub fn clear_token(&self, hostname: &str) -> Option<String> {
        self.tokens.lock().remove(hostname)
    }

    /// Attach the stored bearer token to a request, by the hostname of its URL.
    pub fn add_auth_token(&self, request: &mut reqwest::Request) -> Result<(), Error> {
        let hostname =
            hostname_for(request.url()).ok_or(Error::BadResponse("request url has no host"))?;
        let header = self
            .bearer_header(&hostname)
            .ok_or_else(|| Error::NoToken(hostname))?;

        request
            .headers_mut()
            .insert(AUTHORIZATION, HeaderValue::try_from(header)?);
        Ok(())
    }
}

/// The hostname a request to `url` declares: the host, with the port unless it's the default.
pub fn hostname_for(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn random_challenge() -> Result<String, Error> {
    let mut challenge = [0; CHALLENGE_LEN];
    SystemRandom::new().fill(&mut challenge)?;
    Ok(encode_b64(&challenge))
}

/// Decode the server's key, and check its signature if it sent one.
fn server_proof(
    public_key: Option<&str>,
    sig: Option<&str>,
    parts: &[signing::Part<'_>],
) -> Result<ServerProof, Error> {
    let public_key = public_key
        .and_then(decode_b64)
        .and_then(|bytes| PublicKey::from_bytes(&bytes))
        .ok_or(AuthError::ServerAuthFailed)?;

    let verified = match sig {
        None => false,
        Some(sig) => {
            let sig = decode_b64(sig).ok_or(AuthError::ServerAuthFailed)?;
            if !signing::verify(&public_key, parts, &sig) {
                debug!("server proof did not verify");
                return Err(AuthError::ServerAuthFailed.into());
            }
            true
        }
    };

    Ok(ServerProof {
        public_key,
        verified,
    })
}

fn check_expected(server: &PublicKey, expected: Option<&PeerId>) -> Result<(), Error> {
    match expected {
        Some(expected) if !expected.matches(server) => {
            debug!(%expected, got = %server.peer_id(), "server is not the expected peer");
            Err(AuthError::ServerAuthFailed.into())
        }
        _ => Ok(()),
    }
}

/// Check the response status, and parse the named auth header.
///
/// Error statuses carrying an auth error code are returned as that [`AuthError`].
async fn expect_header(resp: Response, status: StatusCode, name: &str) -> Result<AuthParams, Error> {
    if resp.status() != status {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(match body.parse::<AuthError>() {
            Ok(err) => err.into(),
            Err(()) => Error::UnexpectedStatus {
                status: status.as_u16(),
                body,
            },
        });
    }

    let header = resp
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .ok_or(Error::BadResponse("missing auth header"))?;
    trace!(%name, %header, "received");

    AuthParams::parse(header).map_err(|_| Error::BadResponse("malformed auth header"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_omits_default_ports() {
        let url = |s: &str| Url::parse(s).unwrap();
        assert_eq!(
            hostname_for(&url("http://localhost:8001/x")).as_deref(),
            Some("localhost:8001")
        );
        assert_eq!(
            hostname_for(&url("http://example.com:80/")).as_deref(),
            Some("example.com")
        );
        assert_eq!(
            hostname_for(&url("https://example.com/")).as_deref(),
            Some("example.com")
        );
        assert_eq!(hostname_for(&url("data:text/plain,hi")), None);
    }

    #[test]
    fn server_proof_requires_a_valid_key() {
        let parts = signing::server_parts("c", "h", None);
        assert!(matches!(
            server_proof(None, None, &parts),
            Err(Error::Auth(AuthError::ServerAuthFailed))
        ));
        assert!(matches!(
            server_proof(Some("not base64!"), None, &parts),
            Err(Error::Auth(AuthError::ServerAuthFailed))
        ));
    }

    #[test]
    fn server_proof_checks_signatures() {
        let server = Key::generate().unwrap();
        let other = Key::generate().unwrap();
        let parts = signing::server_parts("challenge", "example.com", None);
        let key = encode_b64(&server.public_key().to_bytes());

        let good = encode_b64(&signing::sign(&server, &parts).unwrap());
        let proof = server_proof(Some(&key), Some(&good), &parts).unwrap();
        assert!(proof.verified);
        assert_eq!(proof.public_key, server.public_key());

        let bad = encode_b64(&signing::sign(&other, &parts).unwrap());
        assert!(server_proof(Some(&key), Some(&bad), &parts).is_err());

        let unproven = server_proof(Some(&key), None, &parts).unwrap();
        assert!(!unproven.verified);
    }

    #[test]
    fn tokens_attach_by_url_hostname() {
        let client = ClientPeerIdAuth::new(Key::generate().unwrap());
        client
            .tokens
            .lock()
            .insert("localhost:8001".into(), "tok".into());

        let mut req = reqwest::Request::new(
            reqwest::Method::GET,
            Url::parse("http://localhost:8001/log-my-id").unwrap(),
        );
        client.add_auth_token(&mut req).unwrap();
        assert_eq!(
            req.headers().get(AUTHORIZATION).unwrap(),
            "libp2p-PeerID bearer=\"tok\""
        );

        let mut other = reqwest::Request::new(
            reqwest::Method::GET,
            Url::parse("http://localhost:9000/").unwrap(),
        );
        assert!(matches!(
            client.add_auth_token(&mut other),
            Err(Error::NoToken(h)) if h == "localhost:9000"
        ));
    }
}
