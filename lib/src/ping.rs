//! The HTTP ping protocol: the client POSTs 32 random bytes, the server echoes them back.

use std::time::{Duration, Instant};

use axum::{
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::{MethodRouter, post},
};
use bytes::Bytes;
use ring::rand::{SecureRandom, SystemRandom};
use tracing::{debug, trace};
use url::Url;

use crate::{Error, well_known::fetch_protocols};

/// Protocol identifier of the ping endpoint.
pub const PING_PROTOCOL_ID: &str = "/http-ping/1";

/// Where the ping endpoint lives when discovery doesn't say otherwise.
pub const DEFAULT_PING_PATH: &str = "/ping";

/// Exact size of a ping body.
pub const PING_SIZE: usize = 32;

/// A method router answering pings.
pub fn ping_router<S>() -> MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    post(serve_ping)
}

async fn serve_ping(body: Bytes) -> Response {
    if body.len() != PING_SIZE {
        trace!(len = body.len(), "refusing ping of wrong size");
        return StatusCode::BAD_REQUEST.into_response();
    }

    ([(CONTENT_TYPE, "application/octet-stream")], body).into_response()
}

/// Ping the endpoint at `url`, returning the round-trip time.
pub async fn ping(client: &reqwest::Client, url: &Url) -> Result<Duration, Error> {
    let mut payload = [0; PING_SIZE];
    SystemRandom::new().fill(&mut payload)?;

    let start = Instant::now();
    let resp = client
        .post(url.clone())
        .body(Bytes::copy_from_slice(&payload))
        .send()
        .await?;

    let status = resp.status();
    if status != reqwest::StatusCode::OK {
        return Err(Error::UnexpectedStatus {
            status: status.as_u16(),
            body: resp.text().await.unwrap_or_default(),
        });
    }

    let echo = resp.bytes().await?;
    let rtt = start.elapsed();
    if echo.len() != PING_SIZE {
        return Err(Error::BadResponse("ping echo has the wrong size"));
    }
    if echo[..] != payload[..] {
        return Err(Error::BadResponse("ping echo mismatch"));
    }

    debug!(%url, ?rtt, "ping");
    Ok(rtt)
}

/// Ping the server at `base`, finding the endpoint through discovery.
pub async fn ping_discovered(client: &reqwest::Client, base: &Url) -> Result<Duration, Error> {
    let protocols = fetch_protocols(client, base).await?;
    let path = protocols
        .get(PING_PROTOCOL_ID)
        .map_or(DEFAULT_PING_PATH, |meta| meta.path.as_str());
    let url = base
        .join(path)
        .map_err(|_| Error::BadResponse("invalid ping path"))?;
    ping(client, &url).await
}
