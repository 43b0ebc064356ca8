//! Peer ID authentication between two processes.
//!
//! Start the server with `cargo run --example peer_id_auth -- server`, then in another terminal
//! authenticate with `cargo run --example peer_id_auth -- client`.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, Uri},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Parser, Subcommand};
use kagi::{
    ClientPeerIdAuth, Error, HttpHost, Key, ServerOptions, ServerPeerIdAuth, Url, request_hostname,
};
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser, Debug)]
#[command(about = "Mutual peer ID authentication over plain HTTP")]
struct Args {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Serve the auth endpoint and a protected `/log-my-id`.
    Server {
        #[arg(long, default_value = "127.0.0.1:8001")]
        bind: String,

        #[arg(long, default_value = "localhost:8001")]
        hostname: String,
    },

    /// Authenticate with a server, then call its protected endpoint.
    Client {
        #[arg(long, default_value = "http://localhost:8001/")]
        url: Url,
    },
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    match Args::parse().mode {
        Mode::Server { bind, hostname } => server(&bind, hostname).await,
        Mode::Client { url } => client(&url).await,
    }
}

async fn server(bind: &str, hostname: String) -> Result<(), Error> {
    let mut options = ServerOptions::with_hostnames([hostname]);
    options.insecure_no_tls = true;
    let auth = Arc::new(ServerPeerIdAuth::new(Key::generate()?, options)?);
    info!(peer = %auth.peer_id(), "server identity");

    let host = HttpHost::new()
        .with_peer_id_auth("/auth", auth.clone())
        .with_ping("/ping")
        .route("/log-my-id", get(log_my_id).with_state(auth));

    host.serve(TcpListener::bind(bind).await?).await
}

async fn log_my_id(
    State(auth): State<Arc<ServerPeerIdAuth>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let hostname = request_hostname(&headers, &uri).unwrap_or_default();
    match auth.unwrap_bearer_token(&headers, &hostname) {
        Ok(peer) => {
            info!(%peer, "authenticated request");
            peer.to_string().into_response()
        }
        Err(err) => err.into_response(),
    }
}

async fn client(base: &Url) -> Result<(), Error> {
    let client = ClientPeerIdAuth::new(Key::generate()?);
    info!(peer = %client.peer_id(), "client identity");

    let hostname = kagi::hostname_for(base).ok_or(Error::BadResponse("url has no host"))?;
    let server = client.mutual_auth_discovered(base, &hostname).await?;
    info!(%server, "authenticated server");

    let rtt = kagi::ping_discovered(client.http(), base).await?;
    info!(?rtt, "ping");

    let url = base
        .join("/log-my-id")
        .map_err(|_| Error::BadResponse("invalid url"))?;
    let mut req = client.http().get(url).build()?;
    client.add_auth_token(&mut req)?;
    let resp = client.http().execute(req).await?;
    let status = resp.status();
    let body = resp.text().await?;
    info!(%status, %body, "server says we are");

    Ok(())
}
