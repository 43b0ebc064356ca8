//! Kagi is mutual peer-identity authentication over plain HTTP.
//!
//! Peers are identified by a persistent key pair (Ed25519 or ECDSA), and named by a [`PeerId`]
//! derived from the public key. A client and a server prove control of their keys to each other
//! in a challenge-response handshake carried in `libp2p-PeerID` authentication headers; the
//! server then issues a short-lived bearer token, which the client attaches to later requests
//! and protected handlers turn back into the caller's verified peer ID.
//!
//! Servers advertise which paths implement which protocols at a well-known discovery path
//! ([`WellKnownHandler`]); clients use it to find the authentication endpoint.
//!
//! This provides authentication, not authorisation: applications decide what a given peer ID is
//! allowed to do. It also does not provide confidentiality. Without TLS in front of the server,
//! bearer tokens can be read off the wire and replayed until they expire, so servers must opt in
//! to plaintext explicitly with [`ServerOptions::insecure_no_tls`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use kagi::{ClientPeerIdAuth, HttpHost, Key, ServerOptions, ServerPeerIdAuth, Url};
//!
//! # async fn run() -> Result<(), kagi::Error> {
//! let mut options = ServerOptions::with_hostnames(["localhost:8001"]);
//! options.insecure_no_tls = true;
//! let auth = Arc::new(ServerPeerIdAuth::new(Key::generate()?, options)?);
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8001").await?;
//! tokio::spawn(HttpHost::new().with_peer_id_auth("/auth", auth).serve(listener));
//!
//! let client = ClientPeerIdAuth::new(Key::generate()?);
//! let base = Url::parse("http://localhost:8001/").expect("valid url");
//! let server = client.mutual_auth_discovered(&base, "localhost:8001").await?;
//! println!("server is {server}");
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]

pub use crate::{
    client::*, error::*, host::*, key::*, params::*, peer_id::*, ping::*, server::*,
    well_known::*,
};
pub use multihash;
pub use rcgen;
pub use url::Url;

mod challenge;
mod client;
mod error;
mod host;
mod key;
mod params;
mod peer_id;
mod ping;
mod sealed;
mod server;
mod signing;
mod well_known;
