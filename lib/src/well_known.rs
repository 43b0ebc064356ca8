use std::{collections::BTreeMap, sync::Arc};

use axum::{
    Json, Router,
    extract::State,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use url::Url;

use crate::Error;

/// Path at which a server advertises its protocols.
pub const WELL_KNOWN_PROTOCOLS: &str = "/.well-known/libp2p/protocols";

/// Where a protocol is served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolMeta {
    /// The path implementing the protocol.
    pub path: String,
}

impl ProtocolMeta {
    /// Metadata for a protocol served at `path`, made absolute.
    pub fn new(path: impl Into<String>) -> Self {
        let mut meta = Self { path: path.into() };
        meta.make_absolute();
        meta
    }

    fn make_absolute(&mut self) {
        if !self.path.starts_with('/') {
            self.path.insert(0, '/');
        }
    }
}

/// Mapping of protocol identifiers to where they're served.
pub type ProtocolMap = BTreeMap<String, ProtocolMeta>;

/// The discovery registry.
///
/// Serves, at [`WELL_KNOWN_PROTOCOLS`], the mapping of protocol identifiers to paths. It is
/// public: reading it needs no authentication.
#[derive(Debug, Default)]
pub struct WellKnownHandler {
    protocols: RwLock<ProtocolMap>,
}

impl WellKnownHandler {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or overwrite) where a protocol is served.
    ///
    /// The last registration for a protocol wins. Paths are made absolute.
    pub fn add_protocol_meta(&self, protocol: impl Into<String>, mut meta: ProtocolMeta) {
        meta.make_absolute();

        let protocol = protocol.into();
        debug!(%protocol, path = %meta.path, "registering protocol");
        self.protocols.write().insert(protocol, meta);
    }

    /// Stop advertising a protocol, returning its previous metadata.
    pub fn remove_protocol_meta(&self, protocol: &str) -> Option<ProtocolMeta> {
        self.protocols.write().remove(protocol)
    }

    /// A snapshot of the registered protocols.
    pub fn protocols(&self) -> ProtocolMap {
        self.protocols.read().clone()
    }

    /// Answer a discovery request.
    pub fn handle(&self, method: &Method) -> Response {
        if *method != Method::GET {
            trace!(%method, "discovery: method not allowed");
            return StatusCode::METHOD_NOT_ALLOWED.into_response();
        }

        Json(self.protocols()).into_response()
    }

    /// A router serving this registry at [`WELL_KNOWN_PROTOCOLS`].
    pub fn router(self: Arc<Self>) -> Router {
        Router::new().route(
            WELL_KNOWN_PROTOCOLS,
            any(
                |State(this): State<Arc<Self>>, method: Method| async move { this.handle(&method) },
            )
            .with_state(self),
        )
    }
}

/// Fetch the protocols a server advertises.
///
/// `base` is any URL on the server; only its origin is used.
pub async fn fetch_protocols(client: &reqwest::Client, base: &Url) -> Result<ProtocolMap, Error> {
    let url = base
        .join(WELL_KNOWN_PROTOCOLS)
        .map_err(|_| Error::BadResponse("invalid base url"))?;

    let resp = client.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(Error::UnexpectedStatus {
            status: status.as_u16(),
            body: resp.text().await.unwrap_or_default(),
        });
    }

    Ok(resp.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_made_absolute() {
        assert_eq!(ProtocolMeta::new("ping").path, "/ping");
        assert_eq!(ProtocolMeta::new("/ping").path, "/ping");
        assert_eq!(ProtocolMeta::new("").path, "/");

        let registry = WellKnownHandler::new();
        registry.add_protocol_meta(
            "/raw/1",
            ProtocolMeta {
                path: "raw".into(),
            },
        );
        assert_eq!(registry.protocols()["/raw/1"].path, "/raw");
    }

    #[test]
    fn only_get_is_answered() {
        let registry = WellKnownHandler::new();
        assert_eq!(registry.handle(&Method::GET).status(), StatusCode::OK);
        assert_eq!(
            registry.handle(&Method::POST).status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }
}
