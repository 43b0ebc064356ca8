use std::sync::Arc;

use axum::{Router, routing::MethodRouter};
use tokio::net::TcpListener;
use tracing::info;

use crate::{
    Error, ProtocolMeta, ServerPeerIdAuth, WellKnownHandler,
    ping::{PING_PROTOCOL_ID, ping_router},
    server::HTTP_PEER_ID_AUTH_PROTO,
};

/// An HTTP server's routes, with its discovery registry kept in step.
///
/// Every protocol handler added through [`handle_protocol()`](Self::handle_protocol) is also
/// advertised at the well-known discovery path, which is always served.
#[derive(Debug)]
pub struct HttpHost {
    well_known: Arc<WellKnownHandler>,
    router: Router,
}

impl Default for HttpHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpHost {
    /// A host serving only the discovery registry.
    pub fn new() -> Self {
        let well_known = Arc::new(WellKnownHandler::new());
        Self {
            router: well_known.clone().router(),
            well_known,
        }
    }

    /// The discovery registry of this host.
    pub fn well_known(&self) -> &Arc<WellKnownHandler> {
        &self.well_known
    }

    /// Serve `protocol` at `path`, and advertise it.
    ///
    /// # Panics
    ///
    /// Like [`Router::route()`], if `path` is already routed.
    pub fn handle_protocol(self, protocol: &str, path: &str, handler: MethodRouter) -> Self {
        let meta = ProtocolMeta::new(path);
        let router = self.router.route(&meta.path, handler);
        self.well_known.add_protocol_meta(protocol, meta);
        Self { router, ..self }
    }

    /// Serve an application route at `path`, without advertising it.
    ///
    /// # Panics
    ///
    /// Like [`Router::route()`], if `path` is already routed.
    pub fn route(self, path: &str, handler: MethodRouter) -> Self {
        Self {
            router: self.router.route(path, handler),
            ..self
        }
    }

    /// Serve peer ID authentication at `path`.
    pub fn with_peer_id_auth(self, path: &str, auth: Arc<ServerPeerIdAuth>) -> Self {
        self.handle_protocol(HTTP_PEER_ID_AUTH_PROTO, path, auth.method_router())
    }

    /// Serve the ping protocol at `path`.
    pub fn with_ping(self, path: &str) -> Self {
        self.handle_protocol(PING_PROTOCOL_ID, path, ping_router())
    }

    /// The complete router, for mounting into a larger application.
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Serve on `listener` until the server fails.
    pub async fn serve(self, listener: TcpListener) -> Result<(), Error> {
        info!(addr = ?listener.local_addr()?, "serving");
        axum::serve(listener, self.router).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocols_are_advertised_with_their_routes() {
        let host = HttpHost::new().with_ping("ping").handle_protocol(
            "/echo/1",
            "/echo",
            ping_router(),
        );

        let protocols = host.well_known().protocols();
        assert_eq!(protocols[PING_PROTOCOL_ID].path, "/ping");
        assert_eq!(protocols["/echo/1"].path, "/echo");
    }
}
