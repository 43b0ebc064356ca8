use std::sync::{Arc, LazyLock};

use kagi::{
    ClientPeerIdAuth, Error, HttpHost, Key, PeerId, ServerOptions, ServerPeerIdAuth, SigScheme,
    Url,
};
use tokio::{net::TcpListener, spawn};

static SETUP: LazyLock<()> = LazyLock::new(|| {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();
});

async fn handshake(server_scheme: SigScheme, client_scheme: SigScheme) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let hostname = listener.local_addr().unwrap().to_string();

    let mut options = ServerOptions::with_hostnames([hostname.clone()]);
    options.insecure_no_tls = true;
    let auth = Arc::new(
        ServerPeerIdAuth::new(Key::generate_for(server_scheme).unwrap(), options).unwrap(),
    );
    let task = spawn(
        HttpHost::new()
            .with_peer_id_auth("/auth", auth.clone())
            .serve(listener),
    );

    let client = ClientPeerIdAuth::new(Key::generate_for(client_scheme).unwrap());
    let url = Url::parse(&format!("http://{hostname}/auth")).unwrap();
    let server_id = client
        .mutual_auth_expecting(&url, &hostname, &auth.peer_id())
        .await
        .unwrap();
    assert_eq!(server_id, auth.peer_id());
    task.abort();
}

#[tokio::test]
async fn both_ed25519() {
    *SETUP;
    handshake(SigScheme::Ed25519, SigScheme::Ed25519).await;
}

#[tokio::test]
async fn both_ecdsa256() {
    *SETUP;
    handshake(SigScheme::EcdsaP256, SigScheme::EcdsaP256).await;
}

#[tokio::test]
async fn both_ecdsa384() {
    *SETUP;
    handshake(SigScheme::EcdsaP384, SigScheme::EcdsaP384).await;
}

#[tokio::test]
async fn mixed_server_ecdsa() {
    *SETUP;
    handshake(SigScheme::EcdsaP256, SigScheme::Ed25519).await;
    handshake(SigScheme::EcdsaP384, SigScheme::Ed25519).await;
}

#[tokio::test]
async fn mixed_client_ecdsa() {
    *SETUP;
    handshake(SigScheme::Ed25519, SigScheme::EcdsaP256).await;
    handshake(SigScheme::EcdsaP256, SigScheme::EcdsaP384).await;
}

#[test]
fn peer_ids_survive_text_form() {
    for scheme in [SigScheme::Ed25519, SigScheme::EcdsaP256, SigScheme::EcdsaP384] {
        let key = Key::generate_for(scheme).unwrap();
        let id: PeerId = key.peer_id().to_string().parse().unwrap();
        assert_eq!(id, key.peer_id());
        assert!(id.matches(&key.public_key()));
    }
}

#[test]
fn load_checks_the_scheme() {
    let pair = kagi::rcgen::KeyPair::generate_for(&kagi::rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    assert!(matches!(
        Key::load(pair, SigScheme::Ed25519),
        Err(Error::IncompatibleKey(SigScheme::Ed25519))
    ));

    let pair = kagi::rcgen::KeyPair::generate_for(&kagi::rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    let key = Key::load(pair, SigScheme::EcdsaP256).unwrap();
    assert_eq!(key.scheme(), SigScheme::EcdsaP256);
}
