use std::sync::LazyLock;

use axum::http::StatusCode;
use kagi::{Error, HttpHost, PING_SIZE, Url, ping, ping_discovered};
use tokio::{net::TcpListener, spawn};

static SETUP: LazyLock<()> = LazyLock::new(|| {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();
});

async fn serve(host: HttpHost) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    spawn(host.serve(listener));
    Url::parse(&format!("http://{addr}/")).unwrap()
}

#[tokio::test]
async fn echoes() {
    *SETUP;
    let base = serve(HttpHost::new().with_ping("/ping")).await;
    let http = reqwest::Client::new();

    ping(&http, &base.join("/ping").unwrap()).await.unwrap();
    ping_discovered(&http, &base).await.unwrap();
}

#[tokio::test]
async fn discovered_at_a_custom_path() {
    *SETUP;
    let base = serve(HttpHost::new().with_ping("/somewhere/else")).await;
    ping_discovered(&reqwest::Client::new(), &base).await.unwrap();
}

#[tokio::test]
async fn relative_path_is_served_where_advertised() {
    *SETUP;
    let base = serve(HttpHost::new().with_ping("relative/ping")).await;
    let http = reqwest::Client::new();

    ping(&http, &base.join("/relative/ping").unwrap()).await.unwrap();
    ping_discovered(&http, &base).await.unwrap();
}

#[tokio::test]
async fn wrong_size_is_refused() {
    *SETUP;
    let base = serve(HttpHost::new().with_ping("/ping")).await;
    let url = base.join("/ping").unwrap();
    let http = reqwest::Client::new();

    for size in [0, PING_SIZE - 1, PING_SIZE + 1] {
        let resp = http
            .post(url.clone())
            .body(vec![0; size])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "size {size}");
    }

    let resp = http
        .post(url)
        .body(vec![7; PING_SIZE])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.bytes().await.unwrap().as_ref(), &[7; PING_SIZE]);
}

#[tokio::test]
async fn missing_endpoint_is_an_error() {
    *SETUP;
    let base = serve(HttpHost::new()).await;
    let err = ping(&reqwest::Client::new(), &base.join("/ping").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnexpectedStatus { status: 404, .. }));
}
