use axum::{http::StatusCode, Router};
use std::time::Duration;
use tokio::net::TcpListener;

use bounty_watch::http_client::create_probe_client;
use bounty_watch::model::DomainStatus;
use bounty_watch::probe::{HttpProber, Prober};

/// Plain-HTTP server answering every request with `status`; returns `host:port`.
async fn serve_status(status: StatusCode) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let app = Router::new().fallback(move || async move { status });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn prober() -> HttpProber {
    let timeout = Duration::from_secs(3);
    HttpProber::new(create_probe_client(timeout, 2).unwrap(), timeout)
}

#[tokio::test]
async fn http_only_host_is_up() {
    let host = serve_status(StatusCode::OK).await;
    assert_eq!(prober().probe(&host).await, DomainStatus::Up);
}

#[tokio::test]
async fn redirects_and_client_errors_count_as_up() {
    let redirect = serve_status(StatusCode::MOVED_PERMANENTLY).await;
    let forbidden = serve_status(StatusCode::FORBIDDEN).await;
    let p = prober();
    assert_eq!(p.probe(&redirect).await, DomainStatus::Up);
    assert_eq!(p.probe(&forbidden).await, DomainStatus::Up);
}

#[tokio::test]
async fn server_errors_are_down() {
    let host = serve_status(StatusCode::SERVICE_UNAVAILABLE).await;
    assert_eq!(prober().probe(&host).await, DomainStatus::Down);
}

#[tokio::test]
async fn closed_port_is_down() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    assert_eq!(prober().probe(&addr).await, DomainStatus::Down);
}
