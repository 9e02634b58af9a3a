//! Loopback HTTP servers standing in for Google Cloud endpoints in tests

use axum::Router;
use tokio::net::TcpListener;

/// Serve `router` on an ephemeral loopback port, returning its base URL
pub(crate) async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", address)
}
