//! One-shot HTTP server for client tests.

use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::http::{header, Method, StatusCode, Uri};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// The first request the server received.
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub body: String,
}

/// Answer every request with a canned JSON response.
///
/// Returns the base URL and a receiver for the first request.
pub(crate) async fn serve_once(
    status: u16,
    body: &str,
) -> (String, oneshot::Receiver<RecordedRequest>) {
    let status = StatusCode::from_u16(status).expect("status code");
    let body = body.to_string();
    let (tx, rx) = oneshot::channel();
    let tx = Arc::new(Mutex::new(Some(tx)));

    let app = Router::new().fallback(move |method: Method, uri: Uri, request_body: Bytes| {
        let tx = tx.clone();
        let body = body.clone();
        async move {
            let sender = tx.lock().expect("lock").take();
            if let Some(sender) = sender {
                let _ = sender.send(RecordedRequest {
                    method,
                    path: uri.path().to_string(),
                    body: String::from_utf8_lossy(&request_body).into_owned(),
                });
            }
            (status, [(header::CONTENT_TYPE, "application/json")], body)
        }
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    (format!("http://{}", addr), rx)
}
