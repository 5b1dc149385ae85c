//! demos/echo_backend.rs
//! Run: cargo run --example echo_backend -- <port> [name]
//!
//! Echoes every request back as JSON so forwarding through the balancer
//! can be inspected by hand.

use hyper::{
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server,
};
use serde_json::{json, Map, Value};
use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tracing::info;

#[derive(Clone)]
struct EchoState {
    name: String,
    req_counter: Arc<AtomicU64>,
}

async fn handle(req: Request<Body>, state: EchoState) -> Result<Response<Body>, hyper::Error> {
    let n = state.req_counter.fetch_add(1, Ordering::SeqCst) + 1;
    let (parts, body) = req.into_parts();
    let body = hyper::body::to_bytes(body).await?;

    let headers: Map<String, Value> = parts
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                Value::from(String::from_utf8_lossy(value.as_bytes()).into_owned()),
            )
        })
        .collect();

    info!(backend = %state.name, req = n, method = %parts.method, path = %parts.uri.path(), "echo");

    let echo = json!({
        "backend": state.name,
        "req": n,
        "method": parts.method.as_str(),
        "path": parts.uri.path(),
        "query": parts.uri.query(),
        "headers": headers,
        "body": String::from_utf8_lossy(&body),
    });

    let mut response = Response::new(Body::from(echo.to_string()));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let port: u16 = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "8001".into())
        .parse()?;
    let name = std::env::args()
        .nth(2)
        .or_else(|| std::env::var("BACKEND_NAME").ok())
        .unwrap_or_else(|| format!("backend-{port}"));

    let state = EchoState {
        name: name.clone(),
        req_counter: Arc::new(AtomicU64::new(0)),
    };

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let make_svc = make_service_fn(move |_conn| {
        let st = state.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle(req, st.clone()))) }
    });

    info!("Echo backend '{}' on http://{}", name, addr);

    Server::bind(&addr).serve(make_svc).await?;
    Ok(())
}
