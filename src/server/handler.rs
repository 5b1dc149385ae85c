// src/server/handler.rs
use hyper::{Body, Request, Response};
use std::convert::Infallible;
use std::sync::Arc;
use tower::Service;

use crate::load_balancer::Balancer;

/// Entry point for every inbound request, whatever its path or method.
#[derive(Clone)]
pub struct RequestHandler {
    balancer: Arc<Balancer>,
}

impl RequestHandler {
    pub fn new(balancer: Arc<Balancer>) -> Self {
        Self { balancer }
    }
}

impl Service<Request<Body>> for RequestHandler {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let balancer = self.balancer.clone();
        Box::pin(async move { Ok(balancer.dispatch(req).await) })
    }
}
