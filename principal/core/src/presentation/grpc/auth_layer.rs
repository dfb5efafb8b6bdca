// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// gRPC authentication layer
//
// Runs the authentication gate before any service sees the request. The
// request path (`/package.Service/Method`) is the endpoint identifier. On
// success the authenticated subject is attached to the request extensions;
// on failure the call is answered with UNAUTHENTICATED without reaching the
// service.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tonic::codegen::http;
use tonic::Status;
use tower::{Layer, Service};
use tracing::debug;

use crate::infrastructure::auth::AuthGate;

#[derive(Clone)]
pub struct AuthLayer {
    gate: Arc<AuthGate>,
}

impl AuthLayer {
    pub fn new(gate: Arc<AuthGate>) -> Self {
        Self { gate }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            gate: self.gate.clone(),
            inner,
        }
    }
}

#[derive(Clone)]
pub struct AuthService<S> {
    gate: Arc<AuthGate>,
    inner: S,
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for AuthService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<ReqBody>) -> Self::Future {
        let authorization = req
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        match self.gate.authorize(req.uri().path(), authorization) {
            Ok(subject) => {
                if let Some(subject) = subject {
                    req.extensions_mut().insert(subject);
                }
                // Use the instance that was polled ready.
                let clone = self.inner.clone();
                let mut inner = std::mem::replace(&mut self.inner, clone);
                Box::pin(async move { inner.call(req).await })
            }
            Err(e) => {
                debug!(path = %req.uri().path(), "Rejected unauthenticated gRPC call: {}", e);
                let response = Status::unauthenticated(e.to_string()).into_http::<ResBody>();
                Box::pin(async move { Ok(response) })
            }
        }
    }
}
