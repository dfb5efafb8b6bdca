// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! gRPC service implementations
//!
//! - `versionapi.Version/Version` - principal name and version
//! - `authapi.Authentication/Authenticate` - credential handshake, returns tokens
//! - `authapi.Authentication/Refresh` - new access token for an authenticated agent
//! - `eventstreamapi.EventStream/Subscribe` - bidirectional event exchange

use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, warn};

use super::authapi::authentication_server::{Authentication, AuthenticationServer};
use super::authapi::{AuthRequest, AuthResponse, RefreshRequest};
use super::eventstreamapi::event_stream_server::{EventStream, EventStreamServer};
use super::eventstreamapi::Event as WireEvent;
use super::versionapi::version_server::{Version, VersionServer};
use super::versionapi::{VersionRequest, VersionResponse};
use crate::application::authentication::HandshakeService;
use crate::domain::auth::{AuthError, AuthSubject, Credentials};
use crate::domain::events::Event;
use crate::infrastructure::metrics::CONNECTED_AGENTS;
use crate::infrastructure::queue::SendRecvQueues;

const STREAM_BUFFER: usize = 64;

pub(crate) fn auth_status(error: &AuthError) -> Status {
    match error {
        AuthError::UnknownMethod(_) | AuthError::InvalidMode(_) | AuthError::MissingCredential(_) => {
            Status::invalid_argument(error.to_string())
        }
        AuthError::NamespaceNotAllowed(_) => Status::permission_denied(error.to_string()),
        AuthError::InvalidCredentials
        | AuthError::MissingToken
        | AuthError::MalformedHeader
        | AuthError::InvalidSubject(_) => Status::unauthenticated(error.to_string()),
        AuthError::DuplicateMethod(_) | AuthError::Token(_) => Status::internal(error.to_string()),
    }
}

pub struct VersionService {
    version: String,
}

impl VersionService {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }

    pub fn into_server(self) -> VersionServer<Self> {
        VersionServer::new(self)
    }
}

#[tonic::async_trait]
impl Version for VersionService {
    async fn version(
        &self,
        _request: Request<VersionRequest>,
    ) -> Result<Response<VersionResponse>, Status> {
        Ok(Response::new(VersionResponse {
            version: self.version.clone(),
        }))
    }
}

pub struct AuthenticationService {
    handshake: Arc<HandshakeService>,
}

impl AuthenticationService {
    pub fn new(handshake: Arc<HandshakeService>) -> Self {
        Self { handshake }
    }

    pub fn into_server(self) -> AuthenticationServer<Self> {
        AuthenticationServer::new(self)
    }
}

#[tonic::async_trait]
impl Authentication for AuthenticationService {
    async fn authenticate(
        &self,
        request: Request<AuthRequest>,
    ) -> Result<Response<AuthResponse>, Status> {
        let req = request.into_inner();
        let credentials: Credentials = req.credentials.into_iter().collect();
        let tokens = self
            .handshake
            .authenticate(&req.method, &credentials, &req.mode)
            .await
            .map_err(|e| auth_status(&e))?;

        Ok(Response::new(AuthResponse {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        }))
    }

    async fn refresh(
        &self,
        request: Request<RefreshRequest>,
    ) -> Result<Response<AuthResponse>, Status> {
        let subject = request
            .extensions()
            .get::<AuthSubject>()
            .cloned()
            .ok_or_else(|| Status::unauthenticated("no authenticated subject"))?;
        let refresh_token = request.into_inner().refresh_token;
        let access_token = self
            .handshake
            .refresh(&subject, &refresh_token)
            .map_err(|e| auth_status(&e))?;

        Ok(Response::new(AuthResponse {
            access_token,
            refresh_token,
        }))
    }
}

pub struct EventStreamService {
    queues: Arc<SendRecvQueues>,
    drain: CancellationToken,
}

impl EventStreamService {
    pub fn new(queues: Arc<SendRecvQueues>, drain: CancellationToken) -> Self {
        Self { queues, drain }
    }

    pub fn into_server(self) -> EventStreamServer<Self> {
        EventStreamServer::new(self)
    }
}

fn encode_event(event: &Event) -> Result<WireEvent, serde_json::Error> {
    Ok(WireEvent {
        payload: serde_json::to_vec(event)?,
    })
}

#[tonic::async_trait]
impl EventStream for EventStreamService {
    type SubscribeStream = ReceiverStream<Result<WireEvent, Status>>;

    async fn subscribe(
        &self,
        request: Request<Streaming<WireEvent>>,
    ) -> Result<Response<Self::SubscribeStream>, Status> {
        let subject = request
            .extensions()
            .get::<AuthSubject>()
            .cloned()
            .ok_or_else(|| Status::unauthenticated("no authenticated subject"))?;
        let client = subject.client_id;
        let lease = self.queues.attach(&client);
        let mut inbound = request.into_inner();

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let drain = self.drain.clone();

        info!(client = %client, mode = %subject.mode, "Agent subscribed to event stream");
        metrics::gauge!(CONNECTED_AGENTS).increment(1.0);

        tokio::spawn(async move {
            let pair = lease.pair();
            loop {
                tokio::select! {
                    _ = drain.cancelled() => {
                        let _ = tx.send(Err(Status::unavailable("principal is shutting down"))).await;
                        break;
                    }
                    _ = tx.closed() => break,
                    message = inbound.next() => match message {
                        Some(Ok(wire)) => match serde_json::from_slice::<Event>(&wire.payload) {
                            Ok(event) => {
                                debug!(client = %client, event = %event.event_type, "Received event from agent");
                                pair.recv.add(event);
                            }
                            Err(e) => warn!(client = %client, "Discarding undecodable event: {}", e),
                        },
                        Some(Err(status)) => {
                            debug!(client = %client, "Inbound stream error: {}", status);
                            break;
                        }
                        None => break,
                    },
                    event = pair.send.next() => match encode_event(&event) {
                        Ok(wire) => {
                            if tx.send(Ok(wire)).await.is_err() {
                                warn!(client = %client, event = %event.id, "Agent went away, event dropped");
                                break;
                            }
                        }
                        Err(e) => warn!(client = %client, "Could not encode event: {}", e),
                    },
                }
            }

            drop(lease);
            metrics::gauge!(CONNECTED_AGENTS).decrement(1.0);
            info!(client = %client, "Agent event stream closed");
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
