// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

mod common;

use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Certificate, Channel, ClientTlsConfig};
use tonic::{Code, Request};

use fleetsync_core::domain::agent_mode::AgentMode;
use fleetsync_core::domain::backend::StateBackend;
use fleetsync_core::domain::events::{Event, EventEmitter, EventType};
use fleetsync_core::domain::resource::Application;
use fleetsync_core::domain::server_config::*;
use fleetsync_core::infrastructure::memory_backend::InMemoryStateBackend;
use fleetsync_core::presentation::grpc::authapi::authentication_client::AuthenticationClient;
use fleetsync_core::presentation::grpc::authapi::{AuthRequest, RefreshRequest};
use fleetsync_core::presentation::grpc::eventstreamapi::event_stream_client::EventStreamClient;
use fleetsync_core::presentation::grpc::eventstreamapi::Event as WireEvent;
use fleetsync_core::presentation::grpc::versionapi::version_client::VersionClient;
use fleetsync_core::presentation::grpc::versionapi::VersionRequest;
use fleetsync_core::presentation::transport::TransportError;
use fleetsync_core::{Server, ServerError};

fn grpc_options() -> Vec<ServerOption> {
    vec![
        with_signing_key(common::signing_key()),
        with_grpc(true),
        with_listen_address("127.0.0.1:0"),
        with_insecure_plaintext(true),
        with_namespaces(["team-a", "team-b"]),
        with_auth_methods(common::userpass_methods()),
    ]
}

async fn started(backend: Arc<InMemoryStateBackend>, options: Vec<ServerOption>) -> (Server, SocketAddr) {
    let mut server = Server::new(&CancellationToken::new(), backend, "fleetsync", options).unwrap();
    let (tx, _rx) = mpsc::channel(8);
    server.start(tx).await.unwrap();
    let addr = server.local_addr().unwrap();
    (server, addr)
}

async fn channel(addr: SocketAddr) -> Channel {
    Channel::from_shared(format!("http://{}", addr))
        .unwrap()
        .connect()
        .await
        .unwrap()
}

async fn access_token(channel: Channel, user: &str, password: &str, mode: &str) -> String {
    let (access, refresh) = token_pair(channel, user, password, mode).await;
    assert!(!refresh.is_empty());
    access
}

async fn token_pair(channel: Channel, user: &str, password: &str, mode: &str) -> (String, String) {
    let mut client = AuthenticationClient::new(channel);
    let response = client
        .authenticate(AuthRequest {
            method: "userpass".to_string(),
            credentials: [
                ("username".to_string(), user.to_string()),
                ("password".to_string(), password.to_string()),
            ]
            .into_iter()
            .collect(),
            mode: mode.to_string(),
        })
        .await
        .unwrap()
        .into_inner();
    (response.access_token, response.refresh_token)
}

async fn subscribe(
    channel: Channel,
    token: &str,
) -> (mpsc::Sender<WireEvent>, tonic::Streaming<WireEvent>) {
    let (outbound, rx) = mpsc::channel::<WireEvent>(8);
    let inbound = EventStreamClient::new(channel)
        .subscribe(with_token(ReceiverStream::new(rx), token))
        .await
        .unwrap()
        .into_inner();
    (outbound, inbound)
}

fn with_token<T>(message: T, token: &str) -> Request<T> {
    let mut request = Request::new(message);
    request
        .metadata_mut()
        .insert("authorization", format!("Bearer {}", token).parse().unwrap());
    request
}

#[tokio::test]
async fn test_version_needs_no_token() {
    let (mut server, addr) = started(Arc::new(InMemoryStateBackend::new()), grpc_options()).await;

    let mut client = VersionClient::new(channel(addr).await);
    let response = client.version(VersionRequest {}).await.unwrap().into_inner();
    assert!(response.version.starts_with("fleetsync-principal v"));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_authentication_outcomes() {
    let (mut server, addr) = started(Arc::new(InMemoryStateBackend::new()), grpc_options()).await;
    let channel = channel(addr).await;

    let token = access_token(channel.clone(), "team-a", "alpha", "autonomous").await;
    assert!(!token.is_empty());
    assert_eq!(server.registry().mode("team-a"), AgentMode::Autonomous);

    let mut client = AuthenticationClient::new(channel);
    let bad_password = client
        .authenticate(AuthRequest {
            method: "userpass".to_string(),
            credentials: [
                ("username".to_string(), "team-a".to_string()),
                ("password".to_string(), "wrong".to_string()),
            ]
            .into_iter()
            .collect(),
            mode: "managed".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(bad_password.code(), Code::Unauthenticated);

    let unknown_method = client
        .authenticate(AuthRequest {
            method: "oidc".to_string(),
            credentials: Default::default(),
            mode: "managed".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(unknown_method.code(), Code::InvalidArgument);

    // A failed attempt leaves the registered mode alone.
    assert_eq!(server.registry().mode("team-a"), AgentMode::Autonomous);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_subscribe_requires_token() {
    let (mut server, addr) = started(Arc::new(InMemoryStateBackend::new()), grpc_options()).await;

    let (_tx, rx) = mpsc::channel::<WireEvent>(1);
    let mut client = EventStreamClient::new(channel(addr).await);
    let status = client
        .subscribe(Request::new(ReceiverStream::new(rx)))
        .await
        .err()
        .unwrap();
    assert_eq!(status.code(), Code::Unauthenticated);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_managed_agent_stream_receives_backend_changes() {
    let backend = Arc::new(InMemoryStateBackend::new());
    let (mut server, addr) = started(backend.clone(), grpc_options()).await;
    let channel = channel(addr).await;
    let token = access_token(channel.clone(), "team-a", "alpha", "managed").await;

    let (outbound, rx) = mpsc::channel::<WireEvent>(8);
    let mut client = EventStreamClient::new(channel);
    let mut inbound = client
        .subscribe(with_token(ReceiverStream::new(rx), &token))
        .await
        .unwrap()
        .into_inner();

    let queues = server.queues();
    assert!(common::eventually(Duration::from_secs(2), || {
        let queues = queues.clone();
        async move { queues.has("team-a") }
    })
    .await);

    backend
        .create(Application::new("team-a", "guestbook", json!({"replicas": 3})))
        .await
        .unwrap();

    let wire = tokio::time::timeout(Duration::from_secs(3), inbound.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let event: Event = serde_json::from_slice(&wire.payload).unwrap();
    assert_eq!(event.event_type, EventType::Create);
    assert_eq!(event.application.key(), "team-a/guestbook");

    // Status updates from a managed agent are accepted.
    let mut status = event.application.clone();
    status.status = json!({"health": "Healthy"});
    let update = EventEmitter::new("agent-team-a").application_event(EventType::StatusUpdate, status);
    outbound
        .send(WireEvent {
            payload: serde_json::to_vec(&update).unwrap(),
        })
        .await
        .unwrap();

    let manager = server.app_manager();
    assert!(common::eventually(Duration::from_secs(3), || {
        let manager = manager.clone();
        async move {
            matches!(
                manager.get("team-a", "guestbook").await,
                Ok(Some(app)) if app.status["health"] == "Healthy"
            )
        }
    })
    .await);

    drop(outbound);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stream_closes_when_server_stops() {
    let (mut server, addr) = started(Arc::new(InMemoryStateBackend::new()), grpc_options()).await;
    let channel = channel(addr).await;
    let token = access_token(channel.clone(), "team-b", "beta", "managed").await;

    let (_outbound, rx) = mpsc::channel::<WireEvent>(1);
    let mut inbound = EventStreamClient::new(channel)
        .subscribe(with_token(ReceiverStream::new(rx), &token))
        .await
        .unwrap()
        .into_inner();

    server.shutdown().await.unwrap();

    let ended = tokio::time::timeout(Duration::from_secs(3), inbound.message())
        .await
        .unwrap();
    assert!(!matches!(ended, Ok(Some(_))));
}

#[tokio::test]
async fn test_tls_transport_with_private_ca() {
    let ca_key = KeyPair::generate().unwrap();
    let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();

    let leaf_key = KeyPair::generate().unwrap();
    let leaf = CertificateParams::new(vec!["localhost".to_string()])
        .unwrap()
        .signed_by(&leaf_key, &ca_cert, &ca_key)
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let cert_path = dir.path().join("tls.crt");
    let key_path = dir.path().join("tls.key");
    std::fs::write(&cert_path, leaf.pem()).unwrap();
    std::fs::write(&key_path, leaf_key.serialize_pem()).unwrap();

    let options = vec![
        with_signing_key(common::signing_key()),
        with_grpc(true),
        with_listen_address("127.0.0.1:0"),
        with_tls_key_pair_from_path(cert_path, key_path),
    ];
    let (mut server, addr) = started(Arc::new(InMemoryStateBackend::new()), options).await;

    let tls = ClientTlsConfig::new()
        .ca_certificate(Certificate::from_pem(ca_cert.pem()))
        .domain_name("localhost");
    let channel = Channel::from_shared(format!("https://{}", addr))
        .unwrap()
        .tls_config(tls)
        .unwrap()
        .connect()
        .await
        .unwrap();

    let response = VersionClient::new(channel)
        .version(VersionRequest {})
        .await
        .unwrap()
        .into_inner();
    assert!(response.version.contains('v'));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reconnected_stream_keeps_receiving_after_old_stream_ends() {
    let backend = Arc::new(InMemoryStateBackend::new());
    let (mut server, addr) = started(backend.clone(), grpc_options()).await;
    let channel = channel(addr).await;
    let token = access_token(channel.clone(), "team-a", "alpha", "managed").await;

    let (old_outbound, old_inbound) = subscribe(channel.clone(), &token).await;
    let (_outbound, mut inbound) = subscribe(channel, &token).await;
    let queues = server.queues();
    assert!(common::eventually(Duration::from_secs(2), || {
        let queues = queues.clone();
        async move { queues.attached("team-a") == 2 }
    })
    .await);

    drop(old_outbound);
    drop(old_inbound);
    assert!(common::eventually(Duration::from_secs(2), || {
        let queues = queues.clone();
        async move { queues.attached("team-a") == 1 }
    })
    .await);
    assert!(queues.has("team-a"));

    backend
        .create(Application::new("team-a", "guestbook", json!({})))
        .await
        .unwrap();
    let wire = tokio::time::timeout(Duration::from_secs(3), inbound.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let event: Event = serde_json::from_slice(&wire.payload).unwrap();
    assert_eq!(event.application.key(), "team-a/guestbook");

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_events_sent_before_stream_close_are_applied() {
    let backend = Arc::new(InMemoryStateBackend::new());
    let (mut server, addr) = started(backend.clone(), grpc_options()).await;
    let channel = channel(addr).await;
    let token = access_token(channel.clone(), "team-b", "beta", "autonomous").await;

    let (outbound, _inbound) = subscribe(channel, &token).await;
    let create = EventEmitter::new("agent-team-b").application_event(
        EventType::Create,
        Application::new("team-b", "billing", json!({"image": "billing:1.0"})),
    );
    outbound
        .send(WireEvent {
            payload: serde_json::to_vec(&create).unwrap(),
        })
        .await
        .unwrap();
    // Half-close ends the subscription on the principal.
    drop(outbound);
    let queues = server.queues();
    assert!(common::eventually(Duration::from_secs(2), || {
        let queues = queues.clone();
        async move { queues.has("team-b") && queues.attached("team-b") == 0 }
    })
    .await);

    let manager = server.app_manager();
    assert!(common::eventually(Duration::from_secs(3), || {
        let manager = manager.clone();
        async move { matches!(manager.get("team-b", "billing").await, Ok(Some(_))) }
    })
    .await);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_grace_period_exceeded_by_open_stream() {
    let mut options = grpc_options();
    options.push(with_shutdown_grace_period(Duration::from_millis(500)));
    let (mut server, addr) = started(Arc::new(InMemoryStateBackend::new()), options).await;
    let channel = channel(addr).await;
    let token = access_token(channel.clone(), "team-a", "alpha", "managed").await;

    let (_outbound, _inbound) = subscribe(channel, &token).await;
    let queues = server.queues();
    assert!(common::eventually(Duration::from_secs(2), || {
        let queues = queues.clone();
        async move { queues.attached("team-a") == 1 }
    })
    .await);

    let begin = Instant::now();
    let result = server.shutdown().await;
    let elapsed = begin.elapsed();

    assert!(matches!(
        result,
        Err(ServerError::Transport(TransportError::GracePeriodExceeded(_)))
    ));
    assert!(elapsed >= Duration::from_millis(450), "returned after {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(4), "returned after {:?}", elapsed);
}

#[tokio::test]
async fn test_refresh_needs_current_access_token() {
    let (mut server, addr) = started(Arc::new(InMemoryStateBackend::new()), grpc_options()).await;
    let channel = channel(addr).await;
    let (access, refresh) = token_pair(channel.clone(), "team-a", "alpha", "managed").await;
    let mut client = AuthenticationClient::new(channel.clone());

    let anonymous = client
        .refresh(RefreshRequest {
            refresh_token: refresh.clone(),
        })
        .await
        .unwrap_err();
    assert_eq!(anonymous.code(), Code::Unauthenticated);

    let renewed = client
        .refresh(with_token(
            RefreshRequest {
                refresh_token: refresh.clone(),
            },
            &access,
        ))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(renewed.refresh_token, refresh);

    // The renewed token opens an event stream.
    let (_outbound, _inbound) = subscribe(channel.clone(), &renewed.access_token).await;

    let other = access_token(channel, "team-b", "beta", "managed").await;
    let stolen = client
        .refresh(with_token(RefreshRequest { refresh_token: refresh }, &other))
        .await
        .unwrap_err();
    assert_eq!(stolen.code(), Code::Unauthenticated);

    server.shutdown().await.unwrap();
}
