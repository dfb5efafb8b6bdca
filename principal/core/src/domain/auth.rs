// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Authentication domain
//!
//! Contracts shared by the authentication gate, the handshake service and the
//! concrete authentication methods.
//!
//! ## Flow
//!
//! ```text
//! AuthRequest{method, credentials, mode}
//!   └─ AuthMethods::method(name)
//!         └─ AuthMethod::authenticate(credentials)  → client id
//!               └─ TokenIssuer::issue_access_token(AuthSubject)
//! ```
//!
//! Every later call carries the access token; the gate validates it through
//! [`TokenIssuer::validate_access_token`] and recovers the [`AuthSubject`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::domain::agent_mode::AgentMode;

/// Method specific key/value credentials presented by an agent.
pub type Credentials = HashMap<String, String>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unknown authentication method: {0}")]
    UnknownMethod(String),

    #[error("authentication method {0} is already registered")]
    DuplicateMethod(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("missing credential field: {0}")]
    MissingCredential(&'static str),

    #[error("invalid agent mode requested: {0}")]
    InvalidMode(String),

    #[error("namespace {0} is not allowed on this principal")]
    NamespaceNotAllowed(String),

    #[error("no authorization token provided")]
    MissingToken,

    #[error("malformed authorization header")]
    MalformedHeader,

    #[error("invalid authentication subject: {0}")]
    InvalidSubject(String),

    #[error(transparent)]
    Token(#[from] IssuerError),
}

/// A pluggable authentication method.
#[async_trait]
pub trait AuthMethod: Send + Sync {
    /// Verify the presented credentials and return the client id they prove.
    async fn authenticate(&self, credentials: &Credentials) -> Result<String, AuthError>;
}

/// Registry of authentication methods accepted by the principal.
#[derive(Clone, Default)]
pub struct AuthMethods {
    methods: HashMap<String, Arc<dyn AuthMethod>>,
}

impl AuthMethods {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        method: Arc<dyn AuthMethod>,
    ) -> Result<(), AuthError> {
        let name = name.into();
        if self.methods.contains_key(&name) {
            return Err(AuthError::DuplicateMethod(name));
        }
        self.methods.insert(name, method);
        Ok(())
    }

    pub fn method(&self, name: &str) -> Option<Arc<dyn AuthMethod>> {
        self.methods.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl fmt::Debug for AuthMethods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthMethods")
            .field("methods", &self.names())
            .finish()
    }
}

/// Identity of an authenticated agent, encoded as JSON in the token subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSubject {
    #[serde(rename = "clientID")]
    pub client_id: String,
    pub mode: AgentMode,
}

impl AuthSubject {
    pub fn new(client_id: impl Into<String>, mode: AgentMode) -> Self {
        Self {
            client_id: client_id.into(),
            mode,
        }
    }

    pub fn encode(&self) -> Result<String, AuthError> {
        serde_json::to_string(self).map_err(|e| AuthError::InvalidSubject(e.to_string()))
    }

    pub fn decode(subject: &str) -> Result<Self, AuthError> {
        serde_json::from_str(subject).map_err(|e| AuthError::InvalidSubject(e.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum IssuerError {
    #[error("issuer name must not be empty")]
    EmptyName,

    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    #[error("could not sign token: {0}")]
    Signing(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),
}

/// Claims carried by every token minted by a [`TokenIssuer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    pub jti: String,
}

/// Mints and validates the credentials handed out after a successful handshake.
pub trait TokenIssuer: Send + Sync {
    fn issue_access_token(&self, subject: &str, ttl: Duration) -> Result<String, IssuerError>;
    fn issue_refresh_token(&self, subject: &str, ttl: Duration) -> Result<String, IssuerError>;
    fn validate_access_token(&self, token: &str) -> Result<TokenClaims, IssuerError>;
    fn validate_refresh_token(&self, token: &str) -> Result<TokenClaims, IssuerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysOk;

    #[async_trait]
    impl AuthMethod for AlwaysOk {
        async fn authenticate(&self, _credentials: &Credentials) -> Result<String, AuthError> {
            Ok("agent".to_string())
        }
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut methods = AuthMethods::new();
        methods.register("userpass", Arc::new(AlwaysOk)).unwrap();
        let err = methods.register("userpass", Arc::new(AlwaysOk)).unwrap_err();
        assert!(matches!(err, AuthError::DuplicateMethod(name) if name == "userpass"));
    }

    #[tokio::test]
    async fn test_lookup_registered_method() {
        let mut methods = AuthMethods::new();
        methods.register("userpass", Arc::new(AlwaysOk)).unwrap();

        assert!(methods.method("mtls").is_none());
        let method = methods.method("userpass").unwrap();
        assert_eq!(method.authenticate(&Credentials::new()).await.unwrap(), "agent");
    }

    #[test]
    fn test_subject_json_shape() {
        let subject = AuthSubject::new("team-a", AgentMode::Managed);
        let encoded = subject.encode().unwrap();
        assert_eq!(encoded, r#"{"clientID":"team-a","mode":"managed"}"#);
        assert_eq!(AuthSubject::decode(&encoded).unwrap(), subject);
    }

    #[test]
    fn test_subject_decode_rejects_garbage() {
        assert!(matches!(
            AuthSubject::decode("team-a"),
            Err(AuthError::InvalidSubject(_))
        ));
    }
}
