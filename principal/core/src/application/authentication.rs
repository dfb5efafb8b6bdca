// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Authentication handshake
//!
//! Verifies an agent's credentials with the requested method, registers the
//! agent's namespace and mode, and mints the token pair the agent presents on
//! every later call. The authenticated client id doubles as the agent's
//! namespace.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::agent_mode::AgentMode;
use crate::domain::auth::{AuthError, AuthSubject, Credentials};
use crate::domain::server_config::namespace_allowed;
use crate::infrastructure::agent_registry::AgentModeRegistry;
use crate::infrastructure::auth::AuthGate;
use crate::infrastructure::metrics::AGENT_AUTHENTICATIONS_TOTAL;

pub const ACCESS_TOKEN_TTL: Duration = Duration::from_secs(5 * 60);
pub const REFRESH_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub subject: AuthSubject,
    pub access_token: String,
    pub refresh_token: String,
}

pub struct HandshakeService {
    gate: Arc<AuthGate>,
    registry: Arc<AgentModeRegistry>,
    allowed_namespaces: Vec<String>,
}

impl HandshakeService {
    pub fn new(
        gate: Arc<AuthGate>,
        registry: Arc<AgentModeRegistry>,
        allowed_namespaces: Vec<String>,
    ) -> Self {
        Self {
            gate,
            registry,
            allowed_namespaces,
        }
    }

    pub async fn authenticate(
        &self,
        method: &str,
        credentials: &Credentials,
        mode: &str,
    ) -> Result<IssuedTokens, AuthError> {
        let result = self.handshake(method, credentials, mode).await;
        let outcome = if result.is_ok() { "success" } else { "failure" };
        metrics::counter!(AGENT_AUTHENTICATIONS_TOTAL, "method" => method.to_string(), "result" => outcome)
            .increment(1);
        if let Err(e) = &result {
            warn!(method, "Agent authentication failed: {}", e);
        }
        result
    }

    async fn handshake(
        &self,
        method: &str,
        credentials: &Credentials,
        mode: &str,
    ) -> Result<IssuedTokens, AuthError> {
        let mode = AgentMode::from_str(mode)
            .ok()
            .filter(|m| *m != AgentMode::Unknown)
            .ok_or_else(|| AuthError::InvalidMode(mode.to_string()))?;

        let auth_method = self
            .gate
            .methods()
            .method(method)
            .ok_or_else(|| AuthError::UnknownMethod(method.to_string()))?;
        let client_id = auth_method.authenticate(credentials).await?;

        let namespace = client_id.clone();
        if !namespace_allowed(&self.allowed_namespaces, &namespace) {
            return Err(AuthError::NamespaceNotAllowed(namespace));
        }

        let subject = AuthSubject::new(client_id.clone(), mode);
        let encoded = subject.encode()?;
        let issuer = self.gate.issuer();
        let access_token = issuer.issue_access_token(&encoded, ACCESS_TOKEN_TTL)?;
        let refresh_token = issuer.issue_refresh_token(&encoded, REFRESH_TOKEN_TTL)?;

        self.registry.set_client_namespace(&client_id, &namespace);
        self.registry.set_mode(&namespace, mode);
        info!(client = %client_id, %mode, "Agent authenticated");

        Ok(IssuedTokens {
            subject,
            access_token,
            refresh_token,
        })
    }

    /// Mint a fresh access token for `caller` from its refresh token. A
    /// refresh token belonging to another client is rejected.
    pub fn refresh(&self, caller: &AuthSubject, refresh_token: &str) -> Result<String, AuthError> {
        let issuer = self.gate.issuer();
        let result = issuer
            .validate_refresh_token(refresh_token)
            .map_err(|_| AuthError::InvalidCredentials)
            .and_then(|claims| {
                let subject = AuthSubject::decode(&claims.sub)?;
                if subject.client_id != caller.client_id {
                    return Err(AuthError::InvalidCredentials);
                }
                Ok(issuer.issue_access_token(&claims.sub, ACCESS_TOKEN_TTL)?)
            });
        match &result {
            Ok(_) => debug!(client = %caller.client_id, "Access token refreshed"),
            Err(e) => warn!(client = %caller.client_id, "Token refresh failed: {}", e),
        }
        result
    }
}
