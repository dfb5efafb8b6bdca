// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Authentication Gate
//
// Decides for every inbound call whether it may proceed. Bootstrap endpoints
// listed in NO_AUTH_ENDPOINTS are reachable without credentials; everything
// else must present `Authorization: Bearer <access token>` minted by the
// principal's token issuer.

pub mod userpass;

pub use userpass::UserPassAuth;

use std::sync::Arc;

use crate::domain::auth::{AuthError, AuthMethods, AuthSubject, TokenIssuer};

/// Endpoints reachable before an agent holds a token
pub const NO_AUTH_ENDPOINTS: [&str; 2] = [
    "/versionapi.Version/Version",
    "/authapi.Authentication/Authenticate",
];

/// Exact, case-sensitive membership test against [`NO_AUTH_ENDPOINTS`].
pub fn is_no_auth(endpoint: &str) -> bool {
    NO_AUTH_ENDPOINTS.contains(&endpoint)
}

pub struct AuthGate {
    methods: Arc<AuthMethods>,
    issuer: Arc<dyn TokenIssuer>,
}

impl AuthGate {
    pub fn new(methods: AuthMethods, issuer: Arc<dyn TokenIssuer>) -> Self {
        Self {
            methods: Arc::new(methods),
            issuer,
        }
    }

    pub fn is_no_auth(&self, endpoint: &str) -> bool {
        is_no_auth(endpoint)
    }

    pub fn issuer(&self) -> Arc<dyn TokenIssuer> {
        self.issuer.clone()
    }

    pub fn methods(&self) -> Arc<AuthMethods> {
        self.methods.clone()
    }

    /// Check a call to `endpoint` carrying the raw `authorization` header.
    ///
    /// Returns `Ok(None)` for bootstrap endpoints and the authenticated
    /// subject for everything else.
    pub fn authorize(
        &self,
        endpoint: &str,
        authorization: Option<&str>,
    ) -> Result<Option<AuthSubject>, AuthError> {
        if self.is_no_auth(endpoint) {
            return Ok(None);
        }

        let header = authorization.ok_or(AuthError::MissingToken)?;
        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MalformedHeader)?;

        let claims = self.issuer.validate_access_token(token)?;
        AuthSubject::decode(&claims.sub).map(Some)
    }
}
