// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::pkcs8::EncodePublicKey;
use rsa::RsaPrivateKey;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::auth::{IssuerError, TokenClaims, TokenIssuer};

const ACCESS_AUDIENCE: &str = "access";
const REFRESH_AUDIENCE: &str = "refresh";

/// RS256 JWT issuer backed by the principal's signing key
pub struct JwtIssuer {
    name: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtIssuer {
    pub fn new(name: impl Into<String>, key: &RsaPrivateKey) -> Result<Self, IssuerError> {
        let name = name.into();
        if name.is_empty() {
            return Err(IssuerError::EmptyName);
        }

        let private_pem = key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| IssuerError::InvalidKey(e.to_string()))?;
        let public_pem = key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| IssuerError::InvalidKey(e.to_string()))?;

        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| IssuerError::InvalidKey(e.to_string()))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| IssuerError::InvalidKey(e.to_string()))?;

        Ok(Self {
            name,
            encoding_key,
            decoding_key,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn issue(&self, subject: &str, audience: &str, ttl: Duration) -> Result<String, IssuerError> {
        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            iss: self.name.clone(),
            sub: subject.to_string(),
            aud: audience.to_string(),
            exp: now + ttl.as_secs() as i64,
            iat: now,
            nbf: now,
            jti: Uuid::new_v4().to_string(),
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| IssuerError::Signing(e.to_string()))
    }

    fn validate(&self, token: &str, audience: &str) -> Result<TokenClaims, IssuerError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.set_issuer(&[&self.name]);
        validation.set_audience(&[audience]);
        validation.validate_nbf = true;

        decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| IssuerError::InvalidToken(e.to_string()))
    }
}

impl TokenIssuer for JwtIssuer {
    fn issue_access_token(&self, subject: &str, ttl: Duration) -> Result<String, IssuerError> {
        self.issue(subject, ACCESS_AUDIENCE, ttl)
    }

    fn issue_refresh_token(&self, subject: &str, ttl: Duration) -> Result<String, IssuerError> {
        self.issue(subject, REFRESH_AUDIENCE, ttl)
    }

    fn validate_access_token(&self, token: &str) -> Result<TokenClaims, IssuerError> {
        self.validate(token, ACCESS_AUDIENCE)
    }

    fn validate_refresh_token(&self, token: &str) -> Result<TokenClaims, IssuerError> {
        self.validate(token, REFRESH_AUDIENCE)
    }
}
