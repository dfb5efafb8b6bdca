// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `userpass` authentication method
//!
//! Agents present `username` and `password`; the username becomes the client
//! id. Only salted SHA-256 digests of the passwords are kept, and digests are
//! compared in constant time. A single SHA-256 round is cheap to brute force,
//! so credential files must stay as private as the signing key.
//!
//! Credential files hold one `username:salthex:sha256hex` entry per line,
//! where the digest covers the salt followed by the password.
//! [`UserPassAuth::entry`] renders such a line. Blank lines and lines starting
//! with `#` are ignored.

use async_trait::async_trait;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::domain::auth::{AuthError, AuthMethod, Credentials};

pub const METHOD_NAME: &str = "userpass";

const SALT_LEN: usize = 16;
static UNKNOWN_USER_SALT: [u8; SALT_LEN] = [0; SALT_LEN];

#[derive(Debug, Error)]
pub enum UserPassFileError {
    #[error("could not read credential file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

struct StoredPassword {
    salt: Vec<u8>,
    digest: [u8; 32],
}

impl StoredPassword {
    fn new(password: &str) -> Self {
        let mut salt = vec![0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let digest = digest(&salt, password);
        Self { salt, digest }
    }
}

#[derive(Default)]
pub struct UserPassAuth {
    users: HashMap<String, StoredPassword>,
}

impl UserPassAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&mut self, username: impl Into<String>, password: &str) {
        self.users.insert(username.into(), StoredPassword::new(password));
    }

    /// Credential file line for `username` with a fresh random salt.
    pub fn entry(username: &str, password: &str) -> String {
        let stored = StoredPassword::new(password);
        format!(
            "{}:{}:{}",
            username,
            hex::encode(&stored.salt),
            hex::encode(stored.digest)
        )
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, UserPassFileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| UserPassFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, UserPassFileError> {
        let mut auth = Self::new();
        for (index, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let malformed = |reason: &str| UserPassFileError::Malformed {
                line: index + 1,
                reason: reason.to_string(),
            };

            let mut fields = line.splitn(3, ':');
            let (Some(username), Some(hex_salt), Some(hex_digest)) =
                (fields.next(), fields.next(), fields.next())
            else {
                return Err(malformed("expected username:salthex:sha256hex"));
            };
            if username.is_empty() {
                return Err(malformed("empty username"));
            }
            let salt = hex::decode(hex_salt).map_err(|e| malformed(&e.to_string()))?;
            if salt.is_empty() {
                return Err(malformed("empty salt"));
            }
            let bytes = hex::decode(hex_digest).map_err(|e| malformed(&e.to_string()))?;
            let digest: [u8; 32] = bytes
                .try_into()
                .map_err(|_| malformed("digest must be 32 bytes"))?;
            auth.users
                .insert(username.to_string(), StoredPassword { salt, digest });
        }
        Ok(auth)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

fn digest(salt: &[u8], password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

#[async_trait]
impl AuthMethod for UserPassAuth {
    async fn authenticate(&self, credentials: &Credentials) -> Result<String, AuthError> {
        let username = credentials
            .get("username")
            .ok_or(AuthError::MissingCredential("username"))?;
        let password = credentials
            .get("password")
            .ok_or(AuthError::MissingCredential("password"))?;

        // Unknown users still pay for a digest and a comparison.
        let (salt, expected) = match self.users.get(username) {
            Some(stored) => (stored.salt.as_slice(), stored.digest),
            None => (UNKNOWN_USER_SALT.as_slice(), [0u8; 32]),
        };
        let presented = digest(salt, password);
        let matches: bool = presented[..].ct_eq(&expected[..]).into();

        if matches && self.users.contains_key(username) {
            Ok(username.clone())
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }
}
