//! Resolution of bearer credentials to principals.

use std::collections::HashMap;

use async_trait::async_trait;
use common::{Principal, Role, UserId};
use thiserror::Error;

/// Validates bearer tokens. Token issuance and signing live elsewhere.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Returns the principal the token belongs to, or `None` if it is not valid.
    async fn authenticate(&self, token: &str) -> Option<Principal>;
}

/// A malformed `AUTH_TOKENS` entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid token entry '{entry}': {reason}")]
pub struct IdentityConfigError {
    pub entry: String,
    pub reason: String,
}

/// Identity provider backed by a fixed token table.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    tokens: HashMap<String, Principal>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a token, replacing any previous owner.
    pub fn with_token(mut self, token: impl Into<String>, principal: Principal) -> Self {
        self.tokens.insert(token.into(), principal);
        self
    }

    /// Parses a comma-separated list of `token:user-uuid:role` entries.
    ///
    /// The role part is optional and defaults to customer. Blank entries are
    /// skipped.
    pub fn parse(raw: &str) -> Result<Self, IdentityConfigError> {
        let mut provider = Self::new();

        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let invalid = |reason: String| IdentityConfigError {
                entry: entry.to_string(),
                reason,
            };

            let mut parts = entry.split(':');
            let token = parts
                .next()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| invalid("missing token".to_string()))?;
            let user_id: UserId = parts
                .next()
                .ok_or_else(|| invalid("missing user id".to_string()))?
                .parse()
                .map_err(|e: uuid::Error| invalid(e.to_string()))?;
            let role: Role = match parts.next() {
                Some(role) => role.parse().map_err(invalid)?,
                None => Role::default(),
            };
            if parts.next().is_some() {
                return Err(invalid("too many fields".to_string()));
            }

            provider.tokens.insert(token.to_string(), Principal { user_id, role });
        }

        Ok(provider)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn authenticate(&self, token: &str) -> Option<Principal> {
        self.tokens.get(token).copied()
    }
}
