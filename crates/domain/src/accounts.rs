//! User profiles: reading and editing the caller's own account.

use chrono::Utc;
use common::{Account, Principal};
use store::{ShopStore, StoreError};
use thiserror::Error;

use crate::access::AccessPolicy;
use crate::error::DomainError;

/// Errors raised by account operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountError {
    /// Rejected input; the message names the offending field.
    #[error("{0}")]
    Validation(String),

    #[error("username already taken: {0}")]
    UsernameTaken(String),

    #[error("email already taken: {0}")]
    EmailTaken(String),
}

/// Changes to a profile. `None` leaves a field as it is; an empty email
/// removes it.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
}

/// Profile reads and updates for authenticated callers.
///
/// An account is created on first access with a placeholder username. The
/// role always follows the identity provider; a stored role that differs is
/// overwritten.
pub struct AccountService<S: ShopStore> {
    store: S,
}

impl<S: ShopStore> AccountService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns the caller's account, creating it on first access.
    #[tracing::instrument(skip(self))]
    pub async fn profile(&self, principal: Option<&Principal>) -> Result<Account, DomainError> {
        let principal = AccessPolicy::require_authenticated(principal)?;
        self.load_or_create(principal).await
    }

    /// Applies `update` to the caller's account.
    #[tracing::instrument(skip(self, update))]
    pub async fn update_profile(
        &self,
        principal: Option<&Principal>,
        update: ProfileUpdate,
    ) -> Result<Account, DomainError> {
        let principal = AccessPolicy::require_authenticated(principal)?;
        let mut account = self.load_or_create(principal).await?;

        if let Some(username) = update.username {
            account.username = validate_username(&username)?;
        }
        if let Some(email) = update.email {
            account.email = validate_email(&email)?;
        }
        if let Some(first_name) = update.first_name {
            account.first_name = validate_name("first name", &first_name)?;
        }
        if let Some(last_name) = update.last_name {
            account.last_name = validate_name("last name", &last_name)?;
        }
        if let Some(phone) = update.phone {
            account.phone = validate_phone(&phone)?;
        }
        account.updated_at = Utc::now();

        match self.store.update_account(&account).await {
            Ok(_) => {}
            Err(StoreError::Duplicate { entity: "username", key }) => {
                return Err(AccountError::UsernameTaken(key).into());
            }
            Err(StoreError::Duplicate { entity: "email", key }) => {
                return Err(AccountError::EmailTaken(key).into());
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(user_id = %account.user_id, "Profile updated");
        Ok(account)
    }

    async fn load_or_create(&self, principal: &Principal) -> Result<Account, DomainError> {
        if let Some(mut account) = self.store.account(principal.user_id).await? {
            if account.role != principal.role {
                account.role = principal.role;
                account.updated_at = Utc::now();
                self.store.update_account(&account).await?;
            }
            return Ok(account);
        }

        let account = Account::new(principal.user_id, principal.role, Utc::now());
        match self.store.insert_account(&account).await {
            Ok(()) => {
                tracing::debug!(user_id = %account.user_id, "Account created");
                Ok(account)
            }
            // A concurrent first request created it.
            Err(StoreError::Duplicate { entity: "account", .. }) => self
                .store
                .account(principal.user_id)
                .await?
                .ok_or_else(|| {
                    StoreError::Corrupt(format!("account {} missing", principal.user_id)).into()
                }),
            Err(e) => Err(e.into()),
        }
    }
}

fn validate_username(raw: &str) -> Result<String, AccountError> {
    let username = raw.trim();
    if username.is_empty() || username.chars().count() > Account::MAX_USERNAME_LEN {
        return Err(AccountError::Validation(format!(
            "username must be 1 to {} characters",
            Account::MAX_USERNAME_LEN
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
    {
        return Err(AccountError::Validation(
            "username may only contain letters, digits and @.+-_".to_string(),
        ));
    }
    Ok(username.to_string())
}

fn validate_email(raw: &str) -> Result<Option<String>, AccountError> {
    let email = raw.trim();
    if email.is_empty() {
        return Ok(None);
    }
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(AccountError::Validation(format!("invalid email: {email}")));
    }
    Ok(Some(email.to_lowercase()))
}

fn validate_name(field: &str, raw: &str) -> Result<String, AccountError> {
    let name = raw.trim();
    if name.chars().count() > Account::MAX_NAME_LEN {
        return Err(AccountError::Validation(format!(
            "{field} must be at most {} characters",
            Account::MAX_NAME_LEN
        )));
    }
    Ok(name.to_string())
}

fn validate_phone(raw: &str) -> Result<String, AccountError> {
    let phone = raw.trim();
    if phone.chars().count() > Account::MAX_PHONE_LEN
        || !phone
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')'))
    {
        return Err(AccountError::Validation(format!("invalid phone: {phone}")));
    }
    Ok(phone.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames() {
        assert_eq!(validate_username("  alice.b+1 ").unwrap(), "alice.b+1");
        assert!(validate_username("").is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username(&"a".repeat(151)).is_err());
    }

    #[test]
    fn emails_are_optional_and_normalized() {
        assert_eq!(validate_email(" ").unwrap(), None);
        assert_eq!(
            validate_email("Alice@Example.com").unwrap().as_deref(),
            Some("alice@example.com")
        );
        for bad in ["alice", "@example.com", "alice@example", "a@b@c.com", "a b@c.com"] {
            assert!(validate_email(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn phones() {
        assert_eq!(validate_phone("+1 (555) 010-0100").unwrap(), "+1 (555) 010-0100");
        assert_eq!(validate_phone("").unwrap(), "");
        assert!(validate_phone("call me").is_err());
        assert!(validate_phone(&"1".repeat(21)).is_err());
    }
}
