//! User accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Role, UserId};

/// A persisted user profile.
///
/// Credentials live with the identity provider; the account holds the
/// profile fields a user can read and edit, plus the role last seen for
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: UserId,
    pub username: String,
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub const MAX_USERNAME_LEN: usize = 150;
    pub const MAX_NAME_LEN: usize = 150;
    pub const MAX_PHONE_LEN: usize = 20;

    /// A fresh account with a placeholder username derived from the id.
    pub fn new(user_id: UserId, role: Role, at: DateTime<Utc>) -> Self {
        let id = user_id.as_uuid().simple().to_string();
        Self {
            user_id,
            username: format!("user-{}", &id[..12]),
            email: None,
            first_name: String::new(),
            last_name: String::new(),
            phone: String::new(),
            role,
            created_at: at,
            updated_at: at,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
