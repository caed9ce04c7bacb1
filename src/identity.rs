use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Claim attached to an identity at sign-in. Moderation is granted by this
/// claim alone, never by comparing display names.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Member,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" => Ok(Role::Member),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role {other:?}")),
        }
    }
}

/// The signed-in user as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub role: Role,
}

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Identity {
        Identity {
            user_id: user_id.into(),
            handle: None,
            first_name: None,
            last_name: None,
            full_name: None,
            role: Role::Member,
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Identity {
        self.handle = Some(handle.into());
        self
    }

    pub fn with_role(mut self, role: Role) -> Identity {
        self.role = role;
        self
    }

    /// Handle, then "first last", then full name, then the opaque account id.
    pub fn display_name(&self) -> Option<String> {
        fn present(s: &Option<String>) -> Option<&str> {
            s.as_deref().map(str::trim).filter(|s| !s.is_empty())
        }

        if let Some(handle) = present(&self.handle) {
            return Some(handle.to_owned());
        }
        if let (Some(first), Some(last)) = (present(&self.first_name), present(&self.last_name)) {
            return Some(format!("{first} {last}"));
        }
        if let Some(full) = present(&self.full_name) {
            return Some(full.to_owned());
        }
        Some(self.user_id.trim())
            .filter(|id| !id.is_empty())
            .map(str::to_owned)
    }

    pub fn can_moderate(&self) -> bool {
        self.role == Role::Admin
    }
}
