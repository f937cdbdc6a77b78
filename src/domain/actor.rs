use crate::error::{EntityRef, PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type UserId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Rider,
    Admin,
}

impl FromStr for Role {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "customer" => Ok(Self::Customer),
            "rider" => Ok(Self::Rider),
            "admin" => Ok(Self::Admin),
            other => Err(PipelineError::ValidationError(format!(
                "Unknown role '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Customer => "customer",
            Self::Rider => "rider",
            Self::Admin => "admin",
        };
        f.write_str(s)
    }
}

/// An authenticated caller, supplied by the identity provider.
///
/// Every pipeline operation receives one explicitly; nothing reads an
/// ambient "current user".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn customer(id: UserId) -> Self {
        Self {
            id,
            role: Role::Customer,
        }
    }

    pub fn rider(id: UserId) -> Self {
        Self {
            id,
            role: Role::Rider,
        }
    }

    pub fn admin(id: UserId) -> Self {
        Self {
            id,
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Fails with `Forbidden` on `target` unless the actor has `role`.
    pub fn require(&self, role: Role, target: EntityRef) -> Result<()> {
        if self.role == role {
            Ok(())
        } else {
            Err(PipelineError::Forbidden(target))
        }
    }

    /// Fails with `Forbidden` unless the actor is `owner` acting in `role`, or an admin.
    pub fn require_owner_or_admin(&self, role: Role, owner: UserId, target: EntityRef) -> Result<()> {
        if self.is_admin() || (self.role == role && self.id == owner) {
            Ok(())
        } else {
            Err(PipelineError::Forbidden(target))
        }
    }
}
