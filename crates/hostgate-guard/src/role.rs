//! Caller roles and the authorization order over them
//!
//! Provides [`Role`] and [`RoleAuthorizer`]. The model is a single total
//! order: a caller may invoke anything whose required role is at or below
//! its own.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Privilege level claimed by a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Read-only inspection
    Observer,
    /// Start/stop running services, take backups
    Operator,
    /// Provision applications and run the release pipeline
    Builder,
    /// Destructive operations
    Admin,
}

impl Role {
    /// All roles, lowest first
    pub const ALL: [Role; 4] = [Role::Observer, Role::Operator, Role::Builder, Role::Admin];

    /// Numeric level in the total order
    #[inline]
    #[must_use]
    pub const fn level(self) -> u8 {
        match self {
            Role::Observer => 0,
            Role::Operator => 1,
            Role::Builder => 2,
            Role::Admin => 3,
        }
    }

    /// Wire name of the role
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Observer => "observer",
            Role::Operator => "operator",
            Role::Builder => "builder",
            Role::Admin => "admin",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Exact match only: "Admin" or " admin" are not valid claims.
        match s {
            "observer" => Ok(Role::Observer),
            "operator" => Ok(Role::Operator),
            "builder" => Ok(Role::Builder),
            "admin" => Ok(Role::Admin),
            other => Err(RoleError::Invalid(other.to_string())),
        }
    }
}

/// Decides whether a caller role dominates a required role
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleAuthorizer;

impl RoleAuthorizer {
    /// Create new authorizer
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Check `level(caller) >= level(required)`
    #[inline]
    #[must_use]
    pub fn permits(&self, caller: Role, required: Role) -> bool {
        caller.level() >= required.level()
    }

    /// Same as [`permits`](Self::permits) but returns a typed denial
    ///
    /// # Errors
    /// Returns [`RoleError::Insufficient`] carrying both roles
    pub fn authorize(&self, caller: Role, required: Role) -> Result<(), RoleError> {
        if self.permits(caller, required) {
            Ok(())
        } else {
            Err(RoleError::Insufficient {
                required,
                actual: caller,
            })
        }
    }
}

/// Errors related to roles
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoleError {
    /// Claimed role is not one of the four known roles
    #[error("invalid role: '{0}'")]
    Invalid(String),

    /// Caller role is below the required role
    #[error("insufficient permission: requires {required}, caller is {actual}")]
    Insufficient { required: Role, actual: Role },
}
