//! Role authority - the single place authorization decisions are made.
//!
//! Roles form a total order `regular < cashier < manager < superuser`. Every mutating
//! operation in the crate routes its permission check through the functions here before
//! touching any ledger state.

use crate::errors::{Error, Result};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A role held by a user
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Ordinary member
    #[sea_orm(string_value = "regular")]
    Regular,
    /// Rings up purchases and processes redemptions
    #[sea_orm(string_value = "cashier")]
    Cashier,
    /// Adjusts balances, manages promotions and events
    #[sea_orm(string_value = "manager")]
    Manager,
    /// Unrestricted
    #[sea_orm(string_value = "superuser")]
    Superuser,
}

/// Every role, lowest rank first.
pub const ALL_ROLES: [Role; 4] = [Role::Regular, Role::Cashier, Role::Manager, Role::Superuser];

impl Role {
    /// Position of the role in the hierarchy, 1 (regular) through 4 (superuser).
    #[must_use]
    pub const fn rank(self) -> i32 {
        match self {
            Self::Regular => 1,
            Self::Cashier => 2,
            Self::Manager => 3,
            Self::Superuser => 4,
        }
    }

    /// Lowercase name as stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Cashier => "cashier",
            Self::Manager => "manager",
            Self::Superuser => "superuser",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ALL_ROLES
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::validation(format!("unknown role '{s}'")))
    }
}

/// The authenticated caller of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    /// Id of the calling user
    pub user_id: i64,
    /// Effective (highest) role of the caller
    pub role: Role,
}

impl Actor {
    /// Creates an actor from a user id and effective role.
    #[must_use]
    pub const fn new(user_id: i64, role: Role) -> Self {
        Self { user_id, role }
    }

    /// True when the actor holds at least `minimum`.
    #[must_use]
    pub const fn at_least(&self, minimum: Role) -> bool {
        self.role.rank() >= minimum.rank()
    }
}

/// Rank of a role. See [`Role::rank`].
#[must_use]
pub const fn rank(role: Role) -> i32 {
    role.rank()
}

/// An actor may view a target of equal or lower rank; a superuser may view anyone.
#[must_use]
pub const fn can_view(actor: Role, target: Role) -> bool {
    matches!(actor, Role::Superuser) || actor.rank() >= target.rank()
}

/// An actor may modify only a target of strictly lower rank; a superuser may modify anyone.
#[must_use]
pub const fn can_modify(actor: Role, target: Role) -> bool {
    matches!(actor, Role::Superuser) || actor.rank() > target.rank()
}

/// Roles an actor is allowed to grant.
#[must_use]
pub fn assignable_roles(actor: Role) -> Vec<Role> {
    match actor {
        Role::Superuser => ALL_ROLES.to_vec(),
        Role::Manager => vec![Role::Regular, Role::Cashier],
        Role::Cashier | Role::Regular => vec![Role::Regular],
    }
}

/// Fails with [`Error::Authorization`] when `actor` ranks below `minimum`.
pub fn require_role(actor: Role, minimum: Role) -> Result<()> {
    if actor.rank() < minimum.rank() {
        tracing::warn!(%actor, %minimum, "Rejected operation: role rank insufficient");
        return Err(Error::authorization(format!(
            "requires role {minimum} or higher, caller is {actor}"
        )));
    }
    Ok(())
}
