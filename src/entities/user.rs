//! User entity - Represents a loyalty program member.
//!
//! The `utorid` handle is immutable once created. Users are never physically deleted;
//! `activated` and `suspicious` are soft-state flags. `token_version` is bumped whenever a
//! security-relevant attribute changes so outstanding sessions can be invalidated.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// User database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    /// Unique identifier, also the id of the user's loyalty account
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Immutable login handle
    #[sea_orm(unique)]
    pub utorid: String,
    /// Display name
    pub name: String,
    /// Contact email
    pub email: String,
    /// Whether the account has been activated
    pub activated: bool,
    /// Whether the user is flagged for review
    pub suspicious: bool,
    /// Incremented on every security-relevant change
    pub token_version: i32,
    /// When the user was registered
    pub created_at: DateTimeUtc,
}

/// Defines relationships between User and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each user owns exactly one loyalty account
    #[sea_orm(has_one = "super::account::Entity")]
    Account,
    /// A user holds one or more roles
    #[sea_orm(has_many = "super::user_role::Entity")]
    Roles,
}

impl Related<super::account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl Related<super::user_role::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Roles.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
