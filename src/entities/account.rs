//! Loyalty account entity - the cached point balance of one user.
//!
//! The account shares its id with the owning user. `points_cached` is only ever changed by
//! the ledger's apply primitive and always equals the sum of `points_posted` over the
//! account's posted transactions.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Loyalty account database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    /// Account id, equal to the owning user's id
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    /// Current balance in points
    pub points_cached: i64,
}

/// Defines relationships between Account and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each account belongs to one user
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::Id",
        to = "super::user::Column::Id"
    )]
    User,
    /// One account has many transactions
    #[sea_orm(has_many = "super::transaction::Entity")]
    Transactions,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transactions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
