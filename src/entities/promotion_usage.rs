//! Promotion usage entity - a user has claimed a one-time promotion.
//!
//! The composite primary key is what makes a second claim fail.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Promotion usage database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "promotion_usages")]
pub struct Model {
    /// The claimed promotion
    #[sea_orm(primary_key, auto_increment = false)]
    pub promotion_id: i64,
    /// The user who claimed it
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: i64,
    /// Purchase that claimed it
    pub transaction_id: i64,
    /// When it was claimed
    pub used_at: DateTimeUtc,
}

/// Defines relationships between `PromotionUsage` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each usage belongs to one promotion
    #[sea_orm(
        belongs_to = "super::promotion::Entity",
        from = "Column::PromotionId",
        to = "super::promotion::Column::Id"
    )]
    Promotion,
}

impl Related<super::promotion::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Promotion.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
