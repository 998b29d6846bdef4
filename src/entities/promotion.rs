//! Promotion entity - bonus rules consulted when a purchase is created.
//!
//! A promotion rewards either a rate multiplier (`rate`) or a flat bonus (`points`); exactly
//! one of the two is set. Automatic promotions apply to every qualifying purchase, one-time
//! promotions at most once per user (see `promotion_usage`).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// How a promotion is triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum PromotionKind {
    /// Applies to every qualifying purchase
    #[sea_orm(string_value = "automatic")]
    Automatic,
    /// Must be requested and can be used once per user
    #[sea_orm(string_value = "one_time")]
    OneTime,
}

/// Promotion database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "promotions")]
pub struct Model {
    /// Unique identifier for the promotion
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Display name
    pub name: String,
    /// Trigger kind
    pub kind: PromotionKind,
    /// Multiplier on base points, e.g. `1.5`
    pub rate: Option<f64>,
    /// Flat bonus points
    pub points: Option<i64>,
    /// Minimum purchase amount in cents
    pub min_spending_cents: Option<i64>,
    /// Start of the validity window (inclusive)
    pub starts_at: DateTimeUtc,
    /// End of the validity window (exclusive)
    pub ends_at: DateTimeUtc,
}

/// Defines relationships between Promotion and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One-time promotions have per-user usage rows
    #[sea_orm(has_many = "super::promotion_usage::Entity")]
    Usages,
}

impl Related<super::promotion_usage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Usages.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
