//! Promotions applied to a purchase, one row per (transaction, promotion).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Applied promotion database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transaction_promotions")]
pub struct Model {
    /// The purchase transaction
    #[sea_orm(primary_key, auto_increment = false)]
    pub transaction_id: i64,
    /// The promotion that contributed a bonus
    #[sea_orm(primary_key, auto_increment = false)]
    pub promotion_id: i64,
}

/// Applied promotions are looked up by id only
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
