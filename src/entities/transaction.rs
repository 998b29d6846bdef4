//! Transaction entity - the append-only record of every point movement.
//!
//! The row is deliberately wide so all kinds share one table; the typed view lives in
//! [`crate::core::transaction::TransactionDetails`]. Once `posted`, a row only changes
//! through the advisory `suspicious` review flag.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// The kind of point movement a transaction records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Points earned by spending money at a cashier
    #[sea_orm(string_value = "purchase")]
    Purchase,
    /// One side of a user-to-user transfer
    #[sea_orm(string_value = "transfer")]
    Transfer,
    /// Points spent by the account owner
    #[sea_orm(string_value = "redemption")]
    Redemption,
    /// Manager correction
    #[sea_orm(string_value = "adjustment")]
    Adjustment,
    /// Points awarded from an event pool
    #[sea_orm(string_value = "event")]
    Event,
}

/// Lifecycle status of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Applied to the ledger; terminal
    #[sea_orm(string_value = "posted")]
    Posted,
    /// A redemption waiting for a cashier
    #[sea_orm(string_value = "pending_verification")]
    PendingVerification,
    /// A redemption abandoned by its owner; terminal
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

/// Transaction database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    /// Unique identifier for the transaction
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Kind of movement
    pub kind: TransactionKind,
    /// Lifecycle status
    pub status: TransactionStatus,
    /// The balance-bearing account
    pub account_id: i64,
    /// User who created the transaction
    pub created_by: i64,
    /// Cashier who rang up a purchase or processed a redemption
    pub cashier_id: Option<i64>,
    /// Manager who made an adjustment
    pub manager_id: Option<i64>,
    /// Purchase amount in cents
    pub total_cents: Option<i64>,
    /// Points computed at creation time
    pub points_calculated: i64,
    /// Points actually applied; `None` until posted
    pub points_posted: Option<i64>,
    /// Corrected transaction, paired transfer row, or awarding event
    pub related_id: Option<i64>,
    /// Advisory review flag
    pub suspicious: bool,
    /// Free-text remark
    pub notes: String,
    /// When the transaction was created
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Transaction and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each transaction belongs to one account
    #[sea_orm(
        belongs_to = "super::account::Entity",
        from = "Column::AccountId",
        to = "super::account::Column::Id"
    )]
    Account,
}

impl Related<super::account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
