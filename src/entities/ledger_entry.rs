//! Ledger entry entity - records that a transaction's delta reached an account balance.
//!
//! Keyed by transaction id, so the same delta can never be applied twice.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Ledger entry database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "ledger_entries")]
pub struct Model {
    /// Transaction whose delta was applied
    #[sea_orm(primary_key, auto_increment = false)]
    pub transaction_id: i64,
    /// Account that received the delta
    pub account_id: i64,
    /// Signed point delta
    pub delta: i64,
    /// When the delta was applied
    pub applied_at: DateTimeUtc,
}

/// `LedgerEntry` has no navigable relationships
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
