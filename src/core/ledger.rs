//! Account ledger - the only code that changes a cached point balance.
//!
//! [`apply`] runs inside the caller's unit of work (a `DatabaseTransaction` or a plain
//! connection) and is idempotent per transaction id: the `ledger_entries` row written
//! alongside the balance update marks the delta as applied. The balance update itself is a
//! single conditional `UPDATE`, so concurrent writers cannot lose updates or push a balance
//! below zero.

use crate::{
    entities::{
        Account, AccountModel, LedgerEntry, Transaction, TransactionStatus, account,
        ledger_entry, transaction,
    },
    errors::{Error, Result},
};
use sea_orm::{Set, prelude::*, sea_query::Expr};
use tracing::{debug, trace};

/// Result of [`apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The delta was applied; carries the new balance
    Applied {
        /// Balance after the delta
        balance: i64,
    },
    /// A delta for this transaction id was applied earlier; nothing changed
    AlreadyApplied,
}

/// Cached balance next to the balance recomputed from posted transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    /// Account that was checked
    pub account_id: i64,
    /// `points_cached` as stored
    pub cached: i64,
    /// Sum of `points_posted` over the account's posted transactions
    pub posted_sum: i64,
}

impl Reconciliation {
    /// True when the cached balance matches the transaction history.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.cached == self.posted_sum
    }
}

/// Creates the zero-balance account for a user. The account shares the user's id.
pub async fn open_account<C>(db: &C, user_id: i64) -> Result<AccountModel>
where
    C: ConnectionTrait,
{
    let model = account::ActiveModel {
        id: Set(user_id),
        points_cached: Set(0),
    };
    Account::insert(model).exec_without_returning(db).await?;
    debug!(account_id = user_id, "Opened loyalty account");
    find_account(db, user_id).await
}

async fn find_account<C>(db: &C, account_id: i64) -> Result<AccountModel>
where
    C: ConnectionTrait,
{
    Account::find_by_id(account_id)
        .one(db)
        .await?
        .ok_or(Error::NotFound {
            entity: "account",
            id: account_id,
        })
}

/// Applies a signed point delta to an account on behalf of `transaction_id`.
///
/// Re-applying the same transaction id is a no-op. A debit that would leave the balance
/// negative fails with [`Error::InsufficientBalance`] and changes nothing.
pub async fn apply<C>(
    db: &C,
    account_id: i64,
    delta: i64,
    transaction_id: i64,
) -> Result<ApplyOutcome>
where
    C: ConnectionTrait,
{
    if LedgerEntry::find_by_id(transaction_id).one(db).await?.is_some() {
        debug!(
            account_id,
            transaction_id, "Ledger delta already applied, skipping"
        );
        return Ok(ApplyOutcome::AlreadyApplied);
    }

    // balance = balance + delta, only if the result stays non-negative
    let result = Account::update_many()
        .col_expr(
            account::Column::PointsCached,
            Expr::col(account::Column::PointsCached).add(delta),
        )
        .filter(account::Column::Id.eq(account_id))
        .filter(account::Column::PointsCached.gte(-delta))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        let account = find_account(db, account_id).await?;
        return Err(Error::InsufficientBalance {
            available: account.points_cached,
            required: -delta,
        });
    }

    let entry = ledger_entry::ActiveModel {
        transaction_id: Set(transaction_id),
        account_id: Set(account_id),
        delta: Set(delta),
        applied_at: Set(chrono::Utc::now()),
    };
    LedgerEntry::insert(entry).exec_without_returning(db).await?;

    let balance = balance_of(db, account_id).await?;
    trace!(account_id, delta, transaction_id, balance, "Applied ledger delta");
    Ok(ApplyOutcome::Applied { balance })
}

/// Current committed balance of an account.
pub async fn balance_of<C>(db: &C, account_id: i64) -> Result<i64>
where
    C: ConnectionTrait,
{
    Ok(find_account(db, account_id).await?.points_cached)
}

/// Recomputes an account's balance from its posted transactions.
pub async fn reconcile<C>(db: &C, account_id: i64) -> Result<Reconciliation>
where
    C: ConnectionTrait,
{
    let cached = balance_of(db, account_id).await?;
    let posted_sum = Transaction::find()
        .filter(transaction::Column::AccountId.eq(account_id))
        .filter(transaction::Column::Status.eq(TransactionStatus::Posted))
        .all(db)
        .await?
        .iter()
        .filter_map(|t| t.points_posted)
        .sum();

    Ok(Reconciliation {
        account_id,
        cached,
        posted_sum,
    })
}

/// Reconciles every account, in id order.
pub async fn reconcile_all<C>(db: &C) -> Result<Vec<Reconciliation>>
where
    C: ConnectionTrait,
{
    let ids: Vec<i64> = Account::find()
        .all(db)
        .await?
        .into_iter()
        .map(|a| a.id)
        .collect();

    let mut reports = Vec::with_capacity(ids.len());
    for id in ids {
        reports.push(reconcile(db, id).await?);
    }
    reports.sort_by_key(|r| r.account_id);
    Ok(reports)
}
