//! Redemption lifecycle: `pending_verification` to `posted` or `cancelled`.
//!
//! Both end states are terminal. Every transition is a conditional `UPDATE` on the current
//! status, so of two concurrent processors exactly one wins and the other sees a conflict.

use crate::{
    context::LedgerContext,
    core::{
        ledger,
        role::{self, Actor, Role},
        transaction::{LedgerTransaction, find_transaction},
    },
    entities::{Transaction, TransactionKind, TransactionModel, TransactionStatus, transaction},
    errors::{Error, Result},
};
use sea_orm::{QueryOrder, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::{info, instrument, warn};

fn require_pending_redemption(model: &TransactionModel) -> Result<()> {
    if model.kind != TransactionKind::Redemption {
        return Err(Error::validation(format!(
            "transaction {} is a {:?}, not a redemption",
            model.id, model.kind
        )));
    }
    if model.status != TransactionStatus::PendingVerification {
        return Err(Error::conflict(format!(
            "redemption {} already processed ({:?})",
            model.id, model.status
        )));
    }
    Ok(())
}

/// Moves a pending redemption to `posted`, recording the processor and the debit.
///
/// The `UPDATE` only matches while the row is still pending, so a processor working from a
/// stale read gets [`Error::Conflict`] instead of a second debit.
async fn mark_posted<C>(db: &C, pending: &TransactionModel, cashier_id: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    let claimed = Transaction::update_many()
        .col_expr(
            transaction::Column::Status,
            Expr::value(TransactionStatus::Posted),
        )
        .col_expr(
            transaction::Column::PointsPosted,
            Expr::value(pending.points_calculated),
        )
        .col_expr(transaction::Column::CashierId, Expr::value(cashier_id))
        .filter(transaction::Column::Id.eq(pending.id))
        .filter(transaction::Column::Status.eq(TransactionStatus::PendingVerification))
        .exec(db)
        .await?;
    if claimed.rows_affected == 0 {
        return Err(Error::conflict(format!(
            "redemption {} already processed",
            pending.id
        )));
    }
    Ok(())
}

/// Moves a pending redemption to `cancelled`; same guard as [`mark_posted`].
async fn mark_cancelled<C>(db: &C, transaction_id: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    let cancelled = Transaction::update_many()
        .col_expr(
            transaction::Column::Status,
            Expr::value(TransactionStatus::Cancelled),
        )
        .filter(transaction::Column::Id.eq(transaction_id))
        .filter(transaction::Column::Status.eq(TransactionStatus::PendingVerification))
        .exec(db)
        .await?;
    if cancelled.rows_affected == 0 {
        return Err(Error::conflict(format!(
            "redemption {transaction_id} already processed"
        )));
    }
    Ok(())
}

/// Debits a pending redemption. Requires cashier or higher.
///
/// The balance is checked again at processing time; if it no longer covers the amount the
/// redemption stays pending and [`Error::InsufficientBalance`] is returned.
#[instrument(skip(ctx), fields(cashier = actor.user_id))]
pub async fn process(
    ctx: &LedgerContext,
    actor: &Actor,
    transaction_id: i64,
) -> Result<LedgerTransaction> {
    role::require_role(actor.role, Role::Cashier)?;

    let txn = ctx.database.begin().await?;
    let pending = find_transaction(&txn, transaction_id).await?;
    require_pending_redemption(&pending)?;

    let amount = -pending.points_calculated;
    let available = ledger::balance_of(&txn, pending.account_id).await?;
    if available < amount {
        warn!(
            transaction_id,
            available, amount, "Redemption no longer covered by balance"
        );
        return Err(Error::InsufficientBalance {
            available,
            required: amount,
        });
    }

    mark_posted(&txn, &pending, actor.user_id).await?;
    ledger::apply(
        &txn,
        pending.account_id,
        pending.points_calculated,
        transaction_id,
    )
    .await?;
    let processed = find_transaction(&txn, transaction_id).await?;
    txn.commit().await?;
    ctx.cache.invalidate_accounts(&[processed.account_id]).await;

    info!(transaction_id, amount, "Processed redemption");
    LedgerTransaction::from_model(processed, Vec::new())
}

/// Withdraws a pending redemption. Only the owner may cancel; balances are untouched.
#[instrument(skip(ctx), fields(user = actor.user_id))]
pub async fn cancel(
    ctx: &LedgerContext,
    actor: &Actor,
    transaction_id: i64,
) -> Result<LedgerTransaction> {
    let txn = ctx.database.begin().await?;
    let pending = find_transaction(&txn, transaction_id).await?;
    if pending.account_id != actor.user_id {
        return Err(Error::authorization(format!(
            "only the owner may cancel redemption {transaction_id}"
        )));
    }
    require_pending_redemption(&pending)?;

    mark_cancelled(&txn, transaction_id).await?;

    let model = find_transaction(&txn, transaction_id).await?;
    txn.commit().await?;
    ctx.cache.invalidate_accounts(&[model.account_id]).await;

    info!(transaction_id, "Cancelled redemption");
    LedgerTransaction::from_model(model, Vec::new())
}

/// Pending redemptions, oldest first. Requires cashier or higher.
pub async fn list_pending(ctx: &LedgerContext, actor: &Actor) -> Result<Vec<LedgerTransaction>> {
    role::require_role(actor.role, Role::Cashier)?;

    Transaction::find()
        .filter(transaction::Column::Kind.eq(TransactionKind::Redemption))
        .filter(transaction::Column::Status.eq(TransactionStatus::PendingVerification))
        .order_by_asc(transaction::Column::Id)
        .all(&ctx.database)
        .await?
        .into_iter()
        .map(|model| LedgerTransaction::from_model(model, Vec::new()))
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::transaction::{
        PurchaseRequest, TransactionDetails, create_purchase, create_redemption_request,
    };
    use crate::test_utils::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    #[tokio::test]
    async fn test_process_requires_cashier() -> Result<()> {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        let ctx = test_context(db);

        let result = process(&ctx, &Actor::new(1, Role::Regular), 10).await;
        assert!(matches!(result.unwrap_err(), Error::Authorization { .. }));

        let result = list_pending(&ctx, &Actor::new(1, Role::Regular)).await;
        assert!(matches!(result.unwrap_err(), Error::Authorization { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_redeem_with_concurrent_purchase() -> Result<()> {
        let (ctx, staff) = setup_with_staff().await?;
        let customer = create_test_user(&ctx.database, "cust0001", Role::Regular).await?;
        fund_account(&ctx, &staff.manager, customer.user_id, 500).await?;

        let request = create_redemption_request(&ctx, &customer, 500, String::new()).await?;
        assert_eq!(ledger::balance_of(&ctx.database, customer.user_id).await?, 500);

        let purchase = PurchaseRequest {
            spender_id: customer.user_id,
            total_cents: 100,
            ..PurchaseRequest::default()
        };
        create_purchase(&ctx, &staff.cashier, purchase).await?;
        assert_eq!(ledger::balance_of(&ctx.database, customer.user_id).await?, 525);

        let processed = process(&ctx, &staff.cashier, request.id).await?;
        assert_eq!(processed.status, TransactionStatus::Posted);
        assert_eq!(processed.points_posted, Some(-500));
        assert_eq!(
            processed.details,
            TransactionDetails::Redemption {
                processed_by: Some(staff.cashier.user_id)
            }
        );
        assert_eq!(ledger::balance_of(&ctx.database, customer.user_id).await?, 25);

        let again = process(&ctx, &staff.cashier, request.id).await;
        assert!(again.unwrap_err().is_conflict());
        assert_eq!(ledger::balance_of(&ctx.database, customer.user_id).await?, 25);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_processing_has_one_winner() -> Result<()> {
        let (ctx, staff) = setup_with_staff().await?;
        let customer = create_test_user(&ctx.database, "cust0001", Role::Regular).await?;
        fund_account(&ctx, &staff.manager, customer.user_id, 300).await?;
        let request = create_redemption_request(&ctx, &customer, 200, String::new()).await?;

        let (first, second) = tokio::join!(
            process(&ctx, &staff.cashier, request.id),
            process(&ctx, &staff.manager, request.id)
        );

        let outcomes = [first, second];
        let wins = outcomes.iter().filter(|r| r.is_ok()).count();
        let conflicts = outcomes
            .iter()
            .filter(|r| r.as_ref().is_err_and(Error::is_conflict))
            .count();
        assert_eq!(wins, 1);
        assert_eq!(conflicts, 1);
        assert_eq!(ledger::balance_of(&ctx.database, customer.user_id).await?, 100);
        assert!(ledger::reconcile(&ctx.database, customer.user_id).await?.is_consistent());
        Ok(())
    }

    #[tokio::test]
    async fn test_process_rechecks_balance() -> Result<()> {
        let (ctx, staff) = setup_with_staff().await?;
        let customer = create_test_user(&ctx.database, "cust0001", Role::Regular).await?;
        fund_account(&ctx, &staff.manager, customer.user_id, 100).await?;
        let request = create_redemption_request(&ctx, &customer, 100, String::new()).await?;

        // Balance drops after the request was filed
        fund_account(&ctx, &staff.manager, customer.user_id, -60).await?;

        let result = process(&ctx, &staff.cashier, request.id).await;
        assert!(matches!(
            result.unwrap_err(),
            Error::InsufficientBalance {
                available: 40,
                required: 100
            }
        ));

        // Still pending and untouched
        let pending = list_pending(&ctx, &staff.cashier).await?;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, request.id);
        assert_eq!(ledger::balance_of(&ctx.database, customer.user_id).await?, 40);
        Ok(())
    }

    #[tokio::test]
    async fn test_process_rejects_non_redemptions_and_missing() -> Result<()> {
        let (ctx, staff) = setup_with_staff().await?;
        let customer = create_test_user(&ctx.database, "cust0001", Role::Regular).await?;
        let adjustment = fund_account(&ctx, &staff.manager, customer.user_id, 10).await?;

        let result = process(&ctx, &staff.cashier, adjustment.id).await;
        assert!(matches!(result.unwrap_err(), Error::Validation { .. }));

        let result = process(&ctx, &staff.cashier, 999).await;
        assert!(matches!(
            result.unwrap_err(),
            Error::NotFound {
                entity: "transaction",
                id: 999
            }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_rules() -> Result<()> {
        let (ctx, staff) = setup_with_staff().await?;
        let customer = create_test_user(&ctx.database, "cust0001", Role::Regular).await?;
        fund_account(&ctx, &staff.manager, customer.user_id, 100).await?;
        let request = create_redemption_request(&ctx, &customer, 50, String::new()).await?;

        // Not even a manager may cancel someone else's request
        let result = cancel(&ctx, &staff.manager, request.id).await;
        assert!(matches!(result.unwrap_err(), Error::Authorization { .. }));

        let cancelled = cancel(&ctx, &customer, request.id).await?;
        assert_eq!(cancelled.status, TransactionStatus::Cancelled);
        assert_eq!(cancelled.points_posted, None);
        assert_eq!(ledger::balance_of(&ctx.database, customer.user_id).await?, 100);

        // Terminal states stay terminal
        assert!(cancel(&ctx, &customer, request.id).await.unwrap_err().is_conflict());
        assert!(
            process(&ctx, &staff.cashier, request.id)
                .await
                .unwrap_err()
                .is_conflict()
        );
        assert!(list_pending(&ctx, &staff.cashier).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_pending_read_cannot_post_twice() -> Result<()> {
        let (ctx, staff) = setup_with_staff().await?;
        let customer = create_test_user(&ctx.database, "cust0001", Role::Regular).await?;
        fund_account(&ctx, &staff.manager, customer.user_id, 300).await?;
        let request = create_redemption_request(&ctx, &customer, 200, String::new()).await?;

        // Both processors read the row while it is still pending
        let stale = find_transaction(&ctx.database, request.id).await?;
        assert_eq!(stale.status, TransactionStatus::PendingVerification);

        process(&ctx, &staff.cashier, request.id).await?;
        assert_eq!(ledger::balance_of(&ctx.database, customer.user_id).await?, 100);

        let result = mark_posted(&ctx.database, &stale, staff.manager.user_id).await;
        assert!(result.unwrap_err().is_conflict());
        let result = mark_cancelled(&ctx.database, request.id).await;
        assert!(result.unwrap_err().is_conflict());

        let row = find_transaction(&ctx.database, request.id).await?;
        assert_eq!(row.status, TransactionStatus::Posted);
        assert_eq!(row.cashier_id, Some(staff.cashier.user_id));
        assert_eq!(ledger::balance_of(&ctx.database, customer.user_id).await?, 100);
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_pending_read_cannot_post_after_cancel() -> Result<()> {
        let (ctx, staff) = setup_with_staff().await?;
        let customer = create_test_user(&ctx.database, "cust0001", Role::Regular).await?;
        fund_account(&ctx, &staff.manager, customer.user_id, 300).await?;
        let request = create_redemption_request(&ctx, &customer, 200, String::new()).await?;

        let stale = find_transaction(&ctx.database, request.id).await?;
        cancel(&ctx, &customer, request.id).await?;

        let result = mark_posted(&ctx.database, &stale, staff.cashier.user_id).await;
        assert!(result.unwrap_err().is_conflict());
        let row = find_transaction(&ctx.database, request.id).await?;
        assert_eq!(row.status, TransactionStatus::Cancelled);
        assert_eq!(row.points_posted, None);
        assert_eq!(ledger::balance_of(&ctx.database, customer.user_id).await?, 300);
        Ok(())
    }
}
