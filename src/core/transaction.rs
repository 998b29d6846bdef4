//! Transaction factory - creation and lookup of every point movement.
//!
//! Each creation path runs in one database transaction: the row insert, the ledger delta
//! and any side records (promotion claims, the paired transfer row) commit together or not
//! at all. Rows are append-only; after commit only the redemption state machine changes a
//! status and managers may toggle the advisory `suspicious` flag.

use crate::{
    context::LedgerContext,
    core::{
        ledger, promotion,
        role::{self, Actor, Role},
        user,
    },
    entities::{
        Transaction, TransactionKind, TransactionModel, TransactionPromotion, TransactionStatus,
        transaction, transaction_promotion,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, instrument, warn};

/// Kind-specific fields of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionDetails {
    /// Points earned at a register
    Purchase {
        /// Cashier who rang the purchase up
        cashier_id: i64,
        /// Amount spent in cents
        total_cents: i64,
        /// Promotions that contributed bonus points
        promotion_ids: Vec<i64>,
    },
    /// One side of a transfer
    Transfer {
        /// The other side's transaction id
        counterpart_id: i64,
    },
    /// A redemption, processed or not
    Redemption {
        /// Cashier who processed it, once processed
        processed_by: Option<i64>,
    },
    /// A manager correction
    Adjustment {
        /// Manager who made it
        manager_id: i64,
        /// Transaction being corrected, if any
        corrects: Option<i64>,
    },
    /// An award from an event pool
    Event {
        /// The awarding event
        event_id: i64,
    },
}

/// Typed view of a transaction row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerTransaction {
    /// Transaction id
    pub id: i64,
    /// Lifecycle status
    pub status: TransactionStatus,
    /// The balance-bearing account
    pub account_id: i64,
    /// User who created it
    pub created_by: i64,
    /// Points computed at creation
    pub points_calculated: i64,
    /// Points applied to the ledger, once posted
    pub points_posted: Option<i64>,
    /// Advisory review flag
    pub suspicious: bool,
    /// Free-text remark
    pub notes: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Kind-specific fields
    pub details: TransactionDetails,
}

fn missing(model: &TransactionModel, field: &str) -> Error {
    Error::validation(format!(
        "{:?} transaction {} is missing {field}",
        model.kind, model.id
    ))
}

impl LedgerTransaction {
    /// Builds the typed view of a row. `promotion_ids` is only used for purchases.
    pub fn from_model(model: TransactionModel, promotion_ids: Vec<i64>) -> Result<Self> {
        let details = match model.kind {
            TransactionKind::Purchase => TransactionDetails::Purchase {
                cashier_id: model.cashier_id.ok_or_else(|| missing(&model, "cashier_id"))?,
                total_cents: model.total_cents.ok_or_else(|| missing(&model, "total_cents"))?,
                promotion_ids,
            },
            TransactionKind::Transfer => TransactionDetails::Transfer {
                counterpart_id: model.related_id.ok_or_else(|| missing(&model, "related_id"))?,
            },
            TransactionKind::Redemption => TransactionDetails::Redemption {
                processed_by: model.cashier_id,
            },
            TransactionKind::Adjustment => TransactionDetails::Adjustment {
                manager_id: model.manager_id.ok_or_else(|| missing(&model, "manager_id"))?,
                corrects: model.related_id,
            },
            TransactionKind::Event => TransactionDetails::Event {
                event_id: model.related_id.ok_or_else(|| missing(&model, "related_id"))?,
            },
        };

        Ok(Self {
            id: model.id,
            status: model.status,
            account_id: model.account_id,
            created_by: model.created_by,
            points_calculated: model.points_calculated,
            points_posted: model.points_posted,
            suspicious: model.suspicious,
            notes: model.notes,
            created_at: model.created_at,
            details,
        })
    }

    /// Kind of the transaction.
    #[must_use]
    pub const fn kind(&self) -> TransactionKind {
        match self.details {
            TransactionDetails::Purchase { .. } => TransactionKind::Purchase,
            TransactionDetails::Transfer { .. } => TransactionKind::Transfer,
            TransactionDetails::Redemption { .. } => TransactionKind::Redemption,
            TransactionDetails::Adjustment { .. } => TransactionKind::Adjustment,
            TransactionDetails::Event { .. } => TransactionKind::Event,
        }
    }
}

/// A row to insert as `posted`
#[derive(Debug, Clone)]
pub struct Posting {
    /// Kind of movement
    pub kind: TransactionKind,
    /// Account receiving the delta
    pub account_id: i64,
    /// Creating user
    pub created_by: i64,
    /// Cashier, for purchases
    pub cashier_id: Option<i64>,
    /// Manager, for adjustments
    pub manager_id: Option<i64>,
    /// Purchase amount in cents
    pub total_cents: Option<i64>,
    /// Signed point delta
    pub points: i64,
    /// Related transaction or event
    pub related_id: Option<i64>,
    /// Review flag
    pub suspicious: bool,
    /// Free-text remark
    pub notes: String,
}

impl Posting {
    /// A posting with only the required fields set.
    #[must_use]
    pub const fn new(kind: TransactionKind, account_id: i64, created_by: i64, points: i64) -> Self {
        Self {
            kind,
            account_id,
            created_by,
            cashier_id: None,
            manager_id: None,
            total_cents: None,
            points,
            related_id: None,
            suspicious: false,
            notes: String::new(),
        }
    }
}

async fn insert_posted<C>(db: &C, posting: Posting) -> Result<TransactionModel>
where
    C: ConnectionTrait,
{
    let model = transaction::ActiveModel {
        kind: Set(posting.kind),
        status: Set(TransactionStatus::Posted),
        account_id: Set(posting.account_id),
        created_by: Set(posting.created_by),
        cashier_id: Set(posting.cashier_id),
        manager_id: Set(posting.manager_id),
        total_cents: Set(posting.total_cents),
        points_calculated: Set(posting.points),
        points_posted: Set(Some(posting.points)),
        related_id: Set(posting.related_id),
        suspicious: Set(posting.suspicious),
        notes: Set(posting.notes),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    model.insert(db).await.map_err(Into::into)
}

/// Inserts a posted transaction and applies its delta to the ledger.
///
/// Must run inside the caller's unit of work; a ledger failure leaves the inserted row to
/// be rolled back with it.
pub async fn post_transaction<C>(db: &C, posting: Posting) -> Result<TransactionModel>
where
    C: ConnectionTrait,
{
    let model = insert_posted(db, posting).await?;
    let points = model.points_calculated;
    ledger::apply(db, model.account_id, points, model.id).await?;
    Ok(model)
}

fn require_positive(amount: i64, what: &str) -> Result<()> {
    if amount <= 0 {
        return Err(Error::validation(format!(
            "{what} must be positive, got {amount}"
        )));
    }
    Ok(())
}

/// Input for a purchase
#[derive(Debug, Clone, Default)]
pub struct PurchaseRequest {
    /// User whose account earns the points
    pub spender_id: i64,
    /// Amount spent in cents
    pub total_cents: i64,
    /// One-time promotions the customer wants to use
    pub promotion_ids: Vec<i64>,
    /// Free-text remark
    pub notes: String,
}

/// Rings up a purchase. Requires cashier or higher.
///
/// Base points follow the context's points policy; eligible promotions add a bonus. A
/// purchase for a suspicious user still posts but is flagged for review.
#[instrument(skip(ctx, request), fields(spender = request.spender_id, cents = request.total_cents))]
pub async fn create_purchase(
    ctx: &LedgerContext,
    actor: &Actor,
    request: PurchaseRequest,
) -> Result<LedgerTransaction> {
    role::require_role(actor.role, Role::Cashier)?;
    require_positive(request.total_cents, "purchase amount")?;
    let base_points = ctx.policy.base_points(request.total_cents)?;

    let now = Utc::now();
    let txn = ctx.database.begin().await?;

    let spender = user::get_user(&txn, request.spender_id).await?;
    let candidates = promotion::candidates(&txn, &request.promotion_ids, now).await?;
    let bonus = promotion::compute_bonus(
        &txn,
        spender.id,
        request.total_cents,
        base_points,
        &candidates,
        now,
    )
    .await?;

    let posting = Posting {
        cashier_id: Some(actor.user_id),
        total_cents: Some(request.total_cents),
        suspicious: spender.suspicious,
        notes: request.notes,
        ..Posting::new(
            TransactionKind::Purchase,
            spender.id,
            actor.user_id,
            base_points + bonus.bonus_points,
        )
    };
    let model = post_transaction(&txn, posting).await?;

    promotion::record_usage(&txn, spender.id, model.id, &bonus.one_time_claims).await?;
    for &promotion_id in &bonus.applied {
        TransactionPromotion::insert(transaction_promotion::ActiveModel {
            transaction_id: Set(model.id),
            promotion_id: Set(promotion_id),
        })
        .exec_without_returning(&txn)
        .await?;
    }

    txn.commit().await?;
    ctx.cache.invalidate_accounts(&[spender.id]).await;

    if spender.suspicious {
        warn!(
            transaction_id = model.id,
            user_id = spender.id,
            "Purchase by suspicious user posted and flagged for review"
        );
    }
    info!(
        transaction_id = model.id,
        points = model.points_calculated,
        bonus = bonus.bonus_points,
        "Posted purchase"
    );
    LedgerTransaction::from_model(model, bonus.applied)
}

/// Input for a transfer
#[derive(Debug, Clone, Default)]
pub struct TransferRequest {
    /// User receiving the points
    pub recipient_id: i64,
    /// Points to move
    pub amount: i64,
    /// Free-text remark
    pub notes: String,
}

/// Both rows of a completed transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    /// Sender's row, negative points
    pub sent: LedgerTransaction,
    /// Recipient's row, positive points
    pub received: LedgerTransaction,
}

/// Moves points from the actor to another user.
///
/// Two linked rows are written and both ledger deltas applied in ascending account-id
/// order inside one unit of work, so either both sides happen or neither does.
#[instrument(skip(ctx, request), fields(sender = actor.user_id, recipient = request.recipient_id))]
pub async fn create_transfer(
    ctx: &LedgerContext,
    actor: &Actor,
    request: TransferRequest,
) -> Result<TransferReceipt> {
    require_positive(request.amount, "transfer amount")?;
    if request.recipient_id == actor.user_id {
        return Err(Error::validation("cannot transfer points to yourself"));
    }

    let txn = ctx.database.begin().await?;
    let sender = user::get_user(&txn, actor.user_id).await?;
    let recipient = user::get_user(&txn, request.recipient_id).await?;

    let available = ledger::balance_of(&txn, sender.id).await?;
    if available < request.amount {
        return Err(Error::InsufficientBalance {
            available,
            required: request.amount,
        });
    }

    let sent = insert_posted(
        &txn,
        Posting {
            notes: request.notes.clone(),
            ..Posting::new(TransactionKind::Transfer, sender.id, sender.id, -request.amount)
        },
    )
    .await?;
    let received = insert_posted(
        &txn,
        Posting {
            related_id: Some(sent.id),
            notes: request.notes,
            ..Posting::new(TransactionKind::Transfer, recipient.id, sender.id, request.amount)
        },
    )
    .await?;
    let mut sent_active: transaction::ActiveModel = sent.into();
    sent_active.related_id = Set(Some(received.id));
    let sent = sent_active.update(&txn).await?;

    let mut deltas = [
        (sent.account_id, sent.points_calculated, sent.id),
        (received.account_id, received.points_calculated, received.id),
    ];
    deltas.sort_by_key(|(account_id, _, _)| *account_id);
    for (account_id, delta, transaction_id) in deltas {
        ledger::apply(&txn, account_id, delta, transaction_id).await?;
    }

    txn.commit().await?;
    ctx.cache.invalidate_accounts(&[sender.id, recipient.id]).await;

    info!(
        sent_id = sent.id,
        received_id = received.id,
        amount = request.amount,
        "Posted transfer"
    );
    Ok(TransferReceipt {
        sent: LedgerTransaction::from_model(sent, Vec::new())?,
        received: LedgerTransaction::from_model(received, Vec::new())?,
    })
}

/// Input for a manager adjustment
#[derive(Debug, Clone, Default)]
pub struct AdjustmentRequest {
    /// User whose balance is adjusted
    pub account_id: i64,
    /// Signed, non-zero point delta
    pub amount: i64,
    /// Transaction being corrected; must belong to the same account
    pub related_id: Option<i64>,
    /// Free-text remark
    pub notes: String,
}

/// Applies a manager correction. Requires manager or higher.
///
/// The balance may be driven to zero but never below.
#[instrument(skip(ctx, request), fields(account = request.account_id, amount = request.amount))]
pub async fn create_adjustment(
    ctx: &LedgerContext,
    actor: &Actor,
    request: AdjustmentRequest,
) -> Result<LedgerTransaction> {
    role::require_role(actor.role, Role::Manager)?;
    if request.amount == 0 {
        return Err(Error::validation("adjustment amount cannot be zero"));
    }

    let txn = ctx.database.begin().await?;
    let target = user::get_user(&txn, request.account_id).await?;

    if let Some(related_id) = request.related_id {
        let related = find_transaction(&txn, related_id).await?;
        if related.account_id != target.id {
            return Err(Error::validation(format!(
                "transaction {related_id} does not belong to account {}",
                target.id
            )));
        }
    }

    let posting = Posting {
        manager_id: Some(actor.user_id),
        related_id: request.related_id,
        notes: request.notes,
        ..Posting::new(TransactionKind::Adjustment, target.id, actor.user_id, request.amount)
    };
    let model = post_transaction(&txn, posting).await?;
    txn.commit().await?;
    ctx.cache.invalidate_accounts(&[target.id]).await;

    info!(
        transaction_id = model.id,
        amount = request.amount,
        "Posted adjustment"
    );
    LedgerTransaction::from_model(model, Vec::new())
}

/// Files a redemption request for the actor's own account.
///
/// The balance must cover the amount now, but nothing is debited until a cashier
/// processes the request.
#[instrument(skip(ctx, notes), fields(user = actor.user_id))]
pub async fn create_redemption_request(
    ctx: &LedgerContext,
    actor: &Actor,
    amount: i64,
    notes: String,
) -> Result<LedgerTransaction> {
    require_positive(amount, "redemption amount")?;

    let txn = ctx.database.begin().await?;
    let available = ledger::balance_of(&txn, actor.user_id).await?;
    if available < amount {
        return Err(Error::InsufficientBalance {
            available,
            required: amount,
        });
    }

    let model = transaction::ActiveModel {
        kind: Set(TransactionKind::Redemption),
        status: Set(TransactionStatus::PendingVerification),
        account_id: Set(actor.user_id),
        created_by: Set(actor.user_id),
        cashier_id: Set(None),
        manager_id: Set(None),
        total_cents: Set(None),
        points_calculated: Set(-amount),
        points_posted: Set(None),
        related_id: Set(None),
        suspicious: Set(false),
        notes: Set(notes),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;
    txn.commit().await?;
    ctx.cache.invalidate_accounts(&[actor.user_id]).await;

    info!(transaction_id = model.id, amount, "Filed redemption request");
    LedgerTransaction::from_model(model, Vec::new())
}

/// Fetches a raw transaction row.
pub async fn find_transaction<C>(db: &C, transaction_id: i64) -> Result<TransactionModel>
where
    C: ConnectionTrait,
{
    Transaction::find_by_id(transaction_id)
        .one(db)
        .await?
        .ok_or(Error::NotFound {
            entity: "transaction",
            id: transaction_id,
        })
}

async fn promotion_ids_for<C>(db: &C, transaction_ids: &[i64]) -> Result<HashMap<i64, Vec<i64>>>
where
    C: ConnectionTrait,
{
    if transaction_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = TransactionPromotion::find()
        .filter(transaction_promotion::Column::TransactionId.is_in(transaction_ids.to_vec()))
        .order_by_asc(transaction_promotion::Column::PromotionId)
        .all(db)
        .await?;

    let mut by_transaction: HashMap<i64, Vec<i64>> = HashMap::new();
    for row in rows {
        by_transaction
            .entry(row.transaction_id)
            .or_default()
            .push(row.promotion_id);
    }
    Ok(by_transaction)
}

async fn to_typed<C>(db: &C, models: Vec<TransactionModel>) -> Result<Vec<LedgerTransaction>>
where
    C: ConnectionTrait,
{
    let purchase_ids: Vec<i64> = models
        .iter()
        .filter(|m| m.kind == TransactionKind::Purchase)
        .map(|m| m.id)
        .collect();
    let mut promotions = promotion_ids_for(db, &purchase_ids).await?;

    models
        .into_iter()
        .map(|model| {
            let ids = promotions.remove(&model.id).unwrap_or_default();
            LedgerTransaction::from_model(model, ids)
        })
        .collect()
}

/// Returns a transaction if the actor may see it.
///
/// Owners, creators and transfer counterparties always may; staff (cashier or higher)
/// may when their role can view the owner's role.
pub async fn get_transaction(
    ctx: &LedgerContext,
    actor: &Actor,
    transaction_id: i64,
) -> Result<LedgerTransaction> {
    let db = &ctx.database;
    let model = find_transaction(db, transaction_id).await?;

    let mut involved = model.account_id == actor.user_id || model.created_by == actor.user_id;
    if !involved && model.kind == TransactionKind::Transfer {
        if let Some(counterpart_id) = model.related_id {
            let counterpart = find_transaction(db, counterpart_id).await?;
            involved = counterpart.account_id == actor.user_id;
        }
    }
    if !involved {
        role::require_role(actor.role, Role::Cashier)?;
        let owner_role = user::effective_role(db, model.account_id).await?;
        if !role::can_view(actor.role, owner_role) {
            return Err(Error::authorization(format!(
                "{} may not view transactions of a {owner_role}",
                actor.role
            )));
        }
    }

    let mut typed = to_typed(db, vec![model]).await?;
    typed.pop().ok_or(Error::NotFound {
        entity: "transaction",
        id: transaction_id,
    })
}

/// Every transaction on an account, newest first. Owners see their own; managers see all.
pub async fn list_for_account(
    ctx: &LedgerContext,
    actor: &Actor,
    account_id: i64,
) -> Result<Vec<LedgerTransaction>> {
    if actor.user_id != account_id {
        role::require_role(actor.role, Role::Manager)?;
    }
    let db = &ctx.database;
    let models = Transaction::find()
        .filter(transaction::Column::AccountId.eq(account_id))
        .order_by_desc(transaction::Column::Id)
        .all(db)
        .await?;
    to_typed(db, models).await
}

/// Filter for [`list_all`]; `None` fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionFilter {
    /// Only this kind
    pub kind: Option<TransactionKind>,
    /// Only this status
    pub status: Option<TransactionStatus>,
    /// Only flagged (or only unflagged) rows
    pub suspicious: Option<bool>,
    /// Only this account
    pub account_id: Option<i64>,
}

/// Lists transactions across all accounts, newest first. Requires manager or higher.
pub async fn list_all(
    ctx: &LedgerContext,
    actor: &Actor,
    filter: TransactionFilter,
) -> Result<Vec<LedgerTransaction>> {
    role::require_role(actor.role, Role::Manager)?;

    let mut query = Transaction::find();
    if let Some(kind) = filter.kind {
        query = query.filter(transaction::Column::Kind.eq(kind));
    }
    if let Some(status) = filter.status {
        query = query.filter(transaction::Column::Status.eq(status));
    }
    if let Some(suspicious) = filter.suspicious {
        query = query.filter(transaction::Column::Suspicious.eq(suspicious));
    }
    if let Some(account_id) = filter.account_id {
        query = query.filter(transaction::Column::AccountId.eq(account_id));
    }

    let db = &ctx.database;
    let models = query
        .order_by_desc(transaction::Column::Id)
        .all(db)
        .await?;
    to_typed(db, models).await
}

/// Sets the advisory review flag. Requires manager or higher; balances are untouched.
#[instrument(skip(ctx))]
pub async fn set_transaction_suspicious(
    ctx: &LedgerContext,
    actor: &Actor,
    transaction_id: i64,
    suspicious: bool,
) -> Result<LedgerTransaction> {
    role::require_role(actor.role, Role::Manager)?;

    let db = &ctx.database;
    let model = find_transaction(db, transaction_id).await?;
    let account_id = model.account_id;
    let mut active: transaction::ActiveModel = model.into();
    active.suspicious = Set(suspicious);
    let updated = active.update(db).await?;
    ctx.cache.invalidate_accounts(&[account_id]).await;

    info!(transaction_id, suspicious, "Updated transaction review flag");
    let mut typed = to_typed(db, vec![updated]).await?;
    typed.pop().ok_or(Error::NotFound {
        entity: "transaction",
        id: transaction_id,
    })
}

/// Per-account totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    /// Account summarized
    pub account_id: i64,
    /// Current balance
    pub balance: i64,
    /// Sum of positive posted deltas
    pub earned: i64,
    /// Sum of negative posted deltas, as a positive number
    pub spent: i64,
    /// Points tied up in pending redemptions
    pub pending_redemptions: i64,
    /// Number of transactions on the account
    pub transaction_count: u64,
}

/// Totals for an account, memoized in the cache until the next write to the account.
/// Owners see their own; cashiers and above see others.
pub async fn account_summary(
    ctx: &LedgerContext,
    actor: &Actor,
    account_id: i64,
) -> Result<AccountSummary> {
    if actor.user_id != account_id {
        role::require_role(actor.role, Role::Cashier)?;
    }

    let key = format!("{}summary", crate::cache::account_key_prefix(account_id));
    if let Some(cached) = ctx.cache.get(&key).await {
        match toml::from_str::<AccountSummary>(&cached) {
            Ok(summary) => return Ok(summary),
            Err(e) => warn!(key, "Discarding unreadable cache entry: {e}"),
        }
    }

    let db = &ctx.database;
    let balance = ledger::balance_of(db, account_id).await?;
    let rows = Transaction::find()
        .filter(transaction::Column::AccountId.eq(account_id))
        .all(db)
        .await?;

    let mut summary = AccountSummary {
        account_id,
        balance,
        ..AccountSummary::default()
    };
    for row in &rows {
        summary.transaction_count += 1;
        match (row.status, row.points_posted) {
            (TransactionStatus::Posted, Some(points)) if points >= 0 => summary.earned += points,
            (TransactionStatus::Posted, Some(points)) => summary.spent -= points,
            (TransactionStatus::PendingVerification, _) => {
                summary.pending_redemptions -= row.points_calculated;
            }
            _ => {}
        }
    }

    match toml::to_string(&summary) {
        Ok(serialized) => ctx.cache.set(&key, serialized).await,
        Err(e) => warn!(key, "Could not cache account summary: {e}"),
    }
    Ok(summary)
}
