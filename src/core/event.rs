//! Event points pool - a bounded budget distributed to an event's guests.
//!
//! `points_awarded` is only ever advanced by a compare-and-set on the value read at the
//! start of the unit of work, so it can never pass `points_pool` even when organizers
//! award concurrently.

use crate::{
    context::LedgerContext,
    core::{
        role::{self, Actor, Role},
        transaction::{self, LedgerTransaction, Posting},
        user,
    },
    entities::{
        Event, EventGuest, EventModel, EventOrganizer, TransactionKind, event, event_guest,
        event_organizer,
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{QueryOrder, Set, SqlErr, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::{debug, info, instrument};

/// Input for creating an event
#[derive(Debug, Clone)]
pub struct NewEvent {
    /// Display name
    pub name: String,
    /// Maximum number of guests, unlimited when `None`
    pub capacity: Option<i32>,
    /// Total points the event may award
    pub points_pool: i64,
}

/// Creates an event with an untouched pool. Requires manager or higher.
#[instrument(skip(ctx, new), fields(name = %new.name))]
pub async fn create_event(ctx: &LedgerContext, actor: &Actor, new: NewEvent) -> Result<EventModel> {
    role::require_role(actor.role, Role::Manager)?;
    if new.name.trim().is_empty() {
        return Err(Error::validation("event name cannot be empty"));
    }
    if new.points_pool < 0 {
        return Err(Error::validation(format!(
            "points pool cannot be negative, got {}",
            new.points_pool
        )));
    }
    if new.capacity.is_some_and(|c| c <= 0) {
        return Err(Error::validation("capacity must be positive when set"));
    }

    let model = event::ActiveModel {
        name: Set(new.name),
        capacity: Set(new.capacity),
        points_pool: Set(new.points_pool),
        points_awarded: Set(0),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    let event = model.insert(&ctx.database).await?;
    info!(event_id = event.id, pool = event.points_pool, "Created event");
    Ok(event)
}

/// Fetches an event.
pub async fn get_event<C>(db: &C, event_id: i64) -> Result<EventModel>
where
    C: ConnectionTrait,
{
    Event::find_by_id(event_id)
        .one(db)
        .await?
        .ok_or(Error::NotFound {
            entity: "event",
            id: event_id,
        })
}

/// Whether `user_id` organizes the event.
pub async fn is_organizer<C>(db: &C, event_id: i64, user_id: i64) -> Result<bool>
where
    C: ConnectionTrait,
{
    Ok(EventOrganizer::find_by_id((event_id, user_id))
        .one(db)
        .await?
        .is_some())
}

/// User ids on the guest list, ascending.
pub async fn guests_of<C>(db: &C, event_id: i64) -> Result<Vec<i64>>
where
    C: ConnectionTrait,
{
    Ok(EventGuest::find()
        .filter(event_guest::Column::EventId.eq(event_id))
        .order_by_asc(event_guest::Column::UserId)
        .all(db)
        .await?
        .into_iter()
        .map(|g| g.user_id)
        .collect())
}

async fn require_organizer_or_manager<C>(db: &C, actor: &Actor, event_id: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    if actor.at_least(Role::Manager) || is_organizer(db, event_id, actor.user_id).await? {
        return Ok(());
    }
    Err(Error::authorization(format!(
        "user {} does not organize event {event_id}",
        actor.user_id
    )))
}

fn membership_conflict(err: DbErr, what: &str, event_id: i64, user_id: i64) -> Error {
    if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
        Error::conflict(format!("user {user_id} is already {what} of event {event_id}"))
    } else {
        err.into()
    }
}

/// Makes a user an organizer. Requires manager or higher.
#[instrument(skip(ctx))]
pub async fn add_organizer(
    ctx: &LedgerContext,
    actor: &Actor,
    event_id: i64,
    user_id: i64,
) -> Result<()> {
    role::require_role(actor.role, Role::Manager)?;

    let txn = ctx.database.begin().await?;
    get_event(&txn, event_id).await?;
    user::get_user(&txn, user_id).await?;
    if EventGuest::find_by_id((event_id, user_id)).one(&txn).await?.is_some() {
        return Err(Error::validation(format!(
            "user {user_id} is a guest of event {event_id} and cannot organize it"
        )));
    }

    EventOrganizer::insert(event_organizer::ActiveModel {
        event_id: Set(event_id),
        user_id: Set(user_id),
    })
    .exec_without_returning(&txn)
    .await
    .map_err(|e| membership_conflict(e, "an organizer", event_id, user_id))?;
    txn.commit().await?;

    info!(event_id, user_id, "Added organizer");
    Ok(())
}

/// Puts a user on the guest list. Requires an organizer of the event or manager or higher.
///
/// Fails with [`Error::Conflict`] when the event is at capacity.
#[instrument(skip(ctx))]
pub async fn add_guest(
    ctx: &LedgerContext,
    actor: &Actor,
    event_id: i64,
    user_id: i64,
) -> Result<()> {
    let txn = ctx.database.begin().await?;
    let event = get_event(&txn, event_id).await?;
    require_organizer_or_manager(&txn, actor, event_id).await?;
    user::get_user(&txn, user_id).await?;
    if is_organizer(&txn, event_id, user_id).await? {
        return Err(Error::validation(format!(
            "user {user_id} organizes event {event_id} and cannot be a guest"
        )));
    }

    if let Some(capacity) = event.capacity {
        let guests = EventGuest::find()
            .filter(event_guest::Column::EventId.eq(event_id))
            .count(&txn)
            .await?;
        if guests >= u64::try_from(capacity).unwrap_or(0) {
            return Err(Error::conflict(format!(
                "event {event_id} is full ({capacity} guests)"
            )));
        }
    }

    EventGuest::insert(event_guest::ActiveModel {
        event_id: Set(event_id),
        user_id: Set(user_id),
    })
    .exec_without_returning(&txn)
    .await
    .map_err(|e| membership_conflict(e, "a guest", event_id, user_id))?;
    txn.commit().await?;
    ctx.cache.invalidate_event(event_id).await;

    info!(event_id, user_id, "Added guest");
    Ok(())
}

/// Advances `points_awarded` by `amount` if it still equals what `event` observed.
async fn reserve<C>(db: &C, event: &EventModel, amount: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    let remaining = event.points_pool - event.points_awarded;
    if amount > remaining {
        return Err(Error::conflict(format!(
            "event {} has {remaining} points left, cannot award {amount}",
            event.id
        )));
    }

    let result = Event::update_many()
        .col_expr(
            event::Column::PointsAwarded,
            Expr::value(event.points_awarded + amount),
        )
        .filter(event::Column::Id.eq(event.id))
        .filter(event::Column::PointsAwarded.eq(event.points_awarded))
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Err(Error::conflict(format!(
            "points pool of event {} changed concurrently",
            event.id
        )));
    }
    debug!(event_id = event.id, amount, "Reserved event points");
    Ok(())
}

async fn post_award<C>(
    db: &C,
    actor: &Actor,
    event_id: i64,
    guest_id: i64,
    amount: i64,
) -> Result<LedgerTransaction>
where
    C: ConnectionTrait,
{
    let posting = Posting {
        related_id: Some(event_id),
        ..Posting::new(TransactionKind::Event, guest_id, actor.user_id, amount)
    };
    let model = transaction::post_transaction(db, posting).await?;
    LedgerTransaction::from_model(model, Vec::new())
}

/// Awards points from the pool to one guest.
#[instrument(skip(ctx), fields(by = actor.user_id))]
pub async fn award_single(
    ctx: &LedgerContext,
    actor: &Actor,
    event_id: i64,
    guest_user_id: i64,
    amount: i64,
) -> Result<LedgerTransaction> {
    if amount <= 0 {
        return Err(Error::validation(format!(
            "award amount must be positive, got {amount}"
        )));
    }

    let txn = ctx.database.begin().await?;
    let event = get_event(&txn, event_id).await?;
    require_organizer_or_manager(&txn, actor, event_id).await?;
    if EventGuest::find_by_id((event_id, guest_user_id))
        .one(&txn)
        .await?
        .is_none()
    {
        return Err(Error::validation(format!(
            "user {guest_user_id} is not a guest of event {event_id}"
        )));
    }

    reserve(&txn, &event, amount).await?;
    let award = post_award(&txn, actor, event_id, guest_user_id, amount).await?;
    txn.commit().await?;
    ctx.cache.invalidate_accounts(&[guest_user_id]).await;
    ctx.cache.invalidate_event(event_id).await;

    info!(event_id, guest_user_id, amount, "Awarded event points");
    Ok(award)
}

/// Awards `per_guest` points to every guest, all or nothing.
#[instrument(skip(ctx), fields(by = actor.user_id))]
pub async fn award_all(
    ctx: &LedgerContext,
    actor: &Actor,
    event_id: i64,
    per_guest: i64,
) -> Result<Vec<LedgerTransaction>> {
    if per_guest <= 0 {
        return Err(Error::validation(format!(
            "award amount must be positive, got {per_guest}"
        )));
    }

    let txn = ctx.database.begin().await?;
    let event = get_event(&txn, event_id).await?;
    require_organizer_or_manager(&txn, actor, event_id).await?;
    let guests = guests_of(&txn, event_id).await?;
    if guests.is_empty() {
        return Err(Error::validation(format!(
            "event {event_id} has no guests to award"
        )));
    }

    let total = i64::try_from(guests.len())
        .ok()
        .and_then(|count| per_guest.checked_mul(count))
        .ok_or_else(|| Error::validation("total award overflows"))?;
    reserve(&txn, &event, total).await?;

    let mut awards = Vec::with_capacity(guests.len());
    for &guest_id in &guests {
        awards.push(post_award(&txn, actor, event_id, guest_id, per_guest).await?);
    }
    txn.commit().await?;
    ctx.cache.invalidate_accounts(&guests).await;
    ctx.cache.invalidate_event(event_id).await;

    info!(
        event_id,
        guests = guests.len(),
        per_guest,
        total,
        "Awarded event points to all guests"
    );
    Ok(awards)
}

/// Points still available in the pool, cached until the next award.
pub async fn remaining_points(ctx: &LedgerContext, event_id: i64) -> Result<i64> {
    let key = format!("{}remaining", crate::cache::event_key_prefix(event_id));
    if let Some(remaining) = ctx.cache.get(&key).await.and_then(|v| v.parse().ok()) {
        return Ok(remaining);
    }

    let event = get_event(&ctx.database, event_id).await?;
    let remaining = event.points_pool - event.points_awarded;
    ctx.cache.set(&key, remaining.to_string()).await;
    Ok(remaining)
}
