//! Promotion engine - bonus points for purchases.
//!
//! A promotion is eligible when its validity window contains the purchase time and the
//! purchase meets its minimum spend. Automatic promotions apply to every eligible purchase;
//! one-time promotions apply once per user, and claiming one writes a `promotion_usages` row
//! inside the purchase's unit of work so a concurrent second claim cannot also succeed.

use crate::{
    context::LedgerContext,
    core::role::{self, Actor, Role},
    entities::{Promotion, PromotionKind, PromotionModel, PromotionUsage, promotion, promotion_usage},
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{QueryOrder, Set, SqlErr, prelude::*};
use std::collections::BTreeSet;
use tracing::{debug, info, instrument};

/// What a promotion awards
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reward {
    /// Multiplier on base points; the bonus is `base × (rate − 1)`
    Rate(f64),
    /// Fixed bonus points
    Flat(i64),
}

impl Reward {
    /// Bonus points this reward adds to a purchase worth `base_points`.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn bonus(self, base_points: i64) -> i64 {
        match self {
            Self::Rate(rate) => (base_points as f64 * (rate - 1.0)).round() as i64,
            Self::Flat(points) => points,
        }
    }
}

/// Reads the reward form of a stored promotion.
pub fn reward_of(promotion: &PromotionModel) -> Result<Reward> {
    match (promotion.rate, promotion.points) {
        (Some(rate), None) => Ok(Reward::Rate(rate)),
        (None, Some(points)) => Ok(Reward::Flat(points)),
        _ => Err(Error::validation(format!(
            "promotion {} must have exactly one of rate or points",
            promotion.id
        ))),
    }
}

/// Whether `now` falls inside the promotion's validity window.
#[must_use]
pub fn is_active(promotion: &PromotionModel, now: DateTime<Utc>) -> bool {
    promotion.starts_at <= now && now < promotion.ends_at
}

/// Input for creating a promotion
#[derive(Debug, Clone)]
pub struct NewPromotion {
    /// Display name
    pub name: String,
    /// Trigger kind
    pub kind: PromotionKind,
    /// Reward form
    pub reward: Reward,
    /// Minimum purchase amount in cents
    pub min_spending_cents: Option<i64>,
    /// Start of the validity window
    pub starts_at: DateTime<Utc>,
    /// End of the validity window
    pub ends_at: DateTime<Utc>,
}

/// Creates a promotion. Requires manager or higher.
#[instrument(skip(ctx, new), fields(name = %new.name))]
pub async fn create_promotion(
    ctx: &LedgerContext,
    actor: &Actor,
    new: NewPromotion,
) -> Result<PromotionModel> {
    role::require_role(actor.role, Role::Manager)?;

    if new.name.trim().is_empty() {
        return Err(Error::validation("promotion name cannot be empty"));
    }
    if new.starts_at >= new.ends_at {
        return Err(Error::validation("promotion must start before it ends"));
    }
    if new.min_spending_cents.is_some_and(|min| min < 0) {
        return Err(Error::validation("minimum spending cannot be negative"));
    }
    let (rate, points) = match new.reward {
        Reward::Rate(rate) if rate.is_finite() && rate > 1.0 => (Some(rate), None),
        Reward::Flat(points) if points > 0 => (None, Some(points)),
        Reward::Rate(rate) => {
            return Err(Error::validation(format!(
                "rate must be a finite multiplier above 1, got {rate}"
            )));
        }
        Reward::Flat(points) => {
            return Err(Error::validation(format!(
                "bonus points must be positive, got {points}"
            )));
        }
    };

    let model = promotion::ActiveModel {
        name: Set(new.name.trim().to_string()),
        kind: Set(new.kind),
        rate: Set(rate),
        points: Set(points),
        min_spending_cents: Set(new.min_spending_cents),
        starts_at: Set(new.starts_at),
        ends_at: Set(new.ends_at),
        ..Default::default()
    };
    let created = model.insert(&ctx.database).await?;
    info!(promotion_id = created.id, kind = ?created.kind, "Created promotion");
    Ok(created)
}

/// Automatic promotions whose window contains `now`.
pub async fn active_automatic<C>(db: &C, now: DateTime<Utc>) -> Result<Vec<PromotionModel>>
where
    C: ConnectionTrait,
{
    Promotion::find()
        .filter(promotion::Column::Kind.eq(PromotionKind::Automatic))
        .filter(promotion::Column::StartsAt.lte(now))
        .filter(promotion::Column::EndsAt.gt(now))
        .order_by_asc(promotion::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Candidate promotions for a purchase: every active automatic promotion plus the
/// explicitly requested ones. Unknown requested ids fail with [`Error::NotFound`].
pub async fn candidates<C>(
    db: &C,
    requested: &[i64],
    now: DateTime<Utc>,
) -> Result<Vec<PromotionModel>>
where
    C: ConnectionTrait,
{
    let mut found = active_automatic(db, now).await?;
    let mut seen: BTreeSet<i64> = found.iter().map(|p| p.id).collect();

    for &id in requested {
        if !seen.insert(id) {
            continue;
        }
        let promotion = Promotion::find_by_id(id).one(db).await?.ok_or(Error::NotFound {
            entity: "promotion",
            id,
        })?;
        found.push(promotion);
    }
    Ok(found)
}

/// Bonus computed for one purchase
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BonusOutcome {
    /// Total bonus points across applied promotions
    pub bonus_points: i64,
    /// Ids of every promotion that contributed, in application order
    pub applied: Vec<i64>,
    /// Subset of `applied` that are one-time and must be recorded as used
    pub one_time_claims: Vec<i64>,
}

async fn already_used<C>(db: &C, promotion_id: i64, user_id: i64) -> Result<bool>
where
    C: ConnectionTrait,
{
    Ok(PromotionUsage::find_by_id((promotion_id, user_id))
        .one(db)
        .await?
        .is_some())
}

/// Sums the bonus of every eligible candidate.
///
/// Ineligible candidates (outside their window, below minimum spend, or one-time promotions
/// the user already claimed) are skipped rather than rejected.
pub async fn compute_bonus<C>(
    db: &C,
    user_id: i64,
    purchase_cents: i64,
    base_points: i64,
    candidates: &[PromotionModel],
    now: DateTime<Utc>,
) -> Result<BonusOutcome>
where
    C: ConnectionTrait,
{
    let mut outcome = BonusOutcome::default();

    for promotion in candidates {
        if !is_active(promotion, now) {
            debug!(promotion_id = promotion.id, "Promotion outside its window");
            continue;
        }
        if promotion
            .min_spending_cents
            .is_some_and(|min| purchase_cents < min)
        {
            debug!(promotion_id = promotion.id, purchase_cents, "Minimum spend not met");
            continue;
        }
        if promotion.kind == PromotionKind::OneTime
            && already_used(db, promotion.id, user_id).await?
        {
            debug!(promotion_id = promotion.id, user_id, "One-time promotion already used");
            continue;
        }

        outcome.bonus_points += reward_of(promotion)?.bonus(base_points);
        outcome.applied.push(promotion.id);
        if promotion.kind == PromotionKind::OneTime {
            outcome.one_time_claims.push(promotion.id);
        }
    }

    Ok(outcome)
}

/// Records one-time promotion claims for a purchase.
///
/// A claim that collides with an existing usage row means another purchase won the race;
/// it fails with [`Error::Conflict`] so the caller's unit of work rolls back.
pub async fn record_usage<C>(
    db: &C,
    user_id: i64,
    transaction_id: i64,
    promotion_ids: &[i64],
) -> Result<()>
where
    C: ConnectionTrait,
{
    for &promotion_id in promotion_ids {
        let usage = promotion_usage::ActiveModel {
            promotion_id: Set(promotion_id),
            user_id: Set(user_id),
            transaction_id: Set(transaction_id),
            used_at: Set(chrono::Utc::now()),
        };
        match PromotionUsage::insert(usage).exec_without_returning(db).await {
            Ok(_) => {}
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                return Err(Error::conflict(format!(
                    "promotion {promotion_id} was already used by user {user_id}"
                )));
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}
