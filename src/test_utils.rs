//! Shared test utilities for the loyalty ledger.
//!
//! This module provides common helper functions for setting up test databases
//! and creating test users, promotions and balances with sensible defaults.

use crate::{
    cache::CacheClient,
    config::PointsPolicy,
    context::LedgerContext,
    core::{
        promotion::{self, NewPromotion, Reward},
        role::{Actor, Role},
        transaction::{self, AdjustmentRequest, LedgerTransaction},
        user::{self, NewUser},
    },
    entities::{PromotionKind, PromotionModel},
    errors::Result,
};
use chrono::{Duration, Utc};
use sea_orm::DatabaseConnection;
use std::time::Duration as StdDuration;

/// Installs a test subscriber so `tracing` output shows up with `--nocapture`.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("loyalty_ledger=debug")
        .with_test_writer()
        .try_init();
}

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    init_test_tracing();
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Wraps a connection in a context with an enabled cache and the default points policy.
/// Works with both real and `MockDatabase` connections.
pub fn test_context(db: DatabaseConnection) -> LedgerContext {
    LedgerContext::new(
        db,
        CacheClient::new(StdDuration::from_secs(60)),
        PointsPolicy::default(),
    )
}

/// Creates an in-memory database and a context around it.
pub async fn setup_test_context() -> Result<LedgerContext> {
    Ok(test_context(setup_test_db().await?))
}

/// Creates a user holding `role` and returns it as an actor.
///
/// # Defaults
/// * `name`: the utorid
/// * `email`: `<utorid>@mail.test`
/// * `activated`: false
pub async fn create_test_user(db: &DatabaseConnection, utorid: &str, role: Role) -> Result<Actor> {
    let new = NewUser {
        utorid: utorid.to_string(),
        name: utorid.to_string(),
        email: format!("{utorid}@mail.test"),
    };
    let created = user::insert_user(db, &new, role, false).await?;
    Ok(Actor::new(created.id, role))
}

/// One actor per staff role.
#[derive(Debug, Clone, Copy)]
pub struct Staff {
    /// Holds `Role::Superuser`
    pub superuser: Actor,
    /// Holds `Role::Manager`
    pub manager: Actor,
    /// Holds `Role::Cashier`
    pub cashier: Actor,
}

/// Sets up a complete test environment with one user per staff role.
/// Returns (ctx, staff) for common test scenarios.
pub async fn setup_with_staff() -> Result<(LedgerContext, Staff)> {
    let ctx = setup_test_context().await?;
    let staff = Staff {
        superuser: create_test_user(&ctx.database, "super001", Role::Superuser).await?,
        manager: create_test_user(&ctx.database, "manager1", Role::Manager).await?,
        cashier: create_test_user(&ctx.database, "cashier1", Role::Cashier).await?,
    };
    Ok((ctx, staff))
}

/// Creates a flat-bonus promotion active from a day ago until a day from now.
pub async fn create_test_promotion(
    ctx: &LedgerContext,
    actor: &Actor,
    kind: PromotionKind,
    flat_points: i64,
    min_spending_cents: Option<i64>,
) -> Result<PromotionModel> {
    let now = Utc::now();
    promotion::create_promotion(
        ctx,
        actor,
        NewPromotion {
            name: format!("Test {kind:?} promotion"),
            kind,
            reward: Reward::Flat(flat_points),
            min_spending_cents,
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(1),
        },
    )
    .await
}

/// Moves an account's balance by `amount` through a manager adjustment.
pub async fn fund_account(
    ctx: &LedgerContext,
    manager: &Actor,
    account_id: i64,
    amount: i64,
) -> Result<LedgerTransaction> {
    transaction::create_adjustment(
        ctx,
        manager,
        AdjustmentRequest {
            account_id,
            amount,
            related_id: None,
            notes: "test funding".to_string(),
        },
    )
    .await
}
