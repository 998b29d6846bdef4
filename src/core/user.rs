//! User directory - registration, role grants and account flags.
//!
//! All permission checks go through [`crate::core::role`]. Changes to roles or activation
//! bump the user's `token_version` so sessions issued before the change stop validating.

use crate::{
    cache::CacheClient,
    config::SuperuserSettings,
    context::LedgerContext,
    core::{
        ledger,
        role::{self, Actor, Role},
    },
    entities::{User, UserModel, UserRole, user, user_role},
    errors::{Error, Result},
};
use sea_orm::{QueryOrder, Set, SqlErr, TransactionTrait, prelude::*, sea_query::Expr};
use serde::Serialize;
use tracing::{info, instrument};

/// Input for registering a user
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Login handle, ASCII alphanumeric
    pub utorid: String,
    /// Display name
    pub name: String,
    /// Contact email
    pub email: String,
}

/// A user as seen by another user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    /// The stored user row
    pub user: UserModel,
    /// Every role the user holds, lowest rank first
    pub roles: Vec<Role>,
    /// Highest held role
    pub role: Role,
    /// Current point balance
    pub points: i64,
}

fn validate_new_user(new: &NewUser) -> Result<()> {
    let utorid = new.utorid.trim();
    if utorid.is_empty() || utorid.len() > 16 || !utorid.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(Error::validation(format!(
            "utorid '{}' must be 1-16 ASCII letters or digits",
            new.utorid
        )));
    }
    if new.name.trim().is_empty() {
        return Err(Error::validation("name cannot be empty"));
    }
    if !new.email.contains('@') {
        return Err(Error::validation(format!("invalid email '{}'", new.email)));
    }
    Ok(())
}

/// Creates a user holding `role`, together with its empty loyalty account.
///
/// The caller is responsible for authorization; see [`register_user`].
pub async fn insert_user(
    db: &DatabaseConnection,
    new: &NewUser,
    role: Role,
    activated: bool,
) -> Result<UserModel> {
    validate_new_user(new)?;
    let utorid = new.utorid.trim().to_string();

    let txn = db.begin().await?;

    if find_by_utorid(&txn, &utorid).await?.is_some() {
        return Err(Error::conflict(format!("utorid '{utorid}' is already taken")));
    }

    let model = user::ActiveModel {
        utorid: Set(utorid),
        name: Set(new.name.trim().to_string()),
        email: Set(new.email.trim().to_string()),
        activated: Set(activated),
        suspicious: Set(false),
        token_version: Set(0),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    };
    let created = model.insert(&txn).await?;

    insert_role(&txn, created.id, role).await?;

    ledger::open_account(&txn, created.id).await?;
    txn.commit().await?;

    info!(user_id = created.id, utorid = %created.utorid, %role, "Registered user");
    Ok(created)
}

/// Registers a regular user. Requires cashier or higher.
#[instrument(skip(ctx, new), fields(utorid = %new.utorid))]
pub async fn register_user(ctx: &LedgerContext, actor: &Actor, new: NewUser) -> Result<UserModel> {
    role::require_role(actor.role, Role::Cashier)?;
    insert_user(&ctx.database, &new, Role::Regular, false).await
}

/// Creates the configured superuser unless a user with that utorid already exists.
pub async fn bootstrap_superuser(
    db: &DatabaseConnection,
    settings: &SuperuserSettings,
) -> Result<UserModel> {
    if let Some(existing) = find_by_utorid(db, settings.utorid.trim()).await? {
        info!(utorid = %existing.utorid, "Superuser already present");
        return Ok(existing);
    }
    let new = NewUser {
        utorid: settings.utorid.clone(),
        name: settings.name.clone(),
        email: settings.email.clone(),
    };
    insert_user(db, &new, Role::Superuser, true).await
}

/// Looks a user up by utorid.
pub async fn find_by_utorid<C>(db: &C, utorid: &str) -> Result<Option<UserModel>>
where
    C: ConnectionTrait,
{
    User::find()
        .filter(user::Column::Utorid.eq(utorid))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Fetches a user by id.
pub async fn get_user<C>(db: &C, user_id: i64) -> Result<UserModel>
where
    C: ConnectionTrait,
{
    User::find_by_id(user_id)
        .one(db)
        .await?
        .ok_or(Error::NotFound {
            entity: "user",
            id: user_id,
        })
}

/// Roles held by a user, lowest rank first.
pub async fn roles_of<C>(db: &C, user_id: i64) -> Result<Vec<Role>>
where
    C: ConnectionTrait,
{
    let mut roles: Vec<Role> = UserRole::find()
        .filter(user_role::Column::UserId.eq(user_id))
        .order_by_asc(user_role::Column::Id)
        .all(db)
        .await?
        .into_iter()
        .map(|grant| grant.role)
        .collect();
    roles.sort_by_key(|r| r.rank());
    roles.dedup();
    Ok(roles)
}

/// The highest-ranked role a user holds.
pub async fn effective_role<C>(db: &C, user_id: i64) -> Result<Role>
where
    C: ConnectionTrait,
{
    get_user(db, user_id).await?;
    Ok(roles_of(db, user_id)
        .await?
        .into_iter()
        .max_by_key(|r| r.rank())
        .unwrap_or(Role::Regular))
}

/// Resolves an authenticated user id into an [`Actor`].
pub async fn actor_for<C>(db: &C, user_id: i64) -> Result<Actor>
where
    C: ConnectionTrait,
{
    Ok(Actor::new(user_id, effective_role(db, user_id).await?))
}

/// Returns a user's profile if the actor may view them. Anyone may view themselves.
pub async fn view_user(db: &DatabaseConnection, actor: &Actor, user_id: i64) -> Result<UserProfile> {
    let target = get_user(db, user_id).await?;
    let roles = roles_of(db, user_id).await?;
    let target_role = roles.last().copied().unwrap_or(Role::Regular);

    if actor.user_id != user_id && !role::can_view(actor.role, target_role) {
        return Err(Error::authorization(format!(
            "{} may not view a {target_role}",
            actor.role
        )));
    }

    let points = ledger::balance_of(db, user_id).await?;
    Ok(UserProfile {
        user: target,
        roles,
        role: target_role,
        points,
    })
}

/// Writes a role row. A second row for the same role is rejected by the
/// `(user_id, role)` unique index and reported as [`Error::Conflict`].
async fn insert_role<C>(db: &C, user_id: i64, role: Role) -> Result<()>
where
    C: ConnectionTrait,
{
    let grant = user_role::ActiveModel {
        user_id: Set(user_id),
        role: Set(role),
        ..Default::default()
    };
    match grant.insert(db).await {
        Ok(_) => Ok(()),
        Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => Err(
            Error::conflict(format!("user {user_id} already holds the {role} role")),
        ),
        Err(err) => Err(err.into()),
    }
}

async fn bump_token_version<C>(db: &C, user_id: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    User::update_many()
        .col_expr(
            user::Column::TokenVersion,
            Expr::col(user::Column::TokenVersion).add(1),
        )
        .filter(user::Column::Id.eq(user_id))
        .exec(db)
        .await?;
    Ok(())
}

/// Resolves the target and fails unless the actor strictly outranks them.
async fn require_modifiable<C>(db: &C, actor: &Actor, user_id: i64) -> Result<Role>
where
    C: ConnectionTrait,
{
    let target_role = effective_role(db, user_id).await?;
    if !role::can_modify(actor.role, target_role) {
        return Err(Error::authorization(format!(
            "{} may not modify a {target_role}",
            actor.role
        )));
    }
    Ok(target_role)
}

/// Grants `role` to a user. The actor must outrank the target and be allowed to assign
/// the role; granting a role already held is a no-op. Returns the resulting role set.
#[instrument(skip(ctx))]
pub async fn grant_role(
    ctx: &LedgerContext,
    actor: &Actor,
    user_id: i64,
    role: Role,
) -> Result<Vec<Role>> {
    if !role::assignable_roles(actor.role).contains(&role) {
        return Err(Error::authorization(format!(
            "{} may not assign the {role} role",
            actor.role
        )));
    }

    let txn = ctx.database.begin().await?;
    require_modifiable(&txn, actor, user_id).await?;

    let held = roles_of(&txn, user_id).await?;
    if !held.contains(&role) {
        insert_role(&txn, user_id, role).await?;
        bump_token_version(&txn, user_id).await?;
    }
    let roles = roles_of(&txn, user_id).await?;
    txn.commit().await?;

    info!(user_id, %role, by = actor.user_id, "Granted role");
    Ok(roles)
}

/// Revokes `role` from a user. A user always keeps at least one role.
#[instrument(skip(ctx))]
pub async fn revoke_role(
    ctx: &LedgerContext,
    actor: &Actor,
    user_id: i64,
    role: Role,
) -> Result<Vec<Role>> {
    if !role::assignable_roles(actor.role).contains(&role) {
        return Err(Error::authorization(format!(
            "{} may not revoke the {role} role",
            actor.role
        )));
    }

    let txn = ctx.database.begin().await?;
    require_modifiable(&txn, actor, user_id).await?;

    let held = roles_of(&txn, user_id).await?;
    if !held.contains(&role) {
        return Ok(held);
    }
    if held.len() == 1 {
        return Err(Error::validation("a user must keep at least one role"));
    }

    UserRole::delete_many()
        .filter(user_role::Column::UserId.eq(user_id))
        .filter(user_role::Column::Role.eq(role))
        .exec(&txn)
        .await?;
    bump_token_version(&txn, user_id).await?;
    let roles = roles_of(&txn, user_id).await?;
    txn.commit().await?;

    info!(user_id, %role, by = actor.user_id, "Revoked role");
    Ok(roles)
}

/// Flags or clears a user as suspicious. Requires manager or higher.
#[instrument(skip(ctx))]
pub async fn set_suspicious(
    ctx: &LedgerContext,
    actor: &Actor,
    user_id: i64,
    suspicious: bool,
) -> Result<UserModel> {
    role::require_role(actor.role, Role::Manager)?;
    let txn = ctx.database.begin().await?;
    require_modifiable(&txn, actor, user_id).await?;

    let mut model: user::ActiveModel = get_user(&txn, user_id).await?.into();
    model.suspicious = Set(suspicious);
    let updated = model.update(&txn).await?;
    txn.commit().await?;

    invalidate_user(&ctx.cache, user_id).await;
    info!(user_id, suspicious, by = actor.user_id, "Updated suspicious flag");
    Ok(updated)
}

/// Activates or deactivates a user. Requires manager or higher.
#[instrument(skip(ctx))]
pub async fn set_activated(
    ctx: &LedgerContext,
    actor: &Actor,
    user_id: i64,
    activated: bool,
) -> Result<UserModel> {
    role::require_role(actor.role, Role::Manager)?;
    let txn = ctx.database.begin().await?;
    require_modifiable(&txn, actor, user_id).await?;

    let current = get_user(&txn, user_id).await?;
    if current.activated != activated {
        let mut model: user::ActiveModel = current.into();
        model.activated = Set(activated);
        model.update(&txn).await?;
        bump_token_version(&txn, user_id).await?;
    }
    let updated = get_user(&txn, user_id).await?;
    txn.commit().await?;

    invalidate_user(&ctx.cache, user_id).await;
    info!(user_id, activated, by = actor.user_id, "Updated activation");
    Ok(updated)
}

async fn invalidate_user(cache: &CacheClient, user_id: i64) {
    cache.invalidate_accounts(&[user_id]).await;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;

    fn new_user(utorid: &str) -> NewUser {
        NewUser {
            utorid: utorid.to_string(),
            name: format!("User {utorid}"),
            email: format!("{utorid}@mail.example.com"),
        }
    }

    #[tokio::test]
    async fn test_register_requires_cashier() -> Result<()> {
        let (ctx, staff) = setup_with_staff().await?;
        let regular = create_test_user(&ctx.database, "reg00001", Role::Regular).await?;

        let denied = register_user(&ctx, &regular, new_user("newbie01")).await;
        assert!(matches!(denied.unwrap_err(), Error::Authorization { .. }));

        let created = register_user(&ctx, &staff.cashier, new_user("newbie01")).await?;
        assert_eq!(created.utorid, "newbie01");
        assert!(!created.activated);
        assert_eq!(roles_of(&ctx.database, created.id).await?, vec![Role::Regular]);
        assert_eq!(ledger::balance_of(&ctx.database, created.id).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_register_validation_and_duplicates() -> Result<()> {
        let (ctx, staff) = setup_with_staff().await?;

        let bad = register_user(&ctx, &staff.cashier, new_user("bad id!")).await;
        assert!(matches!(bad.unwrap_err(), Error::Validation { .. }));

        register_user(&ctx, &staff.cashier, new_user("dupe0001")).await?;
        let dupe = register_user(&ctx, &staff.cashier, new_user("dupe0001")).await;
        assert!(matches!(dupe.unwrap_err(), Error::Conflict { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_bootstrap_superuser_is_idempotent() -> Result<()> {
        let db = setup_test_db().await?;
        let settings = SuperuserSettings {
            utorid: "root0001".to_string(),
            name: "Root".to_string(),
            email: "root@example.com".to_string(),
        };

        let first = bootstrap_superuser(&db, &settings).await?;
        let second = bootstrap_superuser(&db, &settings).await?;
        assert_eq!(first.id, second.id);
        assert_eq!(effective_role(&db, first.id).await?, Role::Superuser);
        Ok(())
    }

    #[tokio::test]
    async fn test_manager_cannot_grant_manager_or_superuser() -> Result<()> {
        let (ctx, staff) = setup_with_staff().await?;
        let target = create_test_user(&ctx.database, "target01", Role::Regular).await?;

        for role in [Role::Manager, Role::Superuser] {
            let result = grant_role(&ctx, &staff.manager, target.user_id, role).await;
            assert!(matches!(result.unwrap_err(), Error::Authorization { .. }));
        }

        let roles = grant_role(&ctx, &staff.manager, target.user_id, Role::Cashier).await?;
        assert_eq!(roles, vec![Role::Regular, Role::Cashier]);
        assert_eq!(effective_role(&ctx.database, target.user_id).await?, Role::Cashier);
        Ok(())
    }

    #[tokio::test]
    async fn test_cannot_modify_peer() -> Result<()> {
        let (ctx, staff) = setup_with_staff().await?;
        let other_manager = create_test_user(&ctx.database, "mgr00002", Role::Manager).await?;

        let result = grant_role(&ctx, &staff.manager, other_manager.user_id, Role::Cashier).await;
        assert!(matches!(result.unwrap_err(), Error::Authorization { .. }));

        let result = set_suspicious(&ctx, &staff.manager, other_manager.user_id, true).await;
        assert!(matches!(result.unwrap_err(), Error::Authorization { .. }));

        // Superuser may modify anyone
        let roles = grant_role(&ctx, &staff.superuser, other_manager.user_id, Role::Superuser).await?;
        assert!(roles.contains(&Role::Superuser));
        Ok(())
    }

    #[tokio::test]
    async fn test_role_changes_bump_token_version() -> Result<()> {
        let (ctx, staff) = setup_with_staff().await?;
        let target = create_test_user(&ctx.database, "target01", Role::Regular).await?;
        let before = get_user(&ctx.database, target.user_id).await?.token_version;

        grant_role(&ctx, &staff.manager, target.user_id, Role::Cashier).await?;
        let after_grant = get_user(&ctx.database, target.user_id).await?.token_version;
        assert_eq!(after_grant, before + 1);

        // Granting a held role changes nothing
        grant_role(&ctx, &staff.manager, target.user_id, Role::Cashier).await?;
        assert_eq!(
            get_user(&ctx.database, target.user_id).await?.token_version,
            after_grant
        );

        let roles = revoke_role(&ctx, &staff.superuser, target.user_id, Role::Cashier).await?;
        assert_eq!(roles, vec![Role::Regular]);
        assert_eq!(
            get_user(&ctx.database, target.user_id).await?.token_version,
            after_grant + 1
        );

        let last = revoke_role(&ctx, &staff.superuser, target.user_id, Role::Regular).await;
        assert!(matches!(last.unwrap_err(), Error::Validation { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_set_suspicious_and_activation() -> Result<()> {
        let (ctx, staff) = setup_with_staff().await?;
        let target = create_test_user(&ctx.database, "target01", Role::Regular).await?;

        let denied = set_suspicious(&ctx, &staff.cashier, target.user_id, true).await;
        assert!(matches!(denied.unwrap_err(), Error::Authorization { .. }));

        let flagged = set_suspicious(&ctx, &staff.manager, target.user_id, true).await?;
        assert!(flagged.suspicious);

        let activated = set_activated(&ctx, &staff.manager, target.user_id, true).await?;
        assert!(activated.activated);
        assert_eq!(activated.token_version, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_view_user_respects_rank() -> Result<()> {
        let (ctx, staff) = setup_with_staff().await?;
        let regular = create_test_user(&ctx.database, "reg00001", Role::Regular).await?;

        let own = view_user(&ctx.database, &regular, regular.user_id).await?;
        assert_eq!(own.role, Role::Regular);

        let denied = view_user(&ctx.database, &regular, staff.manager.user_id).await;
        assert!(matches!(denied.unwrap_err(), Error::Authorization { .. }));

        let seen = view_user(&ctx.database, &staff.cashier, regular.user_id).await?;
        assert_eq!(seen.points, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_actor_for_unknown_user() -> Result<()> {
        let db = setup_test_db().await?;
        let result = actor_for(&db, 404).await;
        assert!(matches!(
            result.unwrap_err(),
            Error::NotFound { entity: "user", .. }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_role_row_is_a_conflict() -> Result<()> {
        let (ctx, staff) = setup_with_staff().await?;
        let user = create_test_user(&ctx.database, "alice001", Role::Regular).await?;
        insert_role(&ctx.database, user.user_id, Role::Cashier).await?;

        // A grant that lost the race to an identical grant hits the unique index
        let again = insert_role(&ctx.database, user.user_id, Role::Cashier).await;
        assert!(again.unwrap_err().is_conflict());
        assert_eq!(
            roles_of(&ctx.database, user.user_id).await?,
            vec![Role::Regular, Role::Cashier]
        );

        // The normal path still treats a held role as a no-op
        let roles = grant_role(&ctx, &staff.superuser, user.user_id, Role::Cashier).await?;
        assert_eq!(roles, vec![Role::Regular, Role::Cashier]);
        Ok(())
    }
}
