//! Database configuration module for the loyalty ledger.
//!
//! This module handles `SQLite` database connection and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with `Schema::create_table_from_entity`,
//! so the schema always matches the Rust structs without hand-written SQL.

use crate::entities::{
    Account, Event, EventGuest, EventOrganizer, LedgerEntry, Promotion, PromotionUsage,
    Transaction, TransactionPromotion, User, UserRole, user_role,
};
use crate::errors::Result;
use sea_orm::{
    ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema, sea_query::Index,
};
use tracing::info;

/// Establishes a connection to the database at `database_url`.
pub async fn create_connection(database_url: &str) -> Result<DatabaseConnection> {
    Database::connect(database_url).await.map_err(Into::into)
}

async fn create_table<E, C>(db: &C, schema: &Schema, entity: E) -> Result<()>
where
    E: EntityTrait,
    C: ConnectionTrait,
{
    let builder = db.get_database_backend();
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(builder.build(&statement)).await?;
    Ok(())
}

/// Creates all ledger tables that do not exist yet.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let schema = Schema::new(db.get_database_backend());

    create_table(db, &schema, User).await?;
    create_table(db, &schema, UserRole).await?;
    create_table(db, &schema, Account).await?;
    create_table(db, &schema, Transaction).await?;
    create_table(db, &schema, LedgerEntry).await?;
    create_table(db, &schema, Promotion).await?;
    create_table(db, &schema, PromotionUsage).await?;
    create_table(db, &schema, TransactionPromotion).await?;
    create_table(db, &schema, Event).await?;
    create_table(db, &schema, EventGuest).await?;
    create_table(db, &schema, EventOrganizer).await?;

    // A role is held at most once per user
    let role_index = Index::create()
        .name("idx_user_roles_user_id_role")
        .table(UserRole)
        .col(user_role::Column::UserId)
        .col(user_role::Column::Role)
        .unique()
        .if_not_exists()
        .to_owned();
    db.execute(db.get_database_backend().build(&role_index))
        .await?;

    info!("Database tables ensured");
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::entities::{AccountModel, EventModel, TransactionModel, UserModel};
    use sea_orm::{EntityTrait, QuerySelect};

    #[tokio::test]
    async fn test_create_tables() -> Result<()> {
        let db = create_connection("sqlite::memory:").await?;
        create_tables(&db).await?;

        // Test that tables exist by querying them
        let _: Vec<UserModel> = User::find().limit(1).all(&db).await?;
        let _: Vec<AccountModel> = Account::find().limit(1).all(&db).await?;
        let _: Vec<TransactionModel> = Transaction::find().limit(1).all(&db).await?;
        let _: Vec<EventModel> = Event::find().limit(1).all(&db).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_user_roles_reject_duplicate_grants() -> Result<()> {
        use crate::core::role::Role;
        use crate::test_utils::{create_test_user, setup_test_db};
        use sea_orm::{ActiveModelTrait, Set, SqlErr};

        let db = setup_test_db().await?;
        let alice = create_test_user(&db, "alice001", Role::Cashier).await?;
        let bob = create_test_user(&db, "bob00001", Role::Regular).await?;

        let grant = |user_id| user_role::ActiveModel {
            user_id: Set(user_id),
            role: Set(Role::Cashier),
            ..Default::default()
        };
        let err = grant(alice.user_id).insert(&db).await.unwrap_err();
        assert!(matches!(
            err.sql_err(),
            Some(SqlErr::UniqueConstraintViolation(_))
        ));

        // The same role for another user is fine
        grant(bob.user_id).insert(&db).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_create_tables_is_idempotent() -> Result<()> {
        let db = create_connection("sqlite::memory:").await?;
        create_tables(&db).await?;
        create_tables(&db).await?;
        Ok(())
    }
}
