//! Shared handles every ledger operation needs.

use crate::cache::CacheClient;
use crate::config::{PointsPolicy, Settings};
use sea_orm::DatabaseConnection;

/// The injected dependencies of the ledger core.
///
/// Built once by the caller and passed explicitly into each operation; nothing in the
/// crate reaches for a global connection.
#[derive(Debug)]
pub struct LedgerContext {
    /// Database connection for all database operations
    pub database: DatabaseConnection,
    /// Best-effort aggregate cache
    pub cache: CacheClient,
    /// How purchases earn points
    pub policy: PointsPolicy,
}

impl LedgerContext {
    /// Creates a context with the given parts.
    #[must_use]
    pub const fn new(database: DatabaseConnection, cache: CacheClient, policy: PointsPolicy) -> Self {
        Self {
            database,
            cache,
            policy,
        }
    }

    /// Creates a context from loaded settings and an open connection.
    #[must_use]
    pub fn from_settings(database: DatabaseConnection, settings: &Settings) -> Self {
        let cache = if settings.cache.enabled {
            CacheClient::new(settings.cache.ttl())
        } else {
            CacheClient::disabled()
        };
        Self::new(database, cache, settings.points)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::config::settings::parse_settings;
    use sea_orm::{DatabaseBackend, MockDatabase};

    #[test]
    fn test_from_settings_applies_points_and_cache_sections() {
        let settings = parse_settings(
            "database_url = \"sqlite::memory:\"\n[points]\ncents_per_point = 10\n[cache]\nenabled = false\n",
        )
        .unwrap();
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();

        let ctx = LedgerContext::from_settings(db, &settings);
        assert_eq!(ctx.policy.cents_per_point, 10);
        assert_eq!(ctx.policy.base_points(100).unwrap(), 10);
        assert!(!ctx.cache.is_enabled());
    }

    #[tokio::test]
    async fn test_from_settings_enables_cache_by_default() {
        let settings = parse_settings("database_url = \"sqlite::memory:\"").unwrap();
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();

        let ctx = LedgerContext::from_settings(db, &settings);
        assert!(ctx.cache.is_enabled());
        ctx.cache.set("account:1:summary", "x".to_string()).await;
        assert_eq!(ctx.cache.get("account:1:summary").await.as_deref(), Some("x"));
    }
}
