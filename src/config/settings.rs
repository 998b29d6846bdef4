//! Application settings loaded from a TOML file.
//!
//! Every section has defaults, so an absent or partial file still yields a usable
//! configuration. `DATABASE_URL` in the environment takes precedence over the file.

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default location of the settings file.
pub const DEFAULT_CONFIG_PATH: &str = "loyalty.toml";

/// Configuration structure representing the entire settings file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `SeaORM` connection URL
    pub database_url: String,
    /// Points policy
    pub points: PointsPolicy,
    /// Cache settings
    pub cache: CacheSettings,
    /// Superuser created on first start, if any
    pub superuser: Option<SuperuserSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/loyalty.sqlite?mode=rwc".to_string(),
            points: PointsPolicy::default(),
            cache: CacheSettings::default(),
            superuser: None,
        }
    }
}

/// How purchases earn points
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PointsPolicy {
    /// Cents a customer spends per base point earned
    pub cents_per_point: i64,
}

impl Default for PointsPolicy {
    fn default() -> Self {
        Self { cents_per_point: 4 }
    }
}

impl PointsPolicy {
    /// Base points for a purchase, rounded half up.
    ///
    /// Fails with [`Error::Validation`] when the amount is too large to round.
    pub fn base_points(&self, total_cents: i64) -> Result<i64> {
        total_cents
            .checked_add(self.cents_per_point / 2)
            .and_then(|rounded| rounded.checked_div(self.cents_per_point))
            .ok_or_else(|| {
                Error::validation(format!("purchase amount {total_cents} is out of range"))
            })
    }
}

/// Read-through cache settings
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Whether aggregates are memoized at all
    pub enabled: bool,
    /// Lifetime of a cached entry
    pub ttl_seconds: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 60,
        }
    }
}

impl CacheSettings {
    /// TTL as a [`Duration`].
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Identity of the bootstrap superuser
#[derive(Debug, Clone, Deserialize)]
pub struct SuperuserSettings {
    /// Login handle
    pub utorid: String,
    /// Display name
    pub name: String,
    /// Contact email
    pub email: String,
}

impl Settings {
    /// Rejects values the ledger cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.points.cents_per_point <= 0 {
            return Err(Error::Config {
                message: format!(
                    "points.cents_per_point must be positive, got {}",
                    self.points.cents_per_point
                ),
            });
        }
        if self.database_url.trim().is_empty() {
            return Err(Error::Config {
                message: "database_url cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Parses and validates settings from a TOML string.
pub fn parse_settings(contents: &str) -> Result<Settings> {
    let mut settings: Settings = toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse settings: {e}"),
    })?;
    if let Ok(url) = std::env::var("DATABASE_URL") {
        settings.database_url = url;
    }
    settings.validate()?;
    Ok(settings)
}

/// Loads settings from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - A value fails validation
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path_ref = path.as_ref();
    tracing::debug!("Attempting to load settings from: {:?}", path_ref);
    let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
        message: format!("Failed to read settings file {}: {e}", path_ref.display()),
    })?;
    parse_settings(&contents)
}

/// Loads settings from `LOYALTY_CONFIG` or `./loyalty.toml`, falling back to defaults when
/// neither file exists.
pub fn load_default_settings() -> Result<Settings> {
    let path = std::env::var("LOYALTY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    if Path::new(&path).exists() {
        load_settings(&path)
    } else {
        tracing::info!("No settings file at {path}, using defaults");
        parse_settings("")
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_parse_full_settings() {
        let toml_str = r#"
            database_url = "sqlite::memory:"

            [points]
            cents_per_point = 25

            [cache]
            enabled = false
            ttl_seconds = 5

            [superuser]
            utorid = "root0001"
            name = "Root"
            email = "root@example.com"
        "#;

        let settings: Settings = toml::from_str(toml_str).unwrap();
        assert_eq!(settings.points.cents_per_point, 25);
        assert!(!settings.cache.enabled);
        assert_eq!(settings.cache.ttl(), Duration::from_secs(5));
        assert_eq!(settings.superuser.unwrap().utorid, "root0001");
    }

    #[test]
    fn test_defaults_apply_to_missing_sections() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings.points, PointsPolicy { cents_per_point: 4 });
        assert!(settings.cache.enabled);
        assert!(settings.superuser.is_none());
    }

    #[test]
    fn test_invalid_rate_is_rejected() {
        let settings: Settings = toml::from_str("[points]\ncents_per_point = 0").unwrap();
        assert!(matches!(settings.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn test_base_points_rounding() {
        let policy = PointsPolicy::default();
        assert_eq!(policy.base_points(100).unwrap(), 25);
        assert_eq!(policy.base_points(1).unwrap(), 0);
        assert_eq!(policy.base_points(2).unwrap(), 1);
        assert_eq!(policy.base_points(2500).unwrap(), 625);
    }

    #[test]
    fn test_base_points_rejects_amounts_that_overflow() {
        let policy = PointsPolicy::default();
        assert!(matches!(
            policy.base_points(i64::MAX),
            Err(Error::Validation { .. })
        ));
        assert_eq!(
            policy.base_points(i64::MAX - 2).unwrap(),
            (i64::MAX - 2 + 2) / 4
        );
    }
}
