/// Database connection and table creation
pub mod database;

/// Application settings loaded from TOML
pub mod settings;

pub use settings::{CacheSettings, PointsPolicy, Settings, SuperuserSettings};
