//! Event entity - an event with a bounded points pool for its guests.
//!
//! `points_awarded` never exceeds `points_pool`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Event database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "events")]
pub struct Model {
    /// Unique identifier for the event
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Display name
    pub name: String,
    /// Maximum number of guests, unlimited when `None`
    pub capacity: Option<i32>,
    /// Total points budget
    pub points_pool: i64,
    /// Points distributed so far
    pub points_awarded: i64,
    /// When the event was created
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Event and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Guests registered for the event
    #[sea_orm(has_many = "super::event_guest::Entity")]
    Guests,
    /// Organizers of the event
    #[sea_orm(has_many = "super::event_organizer::Entity")]
    Organizers,
}

impl Related<super::event_guest::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Guests.def()
    }
}

impl Related<super::event_organizer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Organizers.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
