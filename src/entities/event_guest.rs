//! Event guest entity - membership of a user in an event's guest set.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Event guest database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "event_guests")]
pub struct Model {
    /// The event
    #[sea_orm(primary_key, auto_increment = false)]
    pub event_id: i64,
    /// The guest
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: i64,
}

/// Defines relationships between `EventGuest` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each membership belongs to one event
    #[sea_orm(
        belongs_to = "super::event::Entity",
        from = "Column::EventId",
        to = "super::event::Column::Id"
    )]
    Event,
}

impl Related<super::event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Event.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
