//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod account;
pub mod event;
pub mod event_guest;
pub mod event_organizer;
pub mod ledger_entry;
pub mod promotion;
pub mod promotion_usage;
pub mod transaction;
pub mod transaction_promotion;
pub mod user;
pub mod user_role;

// Re-export specific types to avoid conflicts
pub use account::{Column as AccountColumn, Entity as Account, Model as AccountModel};
pub use event::{Column as EventColumn, Entity as Event, Model as EventModel};
pub use event_guest::Entity as EventGuest;
pub use event_organizer::Entity as EventOrganizer;
pub use ledger_entry::{Entity as LedgerEntry, Model as LedgerEntryModel};
pub use promotion::{
    Column as PromotionColumn, Entity as Promotion, Model as PromotionModel, PromotionKind,
};
pub use promotion_usage::Entity as PromotionUsage;
pub use transaction::{
    Column as TransactionColumn, Entity as Transaction, Model as TransactionModel,
    TransactionKind, TransactionStatus,
};
pub use transaction_promotion::Entity as TransactionPromotion;
pub use user::{Column as UserColumn, Entity as User, Model as UserModel};
pub use user_role::Entity as UserRole;
