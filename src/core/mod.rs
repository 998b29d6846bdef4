//! Framework-agnostic ledger operations.
//!
//! Every public operation takes the caller as an explicit [`role::Actor`] and runs its
//! writes in a single database transaction.

pub mod event;
pub mod ledger;
pub mod promotion;
pub mod redemption;
pub mod role;
pub mod transaction;
pub mod user;
