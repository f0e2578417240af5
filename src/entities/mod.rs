//! Database entities for the custody domain.

pub mod item;
pub mod item_type;
pub mod movement;
pub mod transfer;
pub mod unit;
pub mod user;

pub use item::ItemStatus;
pub use user::Role;
