//! Business logic. Every entry point takes the caller's [`Session`](crate::auth::Session)
//! explicitly, checks the action gate first, then bounds its reads and writes
//! by the caller's visible units.

pub mod custody;
pub mod hierarchy;
pub mod item_types;
pub mod items;
pub mod reports;
pub mod scope;
pub mod units;
pub mod users;

pub use hierarchy::{HierarchyService, UnitForest};
pub use scope::{Page, PageRequest, VisibleUnits};

/// Trims optional free text; blank values are stored as `NULL`.
pub(crate) fn clean_text(note: Option<String>) -> Option<String> {
    note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}
