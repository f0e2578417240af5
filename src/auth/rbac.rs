/*!
 * # Authorization Gate
 *
 * Static capability table mapping a role to the actions it may perform.
 * The table is data-independent; which rows an allowed action may touch is
 * decided separately by the caller's visible units.
 */

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use utoipa::ToSchema;

use crate::entities::Role;

/// Every gated operation of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Read inventory, units and history inside the visible units.
    ViewInventory,
    CheckoutForSelf,
    CheckoutForOther,
    ReturnItem,
    ManageItems,
    ManageUnits,
    ManageUsers,
    ManageItemTypes,
    TransferItem,
    /// Advanced audit reports.
    ViewReports,
    CompleteMaintenance,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ViewInventory => "view_inventory",
            Action::CheckoutForSelf => "checkout_for_self",
            Action::CheckoutForOther => "checkout_for_other",
            Action::ReturnItem => "return_item",
            Action::ManageItems => "manage_items",
            Action::ManageUnits => "manage_units",
            Action::ManageUsers => "manage_users",
            Action::ManageItemTypes => "manage_item_types",
            Action::TransferItem => "transfer_item",
            Action::ViewReports => "view_reports",
            Action::CompleteMaintenance => "complete_maintenance",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

lazy_static! {
    static ref CAPABILITIES: HashMap<Role, HashSet<Action>> = {
        use Action::*;

        let mut table = HashMap::new();
        table.insert(
            Role::Basic,
            [ViewInventory, CheckoutForSelf].into_iter().collect(),
        );
        table.insert(
            Role::Controller,
            [ViewInventory, CheckoutForSelf, CheckoutForOther, ReturnItem]
                .into_iter()
                .collect(),
        );
        table.insert(
            Role::Manager,
            [
                ViewInventory,
                CheckoutForSelf,
                CheckoutForOther,
                ReturnItem,
                ManageItems,
                ManageUnits,
                ManageUsers,
                ManageItemTypes,
                TransferItem,
                ViewReports,
                CompleteMaintenance,
            ]
            .into_iter()
            .collect(),
        );
        table
    };
}

/// Pure lookup; anything absent from the table is denied.
pub fn allowed(role: Role, action: Action) -> bool {
    CAPABILITIES
        .get(&role)
        .map(|actions| actions.contains(&action))
        .unwrap_or(false)
}

/// Actions granted to `role`, for display in the session summary.
pub fn actions_for(role: Role) -> Vec<Action> {
    let mut actions: Vec<Action> = CAPABILITIES
        .get(&role)
        .map(|set| set.iter().copied().collect())
        .unwrap_or_default();
    actions.sort_by_key(|a| a.as_str());
    actions
}
