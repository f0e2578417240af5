//! Custody State Machine.
//!
//! ```text
//! AVAILABLE --checkout--> IN_USE --return--> AVAILABLE | MAINTENANCE
//! MAINTENANCE --complete--> AVAILABLE
//! AVAILABLE | MAINTENANCE --deactivate--> INACTIVE
//! ```
//!
//! Every transition is a compare-and-set on the item's status, paired with
//! its audit row inside one transaction. The CAS row count decides the
//! winner between concurrent callers.

use crate::{
    auth::{Action, Session},
    db::{DbPool, Tx},
    entities::{item, movement, transfer, unit, user, ItemStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        clean_text,
        items::find_visible_item,
        scope::{MovementFilter, Page, PageRequest, TransferFilter},
        HierarchyService,
    },
};
use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, Order,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Default status note for items returned into maintenance without a note.
pub const MAINTENANCE_NOTE: &str = "In maintenance";

/// `UPDATE items SET status = to, status_note = note WHERE id = ? AND status IN (from)`.
///
/// Returns whether the row was swapped.
pub(crate) async fn compare_and_set<C: ConnectionTrait>(
    conn: &C,
    item_id: Uuid,
    from: &[ItemStatus],
    to: ItemStatus,
    note: Option<String>,
    now: DateTime<Utc>,
) -> Result<bool, ServiceError> {
    let result = item::Entity::update_many()
        .col_expr(item::Column::Status, Expr::value(to))
        .col_expr(item::Column::StatusNote, Expr::value(note))
        .col_expr(item::Column::UpdatedAt, Expr::value(now))
        .filter(item::Column::Id.eq(item_id))
        .filter(item::Column::Status.is_in(from.iter().copied()))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(result.rows_affected == 1)
}

/// Re-reads an item's status after a lost compare-and-set.
pub(crate) async fn current_status<C: ConnectionTrait>(
    conn: &C,
    item_id: Uuid,
) -> Result<ItemStatus, ServiceError> {
    item::Entity::find_by_id(item_id)
        .select_only()
        .column(item::Column::Status)
        .into_tuple::<ItemStatus>()
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Item {}", item_id)))
}

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct CheckoutRequest {
    /// Beneficiary; defaults to the caller.
    pub holder_id: Option<Uuid>,
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct ReturnRequest {
    #[validate(length(max = 500))]
    pub note: Option<String>,
    /// Route the item to MAINTENANCE instead of AVAILABLE.
    #[serde(default)]
    pub maintenance: bool,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct TransferRequest {
    pub destination_unit_id: Uuid,
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

/// Item state after a checkout or return, with the movement it touched.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MovementOutcome {
    pub item: item::Model,
    pub movement: movement::Model,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TransferOutcome {
    pub item: item::Model,
    pub transfer: transfer::Model,
}

/// An item currently held by someone, with its open movement.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HeldItem {
    pub item: item::Model,
    pub movement: movement::Model,
}

/// Pairs open movements with their items, dropping movements whose item
/// is missing from `items`.
pub(crate) fn pair_held(items: Vec<item::Model>, movements: Vec<movement::Model>) -> Vec<HeldItem> {
    let mut by_id: HashMap<Uuid, item::Model> = items.into_iter().map(|i| (i.id, i)).collect();
    movements
        .into_iter()
        .filter_map(|movement| {
            by_id
                .remove(&movement.item_id)
                .map(|item| HeldItem { item, movement })
        })
        .collect()
}

#[derive(Clone)]
pub struct CustodyService {
    db: Arc<DbPool>,
    hierarchy: HierarchyService,
    event_sender: Arc<EventSender>,
}

impl CustodyService {
    pub fn new(db: Arc<DbPool>, hierarchy: HierarchyService, event_sender: Arc<EventSender>) -> Self {
        Self {
            db,
            hierarchy,
            event_sender,
        }
    }

    /// AVAILABLE → IN_USE, opening a movement for the holder.
    #[instrument(skip(self, session, request), fields(user_id = %session.user_id, %item_id))]
    pub async fn checkout(
        &self,
        session: &Session,
        item_id: Uuid,
        request: CheckoutRequest,
    ) -> Result<MovementOutcome, ServiceError> {
        let holder_id = request.holder_id.unwrap_or(session.user_id);
        let action = if holder_id == session.user_id {
            Action::CheckoutForSelf
        } else {
            Action::CheckoutForOther
        };
        session.require(action)?;
        request.validate()?;

        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;
        let item = find_visible_item(db, &visible, item_id).await?;

        let holder = user::Entity::find_by_id(holder_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .filter(|u| u.active)
            .ok_or_else(|| ServiceError::NotFound(format!("User {}", holder_id)))?;
        visible.ensure(holder.unit_id, "holder")?;

        if item.status != ItemStatus::Available {
            return Err(ServiceError::NotAvailable {
                status: item.status,
            });
        }

        let now = Utc::now();
        let note = clean_text(request.note);

        let tx = Tx::begin(db, "custody.checkout").await?;
        let conn = tx.conn()?;

        let swapped = compare_and_set(
            conn,
            item_id,
            &[ItemStatus::Available],
            ItemStatus::InUse,
            note.clone(),
            now,
        )
        .await?;
        if !swapped {
            let status = current_status(conn, item_id).await?;
            counter!("custody.transition_conflicts", 1, "transition" => "checkout");
            return Err(ServiceError::NotAvailable { status });
        }

        let movement = movement::ActiveModel {
            id: Set(Uuid::new_v4()),
            item_id: Set(item_id),
            holder_id: Set(holder.id),
            checkout_by: Set(session.user_id),
            checkout_at: Set(now),
            checkout_note: Set(note.clone()),
            returned_by: Set(None),
            returned_at: Set(None),
            return_note: Set(None),
        }
        .insert(conn)
        .await
        .map_err(ServiceError::db_error)?;

        tx.commit().await?;

        counter!("custody.transitions", 1, "transition" => "checkout");
        self.event_sender.publish(Event::ItemCheckedOut {
            item_id,
            movement_id: movement.id,
            holder_id: holder.id,
            actor_id: session.user_id,
            at: now,
        });
        info!(movement_id = %movement.id, holder_id = %holder.id, "item checked out");

        Ok(MovementOutcome {
            item: item::Model {
                status: ItemStatus::InUse,
                status_note: note,
                updated_at: now,
                ..item
            },
            movement,
        })
    }

    /// IN_USE → AVAILABLE (or MAINTENANCE), closing the open movement.
    #[instrument(skip(self, session, request), fields(user_id = %session.user_id, %item_id))]
    pub async fn return_item(
        &self,
        session: &Session,
        item_id: Uuid,
        request: ReturnRequest,
    ) -> Result<MovementOutcome, ServiceError> {
        session.require(Action::ReturnItem)?;
        request.validate()?;

        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;
        let item = find_visible_item(db, &visible, item_id).await?;
        if item.status != ItemStatus::InUse {
            return Err(ServiceError::NotInUse {
                status: item.status,
            });
        }

        let now = Utc::now();
        let return_note = clean_text(request.note);
        let (next, item_note) = if request.maintenance {
            (
                ItemStatus::Maintenance,
                Some(return_note.clone().unwrap_or_else(|| MAINTENANCE_NOTE.to_string())),
            )
        } else {
            (ItemStatus::Available, None)
        };

        let tx = Tx::begin(db, "custody.return").await?;
        let conn = tx.conn()?;

        let open = movement::Entity::find()
            .filter(movement::Column::ItemId.eq(item_id))
            .filter(movement::Column::ReturnedAt.is_null())
            .order_by_desc(movement::Column::CheckoutAt)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?;
        let Some(open) = open else {
            error!(%item_id, "item is IN_USE without an open movement");
            counter!("custody.integrity_faults", 1, "kind" => "no_open_movement");
            return Err(ServiceError::NoOpenMovement(item_id));
        };

        let swapped = compare_and_set(
            conn,
            item_id,
            &[ItemStatus::InUse],
            next,
            item_note.clone(),
            now,
        )
        .await?;
        if !swapped {
            let status = current_status(conn, item_id).await?;
            counter!("custody.transition_conflicts", 1, "transition" => "return");
            return Err(ServiceError::NotInUse { status });
        }

        let mut active: movement::ActiveModel = open.into();
        active.returned_by = Set(Some(session.user_id));
        active.returned_at = Set(Some(now));
        active.return_note = Set(return_note);
        let movement = active.update(conn).await.map_err(ServiceError::db_error)?;

        tx.commit().await?;

        counter!("custody.transitions", 1, "transition" => "return");
        self.event_sender.publish(Event::ItemReturned {
            item_id,
            movement_id: movement.id,
            actor_id: session.user_id,
            new_status: next,
            at: now,
        });
        info!(movement_id = %movement.id, new_status = %next, "item returned");

        Ok(MovementOutcome {
            item: item::Model {
                status: next,
                status_note: item_note,
                updated_at: now,
                ..item
            },
            movement,
        })
    }

    /// MAINTENANCE → AVAILABLE, clearing the status note.
    #[instrument(skip(self, session), fields(user_id = %session.user_id, %item_id))]
    pub async fn complete_maintenance(
        &self,
        session: &Session,
        item_id: Uuid,
    ) -> Result<item::Model, ServiceError> {
        session.require(Action::CompleteMaintenance)?;

        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;
        let item = find_visible_item(db, &visible, item_id).await?;
        if item.status != ItemStatus::Maintenance {
            return Err(ServiceError::NotInMaintenance {
                status: item.status,
            });
        }

        let now = Utc::now();
        let swapped = compare_and_set(
            db,
            item_id,
            &[ItemStatus::Maintenance],
            ItemStatus::Available,
            None,
            now,
        )
        .await?;
        if !swapped {
            let status = current_status(db, item_id).await?;
            counter!("custody.transition_conflicts", 1, "transition" => "complete_maintenance");
            return Err(ServiceError::NotInMaintenance { status });
        }

        counter!("custody.transitions", 1, "transition" => "complete_maintenance");
        self.event_sender.publish(Event::MaintenanceCompleted {
            item_id,
            actor_id: session.user_id,
            at: now,
        });
        info!("maintenance completed");

        Ok(item::Model {
            status: ItemStatus::Available,
            status_note: None,
            updated_at: now,
            ..item
        })
    }

    /// Reassigns an AVAILABLE item to another visible unit.
    #[instrument(skip(self, session, request), fields(user_id = %session.user_id, %item_id, destination = %request.destination_unit_id))]
    pub async fn transfer_item(
        &self,
        session: &Session,
        item_id: Uuid,
        request: TransferRequest,
    ) -> Result<TransferOutcome, ServiceError> {
        session.require(Action::TransferItem)?;
        request.validate()?;

        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;
        let item = find_visible_item(db, &visible, item_id).await?;

        let destination = request.destination_unit_id;
        unit::Entity::find_by_id(destination)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Unit {}", destination)))?;
        visible.ensure(destination, "destination unit")?;

        if item.unit_id == destination {
            return Err(ServiceError::InvalidOperation(
                "origin and destination units are the same".to_string(),
            ));
        }
        if item.status != ItemStatus::Available {
            return Err(ServiceError::NotAvailable {
                status: item.status,
            });
        }

        let now = Utc::now();
        let origin = item.unit_id;

        let tx = Tx::begin(db, "custody.transfer").await?;
        let conn = tx.conn()?;

        // Guarding on the origin unit too rejects a concurrent transfer.
        let result = item::Entity::update_many()
            .col_expr(item::Column::UnitId, Expr::value(destination))
            .col_expr(item::Column::UpdatedAt, Expr::value(now))
            .filter(item::Column::Id.eq(item_id))
            .filter(item::Column::UnitId.eq(origin))
            .filter(item::Column::Status.eq(ItemStatus::Available))
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            let status = current_status(conn, item_id).await?;
            counter!("custody.transition_conflicts", 1, "transition" => "transfer");
            return Err(if status == ItemStatus::Available {
                ServiceError::InvalidOperation("item was moved concurrently".to_string())
            } else {
                ServiceError::NotAvailable { status }
            });
        }

        let transfer = transfer::ActiveModel {
            id: Set(Uuid::new_v4()),
            item_id: Set(item_id),
            origin_unit_id: Set(origin),
            destination_unit_id: Set(destination),
            transferred_by: Set(session.user_id),
            transferred_at: Set(now),
            note: Set(clean_text(request.note)),
        }
        .insert(conn)
        .await
        .map_err(ServiceError::db_error)?;

        tx.commit().await?;

        counter!("custody.transitions", 1, "transition" => "transfer");
        self.event_sender.publish(Event::ItemTransferred {
            item_id,
            transfer_id: transfer.id,
            origin_unit_id: origin,
            destination_unit_id: destination,
            actor_id: session.user_id,
            at: now,
        });
        info!(transfer_id = %transfer.id, %origin, "item transferred");

        Ok(TransferOutcome {
            item: item::Model {
                unit_id: destination,
                updated_at: now,
                ..item
            },
            transfer,
        })
    }

    /// Movements of items in the caller's units, newest first.
    #[instrument(skip(self, session, filters), fields(user_id = %session.user_id))]
    pub async fn list_movements(
        &self,
        session: &Session,
        filters: Vec<MovementFilter>,
        page: PageRequest,
    ) -> Result<Page<movement::Model>, ServiceError> {
        session.require(Action::ViewInventory)?;
        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;
        visible
            .select::<movement::Entity>()
            .apply(&filters)
            .order_by(movement::Column::CheckoutAt, Order::Desc)
            .page(db, page)
            .await
    }

    /// Transfers touching the caller's units, newest first.
    #[instrument(skip(self, session, filters), fields(user_id = %session.user_id))]
    pub async fn list_transfers(
        &self,
        session: &Session,
        filters: Vec<TransferFilter>,
        page: PageRequest,
    ) -> Result<Page<transfer::Model>, ServiceError> {
        session.require(Action::ViewInventory)?;
        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;
        visible
            .select::<transfer::Entity>()
            .apply(&filters)
            .order_by(transfer::Column::TransferredAt, Order::Desc)
            .page(db, page)
            .await
    }

    /// Items the caller currently holds. Bounded by holder rather than unit,
    /// so an item checked out to the caller from another unit still shows.
    #[instrument(skip(self, session), fields(user_id = %session.user_id))]
    pub async fn my_items(&self, session: &Session) -> Result<Vec<HeldItem>, ServiceError> {
        session.require(Action::ViewInventory)?;
        let db = &*self.db;

        let movements = movement::Entity::find()
            .filter(movement::Column::HolderId.eq(session.user_id))
            .filter(movement::Column::ReturnedAt.is_null())
            .order_by_desc(movement::Column::CheckoutAt)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        if movements.is_empty() {
            return Ok(Vec::new());
        }

        let items = item::Entity::find()
            .filter(item::Column::Id.is_in(movements.iter().map(|m| m.item_id)))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(pair_held(items, movements))
    }
}
