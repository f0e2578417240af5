use crate::{
    auth::{Action, Session},
    db::{is_unique_violation, DbPool, Tx},
    entities::{item, item_type, movement, transfer, ItemStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        clean_text,
        custody::{compare_and_set, current_status},
        scope::{ItemFilter, Page, PageRequest, VisibleUnits},
        HierarchyService,
    },
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateItemRequest {
    #[validate(length(min = 1, max = 64, message = "Code must be 1-64 characters"))]
    pub code: String,
    #[validate(length(min = 1, max = 500, message = "Description must be 1-500 characters"))]
    pub description: String,
    pub type_id: Uuid,
    pub unit_id: Uuid,
    #[validate(length(max = 500))]
    pub status_note: Option<String>,
}

/// Editable fields. The owning unit only changes through a transfer.
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateItemRequest {
    #[validate(length(min = 1, max = 500, message = "Description must be 1-500 characters"))]
    pub description: Option<String>,
    pub type_id: Option<Uuid>,
    /// An empty string clears the note.
    #[validate(length(max = 500))]
    pub status_note: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct DeactivateItemRequest {
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

/// An item with its full custody trail, newest first.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ItemHistory {
    pub item: item::Model,
    pub movements: Vec<movement::Model>,
    pub transfers: Vec<transfer::Model>,
}

/// Loads an item and checks that its unit is visible.
pub(crate) async fn find_visible_item<C: ConnectionTrait>(
    conn: &C,
    visible: &VisibleUnits,
    item_id: Uuid,
) -> Result<item::Model, ServiceError> {
    let item = item::Entity::find_by_id(item_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Item {}", item_id)))?;
    visible.ensure(item.unit_id, "item")?;
    Ok(item)
}

async fn ensure_item_type<C: ConnectionTrait>(conn: &C, type_id: Uuid) -> Result<(), ServiceError> {
    item_type::Entity::find_by_id(type_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .map(|_| ())
        .ok_or_else(|| ServiceError::NotFound(format!("Item type {}", type_id)))
}

/// Service for registering and maintaining items
#[derive(Clone)]
pub struct ItemService {
    db: Arc<DbPool>,
    hierarchy: HierarchyService,
    event_sender: Arc<EventSender>,
}

impl ItemService {
    pub fn new(db: Arc<DbPool>, hierarchy: HierarchyService, event_sender: Arc<EventSender>) -> Self {
        Self {
            db,
            hierarchy,
            event_sender,
        }
    }

    /// Registers a new item in one of the caller's units.
    #[instrument(skip(self, session, request), fields(user_id = %session.user_id, code = %request.code))]
    pub async fn create_item(
        &self,
        session: &Session,
        request: CreateItemRequest,
    ) -> Result<item::Model, ServiceError> {
        session.require(Action::ManageItems)?;
        request.validate()?;

        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;
        visible.ensure(request.unit_id, "unit")?;
        ensure_item_type(db, request.type_id).await?;

        let code = request.code.trim().to_string();
        if code.is_empty() {
            return Err(ServiceError::ValidationError("Code must not be blank".to_string()));
        }
        let taken = item::Entity::find()
            .filter(item::Column::Code.eq(code.as_str()))
            .count(db)
            .await
            .map_err(ServiceError::db_error)?;
        if taken > 0 {
            return Err(ServiceError::DuplicateCode(format!("item code {}", code)));
        }

        let now = Utc::now();
        let model = item::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.clone()),
            description: Set(request.description.trim().to_string()),
            type_id: Set(request.type_id),
            unit_id: Set(request.unit_id),
            status: Set(ItemStatus::Available),
            status_note: Set(clean_text(request.status_note)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::DuplicateCode(format!("item code {}", code))
            } else {
                ServiceError::db_error(e)
            }
        })?;

        counter!("custody.items.created", 1);
        info!(item_id = %model.id, unit_id = %model.unit_id, "item registered");
        Ok(model)
    }

    #[instrument(skip(self, session), fields(user_id = %session.user_id))]
    pub async fn get_item(&self, session: &Session, item_id: Uuid) -> Result<item::Model, ServiceError> {
        session.require(Action::ViewInventory)?;
        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;
        find_visible_item(db, &visible, item_id).await
    }

    /// Lists items in the caller's units, ordered by code.
    #[instrument(skip(self, session, filters), fields(user_id = %session.user_id))]
    pub async fn list_items(
        &self,
        session: &Session,
        filters: Vec<ItemFilter>,
        page: PageRequest,
    ) -> Result<Page<item::Model>, ServiceError> {
        session.require(Action::ViewInventory)?;
        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;
        visible
            .select::<item::Entity>()
            .apply(&filters)
            .order_by(item::Column::Code, Order::Asc)
            .page(db, page)
            .await
    }

    #[instrument(skip(self, session, request), fields(user_id = %session.user_id))]
    pub async fn update_item(
        &self,
        session: &Session,
        item_id: Uuid,
        request: UpdateItemRequest,
    ) -> Result<item::Model, ServiceError> {
        session.require(Action::ManageItems)?;
        request.validate()?;

        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;
        let item = find_visible_item(db, &visible, item_id).await?;
        if item.status == ItemStatus::Inactive {
            return Err(ServiceError::InvalidOperation(
                "inactive items cannot be edited".to_string(),
            ));
        }

        let mut active: item::ActiveModel = item.into();
        if let Some(description) = request.description {
            active.description = Set(description.trim().to_string());
        }
        if let Some(type_id) = request.type_id {
            ensure_item_type(db, type_id).await?;
            active.type_id = Set(type_id);
        }
        if request.status_note.is_some() {
            active.status_note = Set(clean_text(request.status_note));
        }
        active.updated_at = Set(Utc::now());

        let updated = active.update(db).await.map_err(ServiceError::db_error)?;
        info!(item_id = %updated.id, "item updated");
        Ok(updated)
    }

    /// Hard-deletes an item without custody history.
    ///
    /// Items with any movement or transfer fail with `HasHistory`, whose
    /// `can_deactivate` flag tells the caller whether deactivation is an option.
    #[instrument(skip(self, session), fields(user_id = %session.user_id))]
    pub async fn delete_item(&self, session: &Session, item_id: Uuid) -> Result<(), ServiceError> {
        session.require(Action::ManageItems)?;

        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;
        find_visible_item(db, &visible, item_id).await?;

        let tx = Tx::begin(db, "items.delete").await?;
        let conn = tx.conn()?;

        let status = current_status(conn, item_id).await?;
        let movements = movement::Entity::find()
            .filter(movement::Column::ItemId.eq(item_id))
            .count(conn)
            .await
            .map_err(ServiceError::db_error)?;
        let transfers = transfer::Entity::find()
            .filter(transfer::Column::ItemId.eq(item_id))
            .count(conn)
            .await
            .map_err(ServiceError::db_error)?;

        if movements + transfers > 0 {
            return Err(ServiceError::HasHistory {
                message: format!(
                    "item has {} movement(s) and {} transfer(s); deactivate it instead",
                    movements, transfers
                ),
                can_deactivate: !matches!(status, ItemStatus::InUse | ItemStatus::Inactive),
            });
        }
        if status == ItemStatus::InUse {
            return Err(ServiceError::NotAvailable { status });
        }

        let result = item::Entity::delete_many()
            .filter(item::Column::Id.eq(item_id))
            .filter(item::Column::Status.ne(ItemStatus::InUse))
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            let status = current_status(conn, item_id).await?;
            return Err(ServiceError::NotAvailable { status });
        }

        tx.commit().await?;
        counter!("custody.items.deleted", 1);
        info!(%item_id, "item deleted");
        Ok(())
    }

    /// Moves an item to INACTIVE, keeping its history. Not reversible.
    #[instrument(skip(self, session, request), fields(user_id = %session.user_id))]
    pub async fn deactivate_item(
        &self,
        session: &Session,
        item_id: Uuid,
        request: DeactivateItemRequest,
    ) -> Result<item::Model, ServiceError> {
        session.require(Action::ManageItems)?;
        request.validate()?;

        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;
        let item = find_visible_item(db, &visible, item_id).await?;
        match item.status {
            ItemStatus::InUse => {
                return Err(ServiceError::NotAvailable {
                    status: ItemStatus::InUse,
                })
            }
            ItemStatus::Inactive => {
                return Err(ServiceError::InvalidOperation(
                    "item is already inactive".to_string(),
                ))
            }
            ItemStatus::Available | ItemStatus::Maintenance => {}
        }

        let now = Utc::now();
        let note = clean_text(request.note);
        let swapped = compare_and_set(
            db,
            item_id,
            &[ItemStatus::Available, ItemStatus::Maintenance],
            ItemStatus::Inactive,
            note.clone(),
            now,
        )
        .await?;
        if !swapped {
            let status = current_status(db, item_id).await?;
            warn!(%item_id, %status, "item changed state before deactivation");
            return Err(ServiceError::NotAvailable { status });
        }

        counter!("custody.transitions", 1, "transition" => "deactivate");
        self.event_sender.publish(Event::ItemDeactivated {
            item_id,
            actor_id: session.user_id,
            at: now,
        });
        info!(%item_id, "item deactivated");

        Ok(item::Model {
            status: ItemStatus::Inactive,
            status_note: note,
            updated_at: now,
            ..item
        })
    }

    /// The item plus all of its movements and transfers.
    #[instrument(skip(self, session), fields(user_id = %session.user_id))]
    pub async fn item_history(&self, session: &Session, item_id: Uuid) -> Result<ItemHistory, ServiceError> {
        session.require(Action::ViewInventory)?;
        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;
        let item = find_visible_item(db, &visible, item_id).await?;

        let movements = movement::Entity::find()
            .filter(movement::Column::ItemId.eq(item_id))
            .order_by_desc(movement::Column::CheckoutAt)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        let transfers = transfer::Entity::find()
            .filter(transfer::Column::ItemId.eq(item_id))
            .order_by_desc(transfer::Column::TransferredAt)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(ItemHistory {
            item,
            movements,
            transfers,
        })
    }
}
