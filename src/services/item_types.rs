use crate::{
    auth::{Action, Session},
    db::{is_unique_violation, DbPool},
    entities::{item, item_type, item_type::normalize_name},
    errors::ServiceError,
    services::scope::{like_pattern, Page, PageRequest},
};
use chrono::Utc;
use sea_orm::{
    sea_query::{Expr, Func},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct ItemTypeRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
}

/// Item types are a global catalog shared by every unit.
#[derive(Clone)]
pub struct ItemTypeService {
    db: Arc<DbPool>,
}

impl ItemTypeService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    async fn find<C: ConnectionTrait>(conn: &C, type_id: Uuid) -> Result<item_type::Model, ServiceError> {
        item_type::Entity::find_by_id(type_id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Item type {}", type_id)))
    }

    async fn ensure_unreferenced<C: ConnectionTrait>(conn: &C, type_id: Uuid) -> Result<(), ServiceError> {
        let items = item::Entity::find()
            .filter(item::Column::TypeId.eq(type_id))
            .count(conn)
            .await
            .map_err(ServiceError::db_error)?;
        if items > 0 {
            return Err(ServiceError::HasDependents(format!(
                "item type is used by {} item(s)",
                items
            )));
        }
        Ok(())
    }

    async fn ensure_name_free<C: ConnectionTrait>(
        conn: &C,
        normalized: &str,
        except: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        let mut query = item_type::Entity::find().filter(item_type::Column::NormalizedName.eq(normalized));
        if let Some(id) = except {
            query = query.filter(item_type::Column::Id.ne(id));
        }
        if query.count(conn).await.map_err(ServiceError::db_error)? > 0 {
            return Err(ServiceError::DuplicateCode(format!("item type {}", normalized)));
        }
        Ok(())
    }

    fn clean(request: &ItemTypeRequest) -> Result<(String, String), ServiceError> {
        let name = request.name.split_whitespace().collect::<Vec<_>>().join(" ");
        if name.is_empty() {
            return Err(ServiceError::ValidationError("Name must not be blank".to_string()));
        }
        let normalized = normalize_name(&name);
        Ok((name, normalized))
    }

    #[instrument(skip(self, session, request), fields(user_id = %session.user_id, name = %request.name))]
    pub async fn create_item_type(
        &self,
        session: &Session,
        request: ItemTypeRequest,
    ) -> Result<item_type::Model, ServiceError> {
        session.require(Action::ManageItemTypes)?;
        request.validate()?;
        let (name, normalized) = Self::clean(&request)?;

        let db = &*self.db;
        Self::ensure_name_free(db, &normalized, None).await?;

        let now = Utc::now();
        let model = item_type::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name),
            normalized_name: Set(normalized.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::DuplicateCode(format!("item type {}", normalized))
            } else {
                ServiceError::db_error(e)
            }
        })?;

        info!(type_id = %model.id, "item type created");
        Ok(model)
    }

    /// Renames an item type that no item references yet.
    #[instrument(skip(self, session, request), fields(user_id = %session.user_id))]
    pub async fn update_item_type(
        &self,
        session: &Session,
        type_id: Uuid,
        request: ItemTypeRequest,
    ) -> Result<item_type::Model, ServiceError> {
        session.require(Action::ManageItemTypes)?;
        request.validate()?;
        let (name, normalized) = Self::clean(&request)?;

        let db = &*self.db;
        let existing = Self::find(db, type_id).await?;
        Self::ensure_unreferenced(db, type_id).await?;
        Self::ensure_name_free(db, &normalized, Some(type_id)).await?;

        let mut active: item_type::ActiveModel = existing.into();
        active.name = Set(name);
        active.normalized_name = Set(normalized);
        active.updated_at = Set(Utc::now());
        let updated = active.update(db).await.map_err(ServiceError::db_error)?;

        info!(%type_id, "item type updated");
        Ok(updated)
    }

    #[instrument(skip(self, session), fields(user_id = %session.user_id))]
    pub async fn delete_item_type(&self, session: &Session, type_id: Uuid) -> Result<(), ServiceError> {
        session.require(Action::ManageItemTypes)?;

        let db = &*self.db;
        Self::find(db, type_id).await?;
        Self::ensure_unreferenced(db, type_id).await?;
        item_type::Entity::delete_by_id(type_id)
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;

        info!(%type_id, "item type deleted");
        Ok(())
    }

    pub async fn get_item_type(&self, session: &Session, type_id: Uuid) -> Result<item_type::Model, ServiceError> {
        session.require(Action::ViewInventory)?;
        Self::find(&*self.db, type_id).await
    }

    pub async fn list_item_types(
        &self,
        session: &Session,
        search: Option<String>,
        page: PageRequest,
    ) -> Result<Page<item_type::Model>, ServiceError> {
        session.require(Action::ViewInventory)?;

        let mut query = item_type::Entity::find().order_by_asc(item_type::Column::NormalizedName);
        if let Some(term) = search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let pattern = like_pattern(&normalize_name(term));
            query = query.filter(Expr::expr(Func::lower(Expr::col(item_type::Column::Name))).like(pattern));
        }

        let paginator = query.paginate(&*self.db, page.per_page);
        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let items = paginator
            .fetch_page(page.page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;
        Ok(Page::new(items, total, page))
    }
}
