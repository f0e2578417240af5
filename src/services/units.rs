use crate::{
    auth::{Action, Session},
    db::{DbPool, Tx},
    entities::{item, transfer, unit, user},
    errors::ServiceError,
    events::{ChangeKind, Event, EventSender},
    services::{
        clean_text,
        hierarchy::{build_tree, UnitNode},
        scope::{NameSearch, Page, PageRequest},
        HierarchyService, UnitForest,
    },
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, Set,
};
use serde::{Deserialize, Deserializer};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateUnitRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,
    #[validate(length(max = 32))]
    pub code: Option<String>,
    #[validate(length(max = 500))]
    pub address: Option<String>,
    /// `None` creates a root unit.
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateUnitRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: Option<String>,
    #[validate(length(max = 32))]
    pub code: Option<String>,
    #[validate(length(max = 500))]
    pub address: Option<String>,
    /// Absent keeps the parent, `null` detaches the unit into a root.
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<Uuid>, nullable)]
    pub parent_id: Option<Option<Uuid>>,
}

#[derive(Clone)]
pub struct UnitService {
    db: Arc<DbPool>,
    hierarchy: HierarchyService,
    event_sender: Arc<EventSender>,
}

impl UnitService {
    pub fn new(db: Arc<DbPool>, hierarchy: HierarchyService, event_sender: Arc<EventSender>) -> Self {
        Self {
            db,
            hierarchy,
            event_sender,
        }
    }

    /// Root units may only be created or produced by a manager whose own home
    /// unit is a root.
    async fn ensure_may_place_root<C: ConnectionTrait>(
        &self,
        conn: &C,
        session: &Session,
    ) -> Result<(), ServiceError> {
        let home = unit::Entity::find_by_id(session.unit_id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Unit {}", session.unit_id)))?;
        if home.is_root() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(
                "only managers of a root unit may create root units".to_string(),
            ))
        }
    }

    #[instrument(skip(self, session, request), fields(user_id = %session.user_id, name = %request.name))]
    pub async fn create_unit(
        &self,
        session: &Session,
        request: CreateUnitRequest,
    ) -> Result<unit::Model, ServiceError> {
        session.require(Action::ManageUnits)?;
        request.validate()?;

        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;
        match request.parent_id {
            Some(parent) => visible.ensure(parent, "parent unit")?,
            None => self.ensure_may_place_root(db, session).await?,
        }

        let tx = Tx::begin(db, "units.create").await?;
        let conn = tx.conn()?;

        UnitForest::load(conn).await?.check_placement(
            None,
            request.parent_id,
            self.hierarchy.max_depth(),
        )?;

        let now = Utc::now();
        let model = unit::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name.trim().to_string()),
            code: Set(clean_text(request.code)),
            address: Set(clean_text(request.address)),
            parent_id: Set(request.parent_id),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(conn)
        .await
        .map_err(ServiceError::db_error)?;

        tx.commit().await?;

        self.event_sender.publish(Event::UnitChanged {
            unit_id: model.id,
            change: ChangeKind::Created,
            actor_id: session.user_id,
        });
        info!(unit_id = %model.id, parent_id = ?model.parent_id, "unit created");
        Ok(model)
    }

    /// Edits a unit, re-parenting it when `parent_id` is present.
    #[instrument(skip(self, session, request), fields(user_id = %session.user_id))]
    pub async fn update_unit(
        &self,
        session: &Session,
        unit_id: Uuid,
        request: UpdateUnitRequest,
    ) -> Result<unit::Model, ServiceError> {
        session.require(Action::ManageUnits)?;
        request.validate()?;

        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;
        visible.ensure(unit_id, "unit")?;
        match request.parent_id {
            Some(Some(parent)) => visible.ensure(parent, "parent unit")?,
            Some(None) => self.ensure_may_place_root(db, session).await?,
            None => {}
        }

        let tx = Tx::begin(db, "units.update").await?;
        let conn = tx.conn()?;

        let existing = unit::Entity::find_by_id(unit_id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Unit {}", unit_id)))?;

        let mut active: unit::ActiveModel = existing.clone().into();
        if let Some(parent) = request.parent_id {
            if parent != existing.parent_id {
                UnitForest::load(conn).await?.check_placement(
                    Some(unit_id),
                    parent,
                    self.hierarchy.max_depth(),
                )?;
                active.parent_id = Set(parent);
            }
        }
        if let Some(name) = request.name {
            active.name = Set(name.trim().to_string());
        }
        if request.code.is_some() {
            active.code = Set(clean_text(request.code));
        }
        if request.address.is_some() {
            active.address = Set(clean_text(request.address));
        }
        active.updated_at = Set(Utc::now());

        let updated = active.update(conn).await.map_err(ServiceError::db_error)?;
        tx.commit().await?;

        self.event_sender.publish(Event::UnitChanged {
            unit_id,
            change: ChangeKind::Updated,
            actor_id: session.user_id,
        });
        info!(%unit_id, parent_id = ?updated.parent_id, "unit updated");
        Ok(updated)
    }

    /// Deletes an empty unit: no child units, users, items or transfers.
    #[instrument(skip(self, session), fields(user_id = %session.user_id))]
    pub async fn delete_unit(&self, session: &Session, unit_id: Uuid) -> Result<(), ServiceError> {
        session.require(Action::ManageUnits)?;

        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;
        visible.ensure(unit_id, "unit")?;
        if unit_id == session.unit_id {
            return Err(ServiceError::InvalidOperation(
                "users cannot delete their own home unit".to_string(),
            ));
        }

        let tx = Tx::begin(db, "units.delete").await?;
        let conn = tx.conn()?;

        let children = unit::Entity::find()
            .filter(unit::Column::ParentId.eq(unit_id))
            .count(conn)
            .await
            .map_err(ServiceError::db_error)?;
        let users = user::Entity::find()
            .filter(user::Column::UnitId.eq(unit_id))
            .count(conn)
            .await
            .map_err(ServiceError::db_error)?;
        let items = item::Entity::find()
            .filter(item::Column::UnitId.eq(unit_id))
            .count(conn)
            .await
            .map_err(ServiceError::db_error)?;
        let transfers = transfer::Entity::find()
            .filter(
                Condition::any()
                    .add(transfer::Column::OriginUnitId.eq(unit_id))
                    .add(transfer::Column::DestinationUnitId.eq(unit_id)),
            )
            .count(conn)
            .await
            .map_err(ServiceError::db_error)?;

        if children + users + items + transfers > 0 {
            return Err(ServiceError::HasDependents(format!(
                "unit has {} child unit(s), {} user(s), {} item(s) and {} transfer(s)",
                children, users, items, transfers
            )));
        }

        let result = unit::Entity::delete_by_id(unit_id)
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Unit {}", unit_id)));
        }
        tx.commit().await?;

        self.event_sender.publish(Event::UnitChanged {
            unit_id,
            change: ChangeKind::Deleted,
            actor_id: session.user_id,
        });
        info!(%unit_id, "unit deleted");
        Ok(())
    }

    #[instrument(skip(self, session), fields(user_id = %session.user_id))]
    pub async fn get_unit(&self, session: &Session, unit_id: Uuid) -> Result<unit::Model, ServiceError> {
        session.require(Action::ViewInventory)?;
        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;
        visible.ensure(unit_id, "unit")?;
        unit::Entity::find_by_id(unit_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Unit {}", unit_id)))
    }

    #[instrument(skip(self, session), fields(user_id = %session.user_id))]
    pub async fn list_units(
        &self,
        session: &Session,
        search: Option<String>,
        page: PageRequest,
    ) -> Result<Page<unit::Model>, ServiceError> {
        session.require(Action::ViewInventory)?;
        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;
        let filters: Vec<NameSearch> = search
            .filter(|s| !s.trim().is_empty())
            .map(NameSearch)
            .into_iter()
            .collect();
        visible
            .select::<unit::Entity>()
            .apply(&filters)
            .order_by(unit::Column::Name, Order::Asc)
            .page(db, page)
            .await
    }

    /// The caller's home unit with its visible descendants nested.
    #[instrument(skip(self, session), fields(user_id = %session.user_id))]
    pub async fn unit_tree(&self, session: &Session) -> Result<UnitNode, ServiceError> {
        session.require(Action::ViewInventory)?;
        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;
        let units = visible.select::<unit::Entity>().all(db).await?;
        let home = units
            .iter()
            .find(|u| u.id == session.unit_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("Unit {}", session.unit_id)))?;
        let forest = UnitForest::from_edges(units.iter().map(|u| (u.id, u.parent_id)));
        Ok(build_tree(home, &units, &forest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_field_distinguishes_absent_from_null() {
        let absent: UpdateUnitRequest = serde_json::from_str(r#"{"name":"A"}"#).unwrap();
        assert_eq!(absent.parent_id, None);

        let detach: UpdateUnitRequest = serde_json::from_str(r#"{"parent_id":null}"#).unwrap();
        assert_eq!(detach.parent_id, Some(None));

        let id = Uuid::new_v4();
        let moved: UpdateUnitRequest =
            serde_json::from_str(&format!(r#"{{"parent_id":"{}"}}"#, id)).unwrap();
        assert_eq!(moved.parent_id, Some(Some(id)));
    }

    #[test]
    fn blank_optional_text_is_dropped() {
        assert_eq!(clean_text(Some("  ".into())), None);
        assert_eq!(clean_text(Some(" A1 ".into())), Some("A1".into()));
    }
}
