use crate::{
    auth::{password::hash_password, Action, Session},
    db::{is_unique_violation, DbPool, Tx},
    entities::{movement, transfer, user, Role},
    errors::ServiceError,
    events::{ChangeKind, Event, EventSender},
    services::{
        scope::{NameSearch, Page, PageRequest, VisibleUnits},
        HierarchyService,
    },
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Public view of a user; never carries the password hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserView {
    pub id: Uuid,
    pub registration: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub unit_id: Uuid,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<user::Model> for UserView {
    fn from(model: user::Model) -> Self {
        Self {
            id: model.id,
            registration: model.registration,
            name: model.name,
            email: model.email,
            role: model.role,
            unit_id: model.unit_id,
            active: model.active,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = 64, message = "Registration must be 1-64 characters"))]
    pub registration: String,
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    pub password: String,
    pub role: Role,
    pub unit_id: Uuid,
}

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 64, message = "Registration must be 1-64 characters"))]
    pub registration: Option<String>,
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: Option<String>,
    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,
    pub role: Option<Role>,
    pub unit_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct ResetPasswordRequest {
    pub password: String,
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl CreateUserRequest {
    /// Trims identifiers and lowercases the email so validation and
    /// uniqueness both see the stored form.
    fn normalized(mut self) -> Self {
        self.email = normalize_email(&self.email);
        self.registration = self.registration.trim().to_string();
        self.name = self.name.trim().to_string();
        self
    }
}

impl UpdateUserRequest {
    fn normalized(mut self) -> Self {
        self.email = self.email.as_deref().map(normalize_email);
        self.registration = self.registration.map(|r| r.trim().to_string());
        self.name = self.name.map(|n| n.trim().to_string());
        self
    }
}

/// Fails with `DuplicateCode` when another user already owns `email` or
/// `registration`.
async fn ensure_unique<C: ConnectionTrait>(
    conn: &C,
    email: Option<&str>,
    registration: Option<&str>,
    except: Option<Uuid>,
) -> Result<(), ServiceError> {
    let mut checks = Vec::new();
    if let Some(email) = email {
        checks.push(("email", user::Column::Email.eq(email)));
    }
    if let Some(registration) = registration {
        checks.push(("registration", user::Column::Registration.eq(registration)));
    }

    for (field, condition) in checks {
        let mut query = user::Entity::find().filter(condition);
        if let Some(id) = except {
            query = query.filter(user::Column::Id.ne(id));
        }
        let count = query.count(conn).await.map_err(ServiceError::db_error)?;
        if count > 0 {
            return Err(ServiceError::DuplicateCode(format!("user {} already in use", field)));
        }
    }
    Ok(())
}

fn map_unique(e: sea_orm::DbErr) -> ServiceError {
    if is_unique_violation(&e) {
        ServiceError::DuplicateCode("user email or registration already in use".to_string())
    } else {
        ServiceError::db_error(e)
    }
}

async fn find_visible_user<C: ConnectionTrait>(
    conn: &C,
    visible: &VisibleUnits,
    user_id: Uuid,
) -> Result<user::Model, ServiceError> {
    let user = user::Entity::find_by_id(user_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("User {}", user_id)))?;
    visible.ensure(user.unit_id, "user")?;
    Ok(user)
}

#[derive(Clone)]
pub struct UserService {
    db: Arc<DbPool>,
    hierarchy: HierarchyService,
    event_sender: Arc<EventSender>,
}

impl UserService {
    pub fn new(db: Arc<DbPool>, hierarchy: HierarchyService, event_sender: Arc<EventSender>) -> Self {
        Self {
            db,
            hierarchy,
            event_sender,
        }
    }

    fn changed(&self, user_id: Uuid, change: ChangeKind, session: &Session) {
        self.event_sender.publish(Event::UserChanged {
            user_id,
            change,
            actor_id: session.user_id,
        });
    }

    #[instrument(skip(self, session, request), fields(user_id = %session.user_id, registration = %request.registration))]
    pub async fn create_user(
        &self,
        session: &Session,
        request: CreateUserRequest,
    ) -> Result<UserView, ServiceError> {
        session.require(Action::ManageUsers)?;
        let request = request.normalized();
        request.validate()?;

        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;
        visible.ensure(request.unit_id, "unit")?;

        ensure_unique(db, Some(&request.email), Some(&request.registration), None).await?;
        let password_hash = hash_password(&request.password)?;

        let now = Utc::now();
        let model = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            registration: Set(request.registration),
            name: Set(request.name),
            email: Set(request.email),
            password_hash: Set(password_hash),
            role: Set(request.role),
            unit_id: Set(request.unit_id),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .map_err(map_unique)?;

        self.changed(model.id, ChangeKind::Created, session);
        info!(new_user_id = %model.id, role = %model.role, unit_id = %model.unit_id, "user created");
        Ok(model.into())
    }

    #[instrument(skip(self, session, request), fields(user_id = %session.user_id))]
    pub async fn update_user(
        &self,
        session: &Session,
        user_id: Uuid,
        request: UpdateUserRequest,
    ) -> Result<UserView, ServiceError> {
        session.require(Action::ManageUsers)?;
        let request = request.normalized();
        request.validate()?;

        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;
        let existing = find_visible_user(db, &visible, user_id).await?;
        if user_id == session.user_id {
            let role_change = request.role.is_some_and(|role| role != existing.role);
            let unit_change = request.unit_id.is_some_and(|unit| unit != existing.unit_id);
            if role_change || unit_change {
                return Err(ServiceError::InvalidOperation(
                    "users cannot change their own role or unit".to_string(),
                ));
            }
        }
        if let Some(unit_id) = request.unit_id {
            visible.ensure(unit_id, "unit")?;
        }

        ensure_unique(
            db,
            request.email.as_deref(),
            request.registration.as_deref(),
            Some(user_id),
        )
        .await?;

        let mut active: user::ActiveModel = existing.into();
        if let Some(email) = request.email {
            active.email = Set(email);
        }
        if let Some(registration) = request.registration {
            active.registration = Set(registration);
        }
        if let Some(name) = request.name {
            active.name = Set(name);
        }
        if let Some(role) = request.role {
            active.role = Set(role);
        }
        if let Some(unit_id) = request.unit_id {
            active.unit_id = Set(unit_id);
        }
        active.updated_at = Set(Utc::now());

        let updated = active.update(db).await.map_err(map_unique)?;
        self.changed(user_id, ChangeKind::Updated, session);
        info!(target_user_id = %user_id, "user updated");
        Ok(updated.into())
    }

    #[instrument(skip(self, session, request), fields(user_id = %session.user_id))]
    pub async fn reset_password(
        &self,
        session: &Session,
        user_id: Uuid,
        request: ResetPasswordRequest,
    ) -> Result<(), ServiceError> {
        session.require(Action::ManageUsers)?;

        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;
        let existing = find_visible_user(db, &visible, user_id).await?;
        let password_hash = hash_password(&request.password)?;

        let mut active: user::ActiveModel = existing.into();
        active.password_hash = Set(password_hash);
        active.updated_at = Set(Utc::now());
        active.update(db).await.map_err(ServiceError::db_error)?;

        info!(target_user_id = %user_id, "password reset");
        Ok(())
    }

    /// Sets `active = false`. Deactivated users cannot log in and cannot
    /// receive items; there is no reactivation.
    #[instrument(skip(self, session), fields(user_id = %session.user_id))]
    pub async fn deactivate_user(&self, session: &Session, user_id: Uuid) -> Result<UserView, ServiceError> {
        session.require(Action::ManageUsers)?;
        if user_id == session.user_id {
            return Err(ServiceError::InvalidOperation(
                "users cannot deactivate themselves".to_string(),
            ));
        }

        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;
        let existing = find_visible_user(db, &visible, user_id).await?;
        if !existing.active {
            return Err(ServiceError::InvalidOperation(
                "user is already inactive".to_string(),
            ));
        }

        let mut active: user::ActiveModel = existing.into();
        active.active = Set(false);
        active.updated_at = Set(Utc::now());
        let updated = active.update(db).await.map_err(ServiceError::db_error)?;

        self.changed(user_id, ChangeKind::Deactivated, session);
        info!(target_user_id = %user_id, "user deactivated");
        Ok(updated.into())
    }

    /// Hard-deletes a user that no movement or transfer references.
    #[instrument(skip(self, session), fields(user_id = %session.user_id))]
    pub async fn delete_user(&self, session: &Session, user_id: Uuid) -> Result<(), ServiceError> {
        session.require(Action::ManageUsers)?;
        if user_id == session.user_id {
            return Err(ServiceError::InvalidOperation(
                "users cannot delete themselves".to_string(),
            ));
        }

        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;
        let existing = find_visible_user(db, &visible, user_id).await?;

        let tx = Tx::begin(db, "users.delete").await?;
        let conn = tx.conn()?;

        let movements = movement::Entity::find()
            .filter(
                Condition::any()
                    .add(movement::Column::HolderId.eq(user_id))
                    .add(movement::Column::CheckoutBy.eq(user_id))
                    .add(movement::Column::ReturnedBy.eq(user_id)),
            )
            .count(conn)
            .await
            .map_err(ServiceError::db_error)?;
        let transfers = transfer::Entity::find()
            .filter(transfer::Column::TransferredBy.eq(user_id))
            .count(conn)
            .await
            .map_err(ServiceError::db_error)?;
        if movements + transfers > 0 {
            return Err(ServiceError::HasHistory {
                message: format!(
                    "user is referenced by {} movement(s) and {} transfer(s); deactivate instead",
                    movements, transfers
                ),
                can_deactivate: existing.active,
            });
        }

        user::Entity::delete_by_id(user_id)
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;
        tx.commit().await?;

        self.changed(user_id, ChangeKind::Deleted, session);
        info!(target_user_id = %user_id, "user deleted");
        Ok(())
    }

    #[instrument(skip(self, session), fields(user_id = %session.user_id))]
    pub async fn get_user(&self, session: &Session, user_id: Uuid) -> Result<UserView, ServiceError> {
        session.require(Action::ViewInventory)?;
        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;
        find_visible_user(db, &visible, user_id).await.map(Into::into)
    }

    #[instrument(skip(self, session), fields(user_id = %session.user_id))]
    pub async fn list_users(
        &self,
        session: &Session,
        search: Option<String>,
        page: PageRequest,
    ) -> Result<Page<UserView>, ServiceError> {
        session.require(Action::ViewInventory)?;
        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;
        let filters: Vec<NameSearch> = search
            .filter(|s| !s.trim().is_empty())
            .map(NameSearch)
            .into_iter()
            .collect();
        let page = visible
            .select::<user::Entity>()
            .apply(&filters)
            .order_by(user::Column::Name, Order::Asc)
            .page(db, page)
            .await?;
        Ok(page.map(UserView::from))
    }

    /// The caller's own record.
    pub async fn me(&self, session: &Session) -> Result<UserView, ServiceError> {
        user::Entity::find_by_id(session.user_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .map(UserView::from)
            .ok_or(ServiceError::Unauthenticated)
    }
}
