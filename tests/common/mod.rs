#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use custody_api::{
    auth::{password::hash_password, Session},
    config::{AppConfig, DEV_DEFAULT_JWT_SECRET},
    db::{self, DbConfig},
    entities::{item, item_type, unit, user, ItemStatus, Role},
    events, AppState,
};
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

/// Password shared by every seeded user.
pub const PASSWORD: &str = "correct-horse-battery-9";

/// Seeded organization:
///
/// ```text
/// HQ (root)
/// ├── North
/// │   └── North-A
/// └── South
/// ```
pub struct Fixture {
    pub hq: unit::Model,
    pub north: unit::Model,
    pub north_a: unit::Model,
    pub south: unit::Model,
    /// MANAGER at HQ
    pub admin: user::Model,
    /// MANAGER at North
    pub north_manager: user::Model,
    /// CONTROLLER at North-A
    pub controller: user::Model,
    /// BASIC at North-A
    pub basic: user::Model,
    /// CONTROLLER at South
    pub south_controller: user::Model,
    pub radio_type: item_type::Model,
    /// AVAILABLE item at North-A
    pub radio: item::Model,
    /// AVAILABLE item at North
    pub laptop: item::Model,
    /// AVAILABLE item at South
    pub drill: item::Model,
}

/// Application state over a fresh in-memory database with the fixture seeded.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub fx: Fixture,
    _event_task: tokio::task::JoinHandle<()>,
}

pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::new(
        "sqlite::memory:".to_string(),
        DEV_DEFAULT_JWT_SECRET.to_string(),
        3600,
        "127.0.0.1".to_string(),
        18_080,
        "development".to_string(),
    );
    cfg.db_max_connections = 1;
    cfg.db_min_connections = 1;
    cfg
}

impl TestApp {
    pub async fn new() -> Self {
        let cfg = test_config();
        let pool = db::establish_connection_with_config(&DbConfig::sqlite_memory())
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let fx = seed(&pool).await;

        let (event_sender, event_rx) = events::channel(cfg.event_channel_capacity);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let state = AppState::new(Arc::new(pool), cfg, Arc::new(event_sender));
        let router = custody_api::build_router(state.clone());

        Self {
            router,
            state,
            fx,
            _event_task: event_task,
        }
    }

    pub fn db(&self) -> &db::DbPool {
        &self.state.db
    }

    pub fn session(&self, user: &user::Model) -> Session {
        Session::from_user(user)
    }

    pub fn token_for(&self, user: &user::Model) -> String {
        self.state
            .auth
            .issue_token(user)
            .expect("issue test token")
            .access_token
    }

    /// Inserts an AVAILABLE item of the seeded type into `unit_id`.
    pub async fn add_item(&self, code: &str, unit_id: Uuid) -> item::Model {
        insert_item(self.db(), code, self.fx.radio_type.id, unit_id).await
    }

    pub async fn add_unit(&self, name: &str, parent_id: Option<Uuid>) -> unit::Model {
        insert_unit(self.db(), name, parent_id).await
    }

    pub async fn add_user(&self, registration: &str, role: Role, unit_id: Uuid) -> user::Model {
        let hash = hash_password(PASSWORD).expect("hash test password");
        insert_user(self.db(), registration, role, unit_id, &hash).await
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Authenticated request as `user`.
    pub async fn request_as(
        &self,
        user: &user::Model,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> Response {
        let token = self.token_for(user);
        self.request(method, uri, body, Some(&token)).await
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

async fn seed(pool: &db::DbPool) -> Fixture {
    let hash = hash_password(PASSWORD).expect("hash test password");

    let hq = insert_unit(pool, "HQ", None).await;
    let north = insert_unit(pool, "North", Some(hq.id)).await;
    let north_a = insert_unit(pool, "North-A", Some(north.id)).await;
    let south = insert_unit(pool, "South", Some(hq.id)).await;

    let admin = insert_user(pool, "0001", Role::Manager, hq.id, &hash).await;
    let north_manager = insert_user(pool, "1001", Role::Manager, north.id, &hash).await;
    let controller = insert_user(pool, "1101", Role::Controller, north_a.id, &hash).await;
    let basic = insert_user(pool, "1102", Role::Basic, north_a.id, &hash).await;
    let south_controller = insert_user(pool, "2001", Role::Controller, south.id, &hash).await;

    let now = Utc::now();
    let radio_type = item_type::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("Radio".to_string()),
        normalized_name: Set("radio".to_string()),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(pool)
    .await
    .expect("seed item type");

    let radio = insert_item(pool, "RAD-001", radio_type.id, north_a.id).await;
    let laptop = insert_item(pool, "LAP-001", radio_type.id, north.id).await;
    let drill = insert_item(pool, "DRL-001", radio_type.id, south.id).await;

    Fixture {
        hq,
        north,
        north_a,
        south,
        admin,
        north_manager,
        controller,
        basic,
        south_controller,
        radio_type,
        radio,
        laptop,
        drill,
    }
}

async fn insert_unit(pool: &db::DbPool, name: &str, parent_id: Option<Uuid>) -> unit::Model {
    let now = Utc::now();
    unit::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        code: Set(None),
        address: Set(None),
        parent_id: Set(parent_id),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(pool)
    .await
    .expect("seed unit")
}

async fn insert_user(
    pool: &db::DbPool,
    registration: &str,
    role: Role,
    unit_id: Uuid,
    password_hash: &str,
) -> user::Model {
    let now = Utc::now();
    user::ActiveModel {
        id: Set(Uuid::new_v4()),
        registration: Set(registration.to_string()),
        name: Set(format!("User {}", registration)),
        email: Set(format!("u{}@example.org", registration)),
        password_hash: Set(password_hash.to_string()),
        role: Set(role),
        unit_id: Set(unit_id),
        active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(pool)
    .await
    .expect("seed user")
}

async fn insert_item(pool: &db::DbPool, code: &str, type_id: Uuid, unit_id: Uuid) -> item::Model {
    let now = Utc::now();
    item::ActiveModel {
        id: Set(Uuid::new_v4()),
        code: Set(code.to_string()),
        description: Set(format!("{} description", code)),
        type_id: Set(type_id),
        unit_id: Set(unit_id),
        status: Set(ItemStatus::Available),
        status_note: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(pool)
    .await
    .expect("seed item")
}
