use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        custody::CustodyService, item_types::ItemTypeService, items::ItemService,
        reports::ReportService, units::UnitService, users::UserService, HierarchyService,
    },
};
use std::sync::Arc;

pub mod auth;
pub mod common;
pub mod custody;
pub mod item_types;
pub mod items;
pub mod reports;
pub mod units;
pub mod users;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub hierarchy: HierarchyService,
    pub units: Arc<UnitService>,
    pub users: Arc<UserService>,
    pub item_types: Arc<ItemTypeService>,
    pub items: Arc<ItemService>,
    pub custody: Arc<CustodyService>,
    pub reports: Arc<ReportService>,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>, config: &AppConfig) -> Self {
        let hierarchy = HierarchyService::new(config.hierarchy_max_depth);

        Self {
            hierarchy,
            units: Arc::new(UnitService::new(
                db_pool.clone(),
                hierarchy,
                event_sender.clone(),
            )),
            users: Arc::new(UserService::new(
                db_pool.clone(),
                hierarchy,
                event_sender.clone(),
            )),
            item_types: Arc::new(ItemTypeService::new(db_pool.clone())),
            items: Arc::new(ItemService::new(
                db_pool.clone(),
                hierarchy,
                event_sender.clone(),
            )),
            custody: Arc::new(CustodyService::new(
                db_pool.clone(),
                hierarchy,
                event_sender,
            )),
            reports: Arc::new(ReportService::new(db_pool, hierarchy)),
        }
    }
}
