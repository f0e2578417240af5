//! Dashboard counters and manager audit reports. Every query here is bounded
//! by the caller's visible units.

use crate::{
    auth::{Action, Session},
    db::DbPool,
    entities::{item, movement, transfer, unit, user, ItemStatus},
    errors::ServiceError,
    services::{
        custody::pair_held,
        scope::{ItemFilter, MovementFilter, Page, PageRequest, TransferFilter},
        HierarchyService,
    },
};
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, Order, QueryFilter, QuerySelect,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

/// Item counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct StatusCounts {
    pub available: u64,
    pub in_use: u64,
    pub maintenance: u64,
    pub inactive: u64,
    pub total: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: ItemStatus, count: u64) {
        match status {
            ItemStatus::Available => self.available += count,
            ItemStatus::InUse => self.in_use += count,
            ItemStatus::Maintenance => self.maintenance += count,
            ItemStatus::Inactive => self.inactive += count,
        }
        self.total += count;
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Dashboard {
    pub items: StatusCounts,
    pub open_movements: u64,
    pub visible_units: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UnitStock {
    pub unit_id: Uuid,
    pub unit_name: String,
    #[serde(flatten)]
    pub counts: StatusCounts,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MovementReportRow {
    #[serde(flatten)]
    pub movement: movement::Model,
    pub item_code: Option<String>,
    pub holder_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TransferReportRow {
    #[serde(flatten)]
    pub transfer: transfer::Model,
    pub item_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HeldItemReport {
    pub item: item::Model,
    pub movement: movement::Model,
    pub holder_name: Option<String>,
    pub holder_registration: Option<String>,
}

async fn item_codes<C: ConnectionTrait>(
    conn: &C,
    ids: impl IntoIterator<Item = Uuid>,
) -> Result<HashMap<Uuid, String>, ServiceError> {
    let rows: Vec<(Uuid, String)> = item::Entity::find()
        .select_only()
        .column(item::Column::Id)
        .column(item::Column::Code)
        .filter(item::Column::Id.is_in(ids))
        .into_tuple()
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(rows.into_iter().collect())
}

async fn users_by_id<C: ConnectionTrait>(
    conn: &C,
    ids: impl IntoIterator<Item = Uuid>,
) -> Result<HashMap<Uuid, user::Model>, ServiceError> {
    Ok(user::Entity::find()
        .filter(user::Column::Id.is_in(ids))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?
        .into_iter()
        .map(|u| (u.id, u))
        .collect())
}

#[derive(Clone)]
pub struct ReportService {
    db: Arc<DbPool>,
    hierarchy: HierarchyService,
}

impl ReportService {
    pub fn new(db: Arc<DbPool>, hierarchy: HierarchyService) -> Self {
        Self { db, hierarchy }
    }

    /// Status counters for the caller's units. Available to every role.
    #[instrument(skip(self, session), fields(user_id = %session.user_id))]
    pub async fn dashboard(&self, session: &Session) -> Result<Dashboard, ServiceError> {
        session.require(Action::ViewInventory)?;
        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;

        let mut items = StatusCounts::default();
        for status in [
            ItemStatus::Available,
            ItemStatus::InUse,
            ItemStatus::Maintenance,
            ItemStatus::Inactive,
        ] {
            let count = visible
                .select::<item::Entity>()
                .apply(&[ItemFilter::Status(status)])
                .count(db)
                .await?;
            items.add(status, count);
        }
        let open_movements = visible
            .select::<movement::Entity>()
            .apply(&[MovementFilter::Open(true)])
            .count(db)
            .await?;

        Ok(Dashboard {
            items,
            open_movements,
            visible_units: visible.len(),
        })
    }

    /// Item counts per visible unit and status, ordered by unit name.
    #[instrument(skip(self, session), fields(user_id = %session.user_id))]
    pub async fn stock_by_unit(&self, session: &Session) -> Result<Vec<UnitStock>, ServiceError> {
        session.require(Action::ViewReports)?;
        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;

        let units = visible
            .select::<unit::Entity>()
            .order_by(unit::Column::Name, Order::Asc)
            .all(db)
            .await?;

        let rows: Vec<(Uuid, ItemStatus, i64)> = visible
            .select::<item::Entity>()
            .into_select()
            .select_only()
            .column(item::Column::UnitId)
            .column(item::Column::Status)
            .column_as(Expr::col(item::Column::Id).count(), "count")
            .group_by(item::Column::UnitId)
            .group_by(item::Column::Status)
            .into_tuple()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut counts: BTreeMap<Uuid, StatusCounts> = BTreeMap::new();
        for (unit_id, status, count) in rows {
            counts
                .entry(unit_id)
                .or_default()
                .add(status, count.max(0) as u64);
        }

        Ok(units
            .into_iter()
            .map(|u| UnitStock {
                counts: counts.remove(&u.id).unwrap_or_default(),
                unit_id: u.id,
                unit_name: u.name,
            })
            .collect())
    }

    /// Movement history with item code and holder name, newest first.
    #[instrument(skip(self, session, filters), fields(user_id = %session.user_id))]
    pub async fn movement_report(
        &self,
        session: &Session,
        filters: Vec<MovementFilter>,
        page: PageRequest,
    ) -> Result<Page<MovementReportRow>, ServiceError> {
        session.require(Action::ViewReports)?;
        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;

        let page = visible
            .select::<movement::Entity>()
            .apply(&filters)
            .order_by(movement::Column::CheckoutAt, Order::Desc)
            .page(db, page)
            .await?;

        let codes = item_codes(db, page.items.iter().map(|m| m.item_id)).await?;
        let holders = users_by_id(db, page.items.iter().map(|m| m.holder_id)).await?;

        Ok(page.map(|movement| MovementReportRow {
            item_code: codes.get(&movement.item_id).cloned(),
            holder_name: holders.get(&movement.holder_id).map(|u| u.name.clone()),
            movement,
        }))
    }

    /// Transfers touching the caller's units, newest first.
    #[instrument(skip(self, session, filters), fields(user_id = %session.user_id))]
    pub async fn transfer_report(
        &self,
        session: &Session,
        filters: Vec<TransferFilter>,
        page: PageRequest,
    ) -> Result<Page<TransferReportRow>, ServiceError> {
        session.require(Action::ViewReports)?;
        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;

        let page = visible
            .select::<transfer::Entity>()
            .apply(&filters)
            .order_by(transfer::Column::TransferredAt, Order::Desc)
            .page(db, page)
            .await?;

        let codes = item_codes(db, page.items.iter().map(|t| t.item_id)).await?;
        Ok(page.map(|transfer| TransferReportRow {
            item_code: codes.get(&transfer.item_id).cloned(),
            transfer,
        }))
    }

    /// Every item currently checked out in the caller's units, with its holder.
    #[instrument(skip(self, session), fields(user_id = %session.user_id))]
    pub async fn held_items(&self, session: &Session) -> Result<Vec<HeldItemReport>, ServiceError> {
        session.require(Action::ViewReports)?;
        let db = &*self.db;
        let visible = self.hierarchy.visible_units(db, session).await?;

        let movements = visible
            .select::<movement::Entity>()
            .apply(&[MovementFilter::Open(true)])
            .order_by(movement::Column::CheckoutAt, Order::Asc)
            .all(db)
            .await?;
        let items = visible
            .select::<item::Entity>()
            .apply(&[ItemFilter::Status(ItemStatus::InUse)])
            .all(db)
            .await?;
        let holders = users_by_id(db, movements.iter().map(|m| m.holder_id)).await?;

        Ok(pair_held(items, movements)
            .into_iter()
            .map(|held| {
                let holder = holders.get(&held.movement.holder_id);
                HeldItemReport {
                    holder_name: holder.map(|u| u.name.clone()),
                    holder_registration: holder.map(|u| u.registration.clone()),
                    item: held.item,
                    movement: held.movement,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_counts_accumulate() {
        let mut counts = StatusCounts::default();
        counts.add(ItemStatus::Available, 3);
        counts.add(ItemStatus::InUse, 2);
        counts.add(ItemStatus::Available, 1);
        assert_eq!(counts.available, 4);
        assert_eq!(counts.in_use, 2);
        assert_eq!(counts.total, 6);
    }

    #[test]
    fn unit_stock_flattens_counts() {
        let row = UnitStock {
            unit_id: Uuid::nil(),
            unit_name: "1st Company".into(),
            counts: StatusCounts {
                available: 1,
                total: 1,
                ..Default::default()
            },
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["available"], 1);
        assert_eq!(json["unit_name"], "1st Company");
    }
}
