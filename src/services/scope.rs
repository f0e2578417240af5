//! Query scoping: every unit-bound read goes through [`VisibleUnits`].
//!
//! A [`ScopedSelect`] can only be built from a `VisibleUnits`, and the
//! entities that live inside units only expose their list queries through it,
//! so a list without the unit predicate does not type-check.

use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::{Expr, Func, LikeExpr, Query},
    ColumnTrait, Condition, EntityTrait, Order, PaginatorTrait, QueryFilter, QueryOrder, Select,
    ConnectionTrait, FromQueryResult,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::{item, movement, transfer, unit, user, ItemStatus};
use crate::errors::ServiceError;

/// Unit ids a session may read and write within.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VisibleUnits(BTreeSet<Uuid>);

impl VisibleUnits {
    pub fn new(ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self(ids.into_iter().collect())
    }

    pub fn contains(&self, unit_id: Uuid) -> bool {
        self.0.contains(&unit_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Uuid> {
        self.0.iter()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.0.iter().copied().collect()
    }

    pub fn as_set(&self) -> &BTreeSet<Uuid> {
        &self.0
    }

    /// `OutOfScope` unless `unit_id` is visible. `what` is only logged.
    pub fn ensure(&self, unit_id: Uuid, what: &str) -> Result<(), ServiceError> {
        if self.contains(unit_id) {
            Ok(())
        } else {
            Err(ServiceError::OutOfScope(format!(
                "{} belongs to unit {} outside the caller's scope",
                what, unit_id
            )))
        }
    }

    /// Starts a query for `E` already bounded to these units.
    pub fn select<E: UnitScoped>(&self) -> ScopedSelect<E> {
        ScopedSelect {
            select: E::find().filter(E::scope_condition(self)),
        }
    }
}

/// Entities whose rows belong to a unit, directly or through their item.
pub trait UnitScoped: EntityTrait {
    fn scope_condition(units: &VisibleUnits) -> Condition;
}

impl UnitScoped for unit::Entity {
    fn scope_condition(units: &VisibleUnits) -> Condition {
        Condition::all().add(unit::Column::Id.is_in(units.ids()))
    }
}

impl UnitScoped for user::Entity {
    fn scope_condition(units: &VisibleUnits) -> Condition {
        Condition::all().add(user::Column::UnitId.is_in(units.ids()))
    }
}

impl UnitScoped for item::Entity {
    fn scope_condition(units: &VisibleUnits) -> Condition {
        Condition::all().add(item::Column::UnitId.is_in(units.ids()))
    }
}

impl UnitScoped for movement::Entity {
    fn scope_condition(units: &VisibleUnits) -> Condition {
        Condition::all().add(
            movement::Column::ItemId.in_subquery(
                Query::select()
                    .column(item::Column::Id)
                    .from(item::Entity)
                    .and_where(item::Column::UnitId.is_in(units.ids()))
                    .to_owned(),
            ),
        )
    }
}

impl UnitScoped for transfer::Entity {
    /// A transfer stays in the audit trail of both ends.
    fn scope_condition(units: &VisibleUnits) -> Condition {
        Condition::any()
            .add(transfer::Column::OriginUnitId.is_in(units.ids()))
            .add(transfer::Column::DestinationUnitId.is_in(units.ids()))
    }
}

/// A select statement carrying the unit-scope predicate.
pub struct ScopedSelect<E: EntityTrait> {
    select: Select<E>,
}

impl<E: EntityTrait> ScopedSelect<E> {
    /// Narrows the query by every filter in `filters`.
    pub fn apply<F: Filter<E>>(mut self, filters: &[F]) -> Self {
        for filter in filters {
            self.select = self.select.filter(filter.condition());
        }
        self
    }

    pub fn order_by(mut self, col: E::Column, order: Order) -> Self {
        self.select = self.select.order_by(col, order);
        self
    }

    pub fn into_select(self) -> Select<E> {
        self.select
    }

    pub async fn count<C: ConnectionTrait>(self, conn: &C) -> Result<u64, ServiceError>
    where
        E::Model: FromQueryResult + Sized + Send + Sync,
    {
        self.select.count(conn).await.map_err(ServiceError::db_error)
    }

    pub async fn all<C: ConnectionTrait>(self, conn: &C) -> Result<Vec<E::Model>, ServiceError> {
        self.select.all(conn).await.map_err(ServiceError::db_error)
    }

    /// One page of results plus the total row count.
    pub async fn page<C: ConnectionTrait>(
        self,
        conn: &C,
        request: PageRequest,
    ) -> Result<Page<E::Model>, ServiceError>
    where
        E::Model: FromQueryResult + Sized + Send + Sync,
    {
        let paginator = self.select.paginate(conn, request.per_page);
        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let items = paginator
            .fetch_page(request.page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;
        Ok(Page::new(items, total, request))
    }
}

/// A typed predicate over `E`'s columns.
pub trait Filter<E: EntityTrait> {
    fn condition(&self) -> Condition;
}

/// Item list filters.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemFilter {
    Status(ItemStatus),
    Type(Uuid),
    Unit(Uuid),
    /// Case-insensitive substring match on code or description.
    Search(String),
}

impl Filter<item::Entity> for ItemFilter {
    fn condition(&self) -> Condition {
        match self {
            ItemFilter::Status(status) => Condition::all().add(item::Column::Status.eq(*status)),
            ItemFilter::Type(type_id) => Condition::all().add(item::Column::TypeId.eq(*type_id)),
            ItemFilter::Unit(unit_id) => Condition::all().add(item::Column::UnitId.eq(*unit_id)),
            ItemFilter::Search(term) => {
                let pattern = like_pattern(term);
                Condition::any()
                    .add(Expr::expr(Func::lower(Expr::col(item::Column::Code))).like(pattern.clone()))
                    .add(Expr::expr(Func::lower(Expr::col(item::Column::Description))).like(pattern))
            }
        }
    }
}

/// Movement list filters.
#[derive(Debug, Clone, PartialEq)]
pub enum MovementFilter {
    Item(Uuid),
    Holder(Uuid),
    /// `true` for open movements only, `false` for closed only.
    Open(bool),
    CheckedOutFrom(DateTime<Utc>),
    CheckedOutUntil(DateTime<Utc>),
}

impl Filter<movement::Entity> for MovementFilter {
    fn condition(&self) -> Condition {
        let cond = Condition::all();
        match self {
            MovementFilter::Item(id) => cond.add(movement::Column::ItemId.eq(*id)),
            MovementFilter::Holder(id) => cond.add(movement::Column::HolderId.eq(*id)),
            MovementFilter::Open(true) => cond.add(movement::Column::ReturnedAt.is_null()),
            MovementFilter::Open(false) => cond.add(movement::Column::ReturnedAt.is_not_null()),
            MovementFilter::CheckedOutFrom(from) => cond.add(movement::Column::CheckoutAt.gte(*from)),
            MovementFilter::CheckedOutUntil(until) => {
                cond.add(movement::Column::CheckoutAt.lte(*until))
            }
        }
    }
}

/// Transfer list filters.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferFilter {
    Item(Uuid),
    /// Either end of the transfer.
    Unit(Uuid),
    From(DateTime<Utc>),
    Until(DateTime<Utc>),
}

impl Filter<transfer::Entity> for TransferFilter {
    fn condition(&self) -> Condition {
        match self {
            TransferFilter::Item(id) => Condition::all().add(transfer::Column::ItemId.eq(*id)),
            TransferFilter::Unit(id) => Condition::any()
                .add(transfer::Column::OriginUnitId.eq(*id))
                .add(transfer::Column::DestinationUnitId.eq(*id)),
            TransferFilter::From(from) => {
                Condition::all().add(transfer::Column::TransferredAt.gte(*from))
            }
            TransferFilter::Until(until) => {
                Condition::all().add(transfer::Column::TransferredAt.lte(*until))
            }
        }
    }
}

/// Name/code search for units and users.
#[derive(Debug, Clone, PartialEq)]
pub struct NameSearch(pub String);

impl Filter<unit::Entity> for NameSearch {
    fn condition(&self) -> Condition {
        let pattern = like_pattern(&self.0);
        Condition::any()
            .add(Expr::expr(Func::lower(Expr::col(unit::Column::Name))).like(pattern.clone()))
            .add(Expr::expr(Func::lower(Expr::col(unit::Column::Code))).like(pattern))
    }
}

impl Filter<user::Entity> for NameSearch {
    fn condition(&self) -> Condition {
        let pattern = like_pattern(&self.0);
        Condition::any()
            .add(Expr::expr(Func::lower(Expr::col(user::Column::Name))).like(pattern.clone()))
            .add(Expr::expr(Func::lower(Expr::col(user::Column::Email))).like(pattern.clone()))
            .add(Expr::expr(Func::lower(Expr::col(user::Column::Registration))).like(pattern))
    }
}

const LIKE_ESCAPE: char = '\\';

/// Case-insensitive substring pattern; `%` and `_` in the term match literally.
pub(crate) fn like_pattern(term: &str) -> LikeExpr {
    LikeExpr::new(contains_pattern(term)).escape(LIKE_ESCAPE)
}

fn contains_pattern(term: &str) -> String {
    let mut pattern = String::from("%");
    for c in term.trim().to_lowercase().chars() {
        if matches!(c, '%' | '_' | LIKE_ESCAPE) {
            pattern.push(LIKE_ESCAPE);
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Pagination request as accepted by list endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based page number
    pub page: u64,
    pub per_page: u64,
}

impl PageRequest {
    pub fn new(page: u64, per_page: u64) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.max(1),
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        Self {
            items,
            total,
            page: request.page,
            per_page: request.per_page,
            total_pages: total.div_ceil(request.per_page.max(1)),
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
            total_pages: self.total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use sea_orm::{DbBackend, QueryTrait};

    #[test]
    fn ensure_reports_out_of_scope() {
        let home = Uuid::new_v4();
        let visible = VisibleUnits::new([home]);
        assert!(visible.ensure(home, "item").is_ok());
        assert_matches!(
            visible.ensure(Uuid::new_v4(), "item"),
            Err(ServiceError::OutOfScope(_))
        );
    }

    #[test]
    fn scoped_item_query_always_carries_unit_predicate() {
        let visible = VisibleUnits::new([Uuid::nil()]);
        let sql = visible
            .select::<item::Entity>()
            .apply(&[ItemFilter::Status(ItemStatus::Available)])
            .into_select()
            .build(DbBackend::Sqlite)
            .to_string();
        assert!(sql.contains(r#""items"."unit_id" IN ("#), "{}", sql);
        assert!(sql.contains(r#""items"."status" = 'AVAILABLE'"#), "{}", sql);
    }

    #[test]
    fn movement_scope_goes_through_items() {
        let visible = VisibleUnits::new([Uuid::nil()]);
        let sql = visible
            .select::<movement::Entity>()
            .into_select()
            .build(DbBackend::Postgres)
            .to_string();
        assert!(sql.contains(r#""movements"."item_id" IN (SELECT "#), "{}", sql);
    }

    #[test]
    fn contains_pattern_escapes_wildcards() {
        assert_eq!(contains_pattern(" Ra%di_o "), r"%ra\%di\_o%");
        assert_eq!(contains_pattern(r"a\b"), r"%a\\b%");
        assert_eq!(contains_pattern("   "), "%%");
    }

    #[test]
    fn page_counts_round_up() {
        let page = Page::new(vec![1, 2], 41, PageRequest::new(1, 20));
        assert_eq!(page.total_pages, 3);
        assert_eq!(PageRequest::new(0, 0), PageRequest::new(1, 1));
    }
}
