//! Hierarchy Resolver and Visibility Calculator.
//!
//! The unit table is an adjacency list. Walks load it once per call into a
//! [`UnitForest`] and run breadth-first with a visited set and a depth cap, so
//! malformed (cyclic or too deep) data produces a logged error instead of a
//! runaway or silently truncated traversal.

use sea_orm::{ConnectionTrait, EntityTrait, QuerySelect};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::{error, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::Session;
use crate::entities::{unit, Role};
use crate::errors::ServiceError;
use crate::services::scope::VisibleUnits;

/// In-memory snapshot of the parent relation.
#[derive(Debug, Clone, Default)]
pub struct UnitForest {
    parents: HashMap<Uuid, Option<Uuid>>,
    children: HashMap<Uuid, Vec<Uuid>>,
}

impl UnitForest {
    pub fn from_edges(edges: impl IntoIterator<Item = (Uuid, Option<Uuid>)>) -> Self {
        let mut forest = Self::default();
        for (id, parent) in edges {
            forest.parents.insert(id, parent);
            if let Some(parent) = parent {
                forest.children.entry(parent).or_default().push(id);
            }
        }
        for kids in forest.children.values_mut() {
            kids.sort();
        }
        forest
    }

    pub async fn load<C: ConnectionTrait>(conn: &C) -> Result<Self, ServiceError> {
        let edges: Vec<(Uuid, Option<Uuid>)> = unit::Entity::find()
            .select_only()
            .column(unit::Column::Id)
            .column(unit::Column::ParentId)
            .into_tuple()
            .all(conn)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(Self::from_edges(edges))
    }

    pub fn contains(&self, unit_id: Uuid) -> bool {
        self.parents.contains_key(&unit_id)
    }

    pub fn parent_of(&self, unit_id: Uuid) -> Option<Uuid> {
        self.parents.get(&unit_id).copied().flatten()
    }

    pub fn children_of(&self, unit_id: Uuid) -> &[Uuid] {
        self.children
            .get(&unit_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// `{root}` plus every unit below it. Unknown `root` yields an empty set.
    ///
    /// Fails with `HierarchyTooDeep` when a unit sits more than `max_depth`
    /// levels below `root`. A unit reached twice (a cycle) is skipped.
    pub fn descendants(&self, root: Uuid, max_depth: usize) -> Result<BTreeSet<Uuid>, ServiceError> {
        let mut visited = BTreeSet::new();
        if !self.contains(root) {
            return Ok(visited);
        }

        visited.insert(root);
        let mut queue = VecDeque::from([(root, 0usize)]);

        while let Some((current, depth)) = queue.pop_front() {
            for &child in self.children_of(current) {
                if !visited.insert(child) {
                    warn!(unit_id = %child, parent_id = %current, "cycle in unit hierarchy; unit skipped");
                    continue;
                }
                let child_depth = depth + 1;
                if child_depth > max_depth {
                    error!(
                        root = %root,
                        unit_id = %child,
                        max_depth,
                        "unit hierarchy exceeds depth cap"
                    );
                    return Err(ServiceError::HierarchyTooDeep {
                        unit_id: root,
                        max_depth,
                    });
                }
                queue.push_back((child, child_depth));
            }
        }

        Ok(visited)
    }

    /// Number of ancestors of `unit_id`, or `HierarchyCycle` if the parent
    /// chain loops.
    pub fn depth_of(&self, unit_id: Uuid) -> Result<usize, ServiceError> {
        let mut seen = HashSet::from([unit_id]);
        let mut depth = 0;
        let mut current = unit_id;
        while let Some(parent) = self.parent_of(current) {
            if !seen.insert(parent) {
                return Err(ServiceError::HierarchyCycle(format!(
                    "parent chain of unit {} loops at {}",
                    unit_id, parent
                )));
            }
            depth += 1;
            current = parent;
        }
        Ok(depth)
    }

    /// Levels below `unit_id` in its deepest branch (0 for a leaf).
    pub fn height_of(&self, unit_id: Uuid) -> usize {
        let mut visited = HashSet::from([unit_id]);
        let mut queue = VecDeque::from([(unit_id, 0usize)]);
        let mut height = 0;
        while let Some((current, depth)) = queue.pop_front() {
            height = height.max(depth);
            for &child in self.children_of(current) {
                if visited.insert(child) {
                    queue.push_back((child, depth + 1));
                }
            }
        }
        height
    }

    /// Validates placing `unit_id` (or a new unit when `None`) under `new_parent`.
    ///
    /// Rejects cycles and any placement that would push some unit deeper
    /// than `max_depth` levels below its root.
    pub fn check_placement(
        &self,
        unit_id: Option<Uuid>,
        new_parent: Option<Uuid>,
        max_depth: usize,
    ) -> Result<(), ServiceError> {
        let Some(parent) = new_parent else {
            return match unit_id {
                Some(id) if self.height_of(id) > max_depth => Err(ServiceError::HierarchyTooDeep {
                    unit_id: id,
                    max_depth,
                }),
                _ => Ok(()),
            };
        };

        if !self.contains(parent) {
            return Err(ServiceError::NotFound(format!("Unit {}", parent)));
        }

        if let Some(id) = unit_id {
            if id == parent {
                return Err(ServiceError::HierarchyCycle(format!(
                    "unit {} cannot be its own parent",
                    id
                )));
            }
            let mut cursor = Some(parent);
            let mut seen = HashSet::new();
            while let Some(ancestor) = cursor {
                if ancestor == id {
                    return Err(ServiceError::HierarchyCycle(format!(
                        "unit {} cannot move below its descendant {}",
                        id, parent
                    )));
                }
                if !seen.insert(ancestor) {
                    break;
                }
                cursor = self.parent_of(ancestor);
            }
        }

        let subtree_height = unit_id.map(|id| self.height_of(id)).unwrap_or(0);
        let resulting_depth = self.depth_of(parent)? + 1 + subtree_height;
        if resulting_depth > max_depth {
            return Err(ServiceError::HierarchyTooDeep {
                unit_id: unit_id.unwrap_or(parent),
                max_depth,
            });
        }
        Ok(())
    }
}

/// Nested view of a unit and its visible descendants.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UnitNode {
    #[serde(flatten)]
    pub unit: unit::Model,
    #[schema(no_recursion)]
    pub children: Vec<UnitNode>,
}

/// Builds the nested tree below `root` from already loaded units.
pub fn build_tree(root: unit::Model, units: &[unit::Model], forest: &UnitForest) -> UnitNode {
    fn build(
        unit: unit::Model,
        by_id: &HashMap<Uuid, &unit::Model>,
        forest: &UnitForest,
        seen: &mut HashSet<Uuid>,
    ) -> UnitNode {
        seen.insert(unit.id);
        let mut children = Vec::new();
        for child_id in forest.children_of(unit.id) {
            if seen.contains(child_id) {
                continue;
            }
            if let Some(child) = by_id.get(child_id) {
                children.push(build((*child).clone(), by_id, forest, seen));
            }
        }
        children.sort_by(|a, b| a.unit.name.cmp(&b.unit.name));
        UnitNode { unit, children }
    }

    let by_id: HashMap<Uuid, &unit::Model> = units.iter().map(|u| (u.id, u)).collect();
    build(root, &by_id, forest, &mut HashSet::new())
}

/// Computes the set of units a session may see.
#[derive(Debug, Clone, Copy)]
pub struct HierarchyService {
    max_depth: usize,
}

impl HierarchyService {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// `{unit_id}` and all of its descendants.
    #[instrument(skip(self, conn))]
    pub async fn descendants<C: ConnectionTrait>(
        &self,
        conn: &C,
        unit_id: Uuid,
    ) -> Result<BTreeSet<Uuid>, ServiceError> {
        UnitForest::load(conn)
            .await?
            .descendants(unit_id, self.max_depth)
    }

    /// MANAGER sees its home unit's subtree; every other role sees exactly
    /// its home unit.
    #[instrument(skip(self, conn, session), fields(user_id = %session.user_id, role = %session.role))]
    pub async fn visible_units<C: ConnectionTrait>(
        &self,
        conn: &C,
        session: &Session,
    ) -> Result<VisibleUnits, ServiceError> {
        match session.role {
            Role::Manager => Ok(VisibleUnits::new(
                self.descendants(conn, session.unit_id).await?,
            )),
            Role::Basic | Role::Controller => Ok(VisibleUnits::new([session.unit_id])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    /// 0 -> 1 -> 2 -> 3 chain plus 0 -> 4.
    fn sample() -> (Vec<Uuid>, UnitForest) {
        let u = ids(5);
        let forest = UnitForest::from_edges([
            (u[0], None),
            (u[1], Some(u[0])),
            (u[2], Some(u[1])),
            (u[3], Some(u[2])),
            (u[4], Some(u[0])),
        ]);
        (u, forest)
    }

    #[test]
    fn descendants_include_self_and_subtree() {
        let (u, forest) = sample();
        let all = forest.descendants(u[0], 10).unwrap();
        assert_eq!(all.len(), 5);
        let sub = forest.descendants(u[1], 10).unwrap();
        assert_eq!(sub, BTreeSet::from([u[1], u[2], u[3]]));
        assert_eq!(forest.descendants(u[3], 10).unwrap(), BTreeSet::from([u[3]]));
    }

    #[test]
    fn unknown_root_is_empty_not_error() {
        let (_, forest) = sample();
        assert!(forest.descendants(Uuid::new_v4(), 10).unwrap().is_empty());
    }

    #[test]
    fn exceeding_depth_cap_is_an_error() {
        let (u, forest) = sample();
        assert!(forest.descendants(u[0], 3).is_ok());
        assert_matches!(
            forest.descendants(u[0], 2),
            Err(ServiceError::HierarchyTooDeep { max_depth: 2, .. })
        );
    }

    #[test]
    fn cycles_terminate() {
        let u = ids(3);
        let forest =
            UnitForest::from_edges([(u[0], Some(u[2])), (u[1], Some(u[0])), (u[2], Some(u[1]))]);
        let seen = forest.descendants(u[0], 10).unwrap();
        assert_eq!(seen.len(), 3);
        assert_matches!(forest.depth_of(u[0]), Err(ServiceError::HierarchyCycle(_)));
    }

    #[test]
    fn placement_rejects_cycles() {
        let (u, forest) = sample();
        assert_matches!(
            forest.check_placement(Some(u[1]), Some(u[1]), 10),
            Err(ServiceError::HierarchyCycle(_))
        );
        assert_matches!(
            forest.check_placement(Some(u[1]), Some(u[3]), 10),
            Err(ServiceError::HierarchyCycle(_))
        );
        assert!(forest.check_placement(Some(u[4]), Some(u[3]), 10).is_ok());
    }

    #[test]
    fn placement_enforces_depth() {
        let (u, forest) = sample();
        // u[3] is at depth 3; a child there would sit at depth 4.
        assert!(forest.check_placement(None, Some(u[3]), 4).is_ok());
        assert_matches!(
            forest.check_placement(None, Some(u[3]), 3),
            Err(ServiceError::HierarchyTooDeep { .. })
        );
        // Moving the 2-level subtree at u[1] below u[4] (depth 1) reaches depth 4.
        assert_matches!(
            forest.check_placement(Some(u[1]), Some(u[4]), 3),
            Err(ServiceError::HierarchyTooDeep { .. })
        );
    }

    #[test]
    fn tree_nests_children() {
        let (u, forest) = sample();
        let now = chrono::Utc::now();
        let units: Vec<unit::Model> = u
            .iter()
            .enumerate()
            .map(|(i, id)| unit::Model {
                id: *id,
                name: format!("U{}", i),
                code: None,
                address: None,
                parent_id: forest.parent_of(*id),
                created_at: now,
                updated_at: now,
            })
            .collect();
        let tree = build_tree(units[0].clone(), &units, &forest);
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[0].unit.name, "U1");
        assert_eq!(tree.children[0].children[0].children[0].unit.id, u[3]);
    }

    #[tokio::test]
    async fn restricted_roles_see_only_home() {
        let service = HierarchyService::new(10);
        let home = Uuid::new_v4();
        let conn = sea_orm::DatabaseConnection::Disconnected;
        for role in [Role::Basic, Role::Controller] {
            let session = Session::new(Uuid::new_v4(), role, home, "x");
            let visible = service.visible_units(&conn, &session).await.unwrap();
            assert_eq!(visible, VisibleUnits::new([home]));
        }
    }
}
