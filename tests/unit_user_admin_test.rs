//! Unit hierarchy and user administration.

mod common;

use assert_matches::assert_matches;
use common::TestApp;
use custody_api::{
    entities::Role,
    errors::ServiceError,
    services::{
        custody::CheckoutRequest,
        item_types::ItemTypeRequest,
        units::{CreateUnitRequest, UpdateUnitRequest},
        users::{CreateUserRequest, UpdateUserRequest},
        PageRequest,
    },
};

fn unit_named(name: &str, parent_id: Option<uuid::Uuid>) -> CreateUnitRequest {
    CreateUnitRequest {
        name: name.to_string(),
        code: None,
        address: None,
        parent_id,
    }
}

#[tokio::test]
async fn manager_creates_units_under_visible_parents_only() {
    let app = TestApp::new().await;
    let units = &app.state.services.units;
    let north_manager = app.session(&app.fx.north_manager);

    let child = units
        .create_unit(&north_manager, unit_named("North-B", Some(app.fx.north.id)))
        .await
        .unwrap();
    assert_eq!(child.parent_id, Some(app.fx.north.id));

    let foreign = units
        .create_unit(&north_manager, unit_named("South-B", Some(app.fx.south.id)))
        .await;
    assert_matches!(foreign, Err(ServiceError::OutOfScope(_)));

    // North is not a root, so its manager cannot create roots.
    let root = units.create_unit(&north_manager, unit_named("Elsewhere", None)).await;
    assert_matches!(root, Err(ServiceError::Forbidden(_)));

    let admin = app.session(&app.fx.admin);
    let new_root = units
        .create_unit(&admin, unit_named("Branch Office", None))
        .await
        .unwrap();
    assert!(new_root.parent_id.is_none());
}

#[tokio::test]
async fn reparenting_under_own_descendant_is_a_cycle() {
    let app = TestApp::new().await;
    let units = &app.state.services.units;
    let admin = app.session(&app.fx.admin);

    let result = units
        .update_unit(
            &admin,
            app.fx.north.id,
            UpdateUnitRequest {
                parent_id: Some(Some(app.fx.north_a.id)),
                ..Default::default()
            },
        )
        .await;
    assert_matches!(result, Err(ServiceError::HierarchyCycle(_)));

    let onto_self = units
        .update_unit(
            &admin,
            app.fx.north.id,
            UpdateUnitRequest {
                parent_id: Some(Some(app.fx.north.id)),
                ..Default::default()
            },
        )
        .await;
    assert_matches!(onto_self, Err(ServiceError::HierarchyCycle(_)));

    let moved = units
        .update_unit(
            &admin,
            app.fx.north_a.id,
            UpdateUnitRequest {
                parent_id: Some(Some(app.fx.south.id)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(moved.parent_id, Some(app.fx.south.id));

    // North's manager lost North-A with the move.
    let north_manager = app.session(&app.fx.north_manager);
    let lost = units.get_unit(&north_manager, app.fx.north_a.id).await;
    assert_matches!(lost, Err(ServiceError::OutOfScope(_)));
}

#[tokio::test]
async fn unit_deletion_requires_an_empty_unit() {
    let app = TestApp::new().await;
    let units = &app.state.services.units;
    let admin = app.session(&app.fx.admin);

    let with_children = units.delete_unit(&admin, app.fx.north.id).await;
    assert_matches!(with_children, Err(ServiceError::HasDependents(_)));

    let own_home = units.delete_unit(&admin, app.fx.hq.id).await;
    assert_matches!(own_home, Err(ServiceError::InvalidOperation(_)));

    let empty = app.add_unit("Depot", Some(app.fx.south.id)).await;
    units.delete_unit(&admin, empty.id).await.unwrap();
    assert_matches!(
        units.get_unit(&admin, empty.id).await,
        Err(ServiceError::OutOfScope(_))
    );
}

#[tokio::test]
async fn unit_tree_nests_visible_descendants() {
    let app = TestApp::new().await;
    let tree = app
        .state
        .services
        .units
        .unit_tree(&app.session(&app.fx.admin))
        .await
        .unwrap();
    assert_eq!(tree.unit.id, app.fx.hq.id);
    assert_eq!(tree.children.len(), 2);
    let north = tree
        .children
        .iter()
        .find(|n| n.unit.id == app.fx.north.id)
        .unwrap();
    assert_eq!(north.children.len(), 1);
    assert_eq!(north.children[0].unit.id, app.fx.north_a.id);

    let basic_tree = app
        .state
        .services
        .units
        .unit_tree(&app.session(&app.fx.basic))
        .await
        .unwrap();
    assert_eq!(basic_tree.unit.id, app.fx.north_a.id);
    assert!(basic_tree.children.is_empty());
}

#[tokio::test]
async fn user_lifecycle_and_uniqueness() {
    let app = TestApp::new().await;
    let users = &app.state.services.users;
    let manager = app.session(&app.fx.north_manager);

    let created = users
        .create_user(
            &manager,
            CreateUserRequest {
                registration: "3001".into(),
                name: "Dana".into(),
                email: "  Dana@Example.org ".into(),
                password: "long-enough-secret-7".into(),
                role: Role::Basic,
                unit_id: app.fx.north_a.id,
            },
        )
        .await
        .unwrap();
    assert_eq!(created.email, "dana@example.org");
    assert!(created.active);

    let duplicate = users
        .create_user(
            &manager,
            CreateUserRequest {
                registration: "3002".into(),
                name: "Dana Again".into(),
                email: "dana@example.org".into(),
                password: "long-enough-secret-7".into(),
                role: Role::Basic,
                unit_id: app.fx.north_a.id,
            },
        )
        .await;
    assert_matches!(duplicate, Err(ServiceError::DuplicateCode(_)));

    let promoted = users
        .update_user(
            &manager,
            created.id,
            UpdateUserRequest {
                role: Some(Role::Controller),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(promoted.role, Role::Controller);

    let moved_out = users
        .update_user(
            &manager,
            created.id,
            UpdateUserRequest {
                unit_id: Some(app.fx.south.id),
                ..Default::default()
            },
        )
        .await;
    assert_matches!(moved_out, Err(ServiceError::OutOfScope(_)));

    users.delete_user(&manager, created.id).await.unwrap();
    assert_matches!(
        users.get_user(&manager, created.id).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn users_with_custody_history_are_deactivated_not_deleted() {
    let app = TestApp::new().await;
    let users = &app.state.services.users;
    let admin = app.session(&app.fx.admin);

    app.state
        .services
        .custody
        .checkout(&app.session(&app.fx.basic), app.fx.radio.id, CheckoutRequest::default())
        .await
        .unwrap();

    let delete = users.delete_user(&admin, app.fx.basic.id).await;
    assert_matches!(
        delete,
        Err(ServiceError::HasHistory {
            can_deactivate: true,
            ..
        })
    );

    let own = users.delete_user(&admin, app.fx.admin.id).await;
    assert_matches!(own, Err(ServiceError::InvalidOperation(_)));
    let own_deactivate = users.deactivate_user(&admin, app.fx.admin.id).await;
    assert_matches!(own_deactivate, Err(ServiceError::InvalidOperation(_)));

    let deactivated = users.deactivate_user(&admin, app.fx.basic.id).await.unwrap();
    assert!(!deactivated.active);
    let again = users.deactivate_user(&admin, app.fx.basic.id).await;
    assert_matches!(again, Err(ServiceError::InvalidOperation(_)));

    let login = app
        .state
        .auth
        .login(&app.fx.basic.email, common::PASSWORD)
        .await;
    assert!(login.is_err());
}

#[tokio::test]
async fn user_listing_is_scoped_and_searchable() {
    let app = TestApp::new().await;
    let users = &app.state.services.users;

    let north = users
        .list_users(&app.session(&app.fx.north_manager), None, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(north.total, 3);

    let controller = users
        .list_users(&app.session(&app.fx.controller), None, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(controller.total, 2);

    let search = users
        .list_users(
            &app.session(&app.fx.admin),
            Some("2001".into()),
            PageRequest::default(),
        )
        .await
        .unwrap();
    assert_eq!(search.total, 1);
    assert_eq!(search.items[0].id, app.fx.south_controller.id);
}

#[tokio::test]
async fn item_types_are_unique_by_normalized_name() {
    let app = TestApp::new().await;
    let types = &app.state.services.item_types;
    let admin = app.session(&app.fx.admin);

    let dup = types
        .create_item_type(&admin, ItemTypeRequest { name: "  RADIO ".into() })
        .await;
    assert_matches!(dup, Err(ServiceError::DuplicateCode(_)));

    let in_use = types.delete_item_type(&admin, app.fx.radio_type.id).await;
    assert_matches!(in_use, Err(ServiceError::HasDependents(_)));

    let drone = types
        .create_item_type(&admin, ItemTypeRequest { name: "Drone".into() })
        .await
        .unwrap();
    types.delete_item_type(&admin, drone.id).await.unwrap();

    let basic = types
        .create_item_type(&app.session(&app.fx.basic), ItemTypeRequest { name: "Tent".into() })
        .await;
    assert_matches!(basic, Err(ServiceError::Forbidden(_)));
}

#[tokio::test]
async fn users_cannot_change_their_own_role_or_unit() {
    let app = TestApp::new().await;
    let users = &app.state.services.users;
    let manager = app.session(&app.fx.north_manager);
    let me = app.fx.north_manager.id;

    let demote = users
        .update_user(
            &manager,
            me,
            UpdateUserRequest {
                role: Some(Role::Basic),
                ..Default::default()
            },
        )
        .await;
    assert_matches!(demote, Err(ServiceError::InvalidOperation(_)));

    let relocate = users
        .update_user(
            &manager,
            me,
            UpdateUserRequest {
                unit_id: Some(app.fx.north_a.id),
                ..Default::default()
            },
        )
        .await;
    assert_matches!(relocate, Err(ServiceError::InvalidOperation(_)));

    let stored = users.get_user(&manager, me).await.unwrap();
    assert_eq!(stored.role, app.fx.north_manager.role);
    assert_eq!(stored.unit_id, app.fx.north.id);

    let renamed = users
        .update_user(
            &manager,
            me,
            UpdateUserRequest {
                name: Some("North Lead".into()),
                role: Some(stored.role),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.name, "North Lead");
    assert_eq!(renamed.role, stored.role);
}
