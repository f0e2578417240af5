//! Check-out, return and maintenance flows against a seeded hierarchy.

mod common;

use assert_matches::assert_matches;
use common::TestApp;
use custody_api::{
    entities::{item, movement, ItemStatus},
    errors::ServiceError,
    services::{
        custody::{CheckoutRequest, ReturnRequest, MAINTENANCE_NOTE},
        scope::MovementFilter,
        PageRequest,
    },
};
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};

async fn open_movements(app: &TestApp, item_id: uuid::Uuid) -> u64 {
    movement::Entity::find()
        .filter(movement::Column::ItemId.eq(item_id))
        .filter(movement::Column::ReturnedAt.is_null())
        .count(app.db())
        .await
        .unwrap()
}

async fn stored_status(app: &TestApp, item_id: uuid::Uuid) -> ItemStatus {
    item::Entity::find_by_id(item_id)
        .one(app.db())
        .await
        .unwrap()
        .unwrap()
        .status
}

#[tokio::test]
async fn checkout_then_return_closes_the_movement() {
    let app = TestApp::new().await;
    let custody = &app.state.services.custody;
    let basic = app.session(&app.fx.basic);
    let controller = app.session(&app.fx.controller);
    let radio = app.fx.radio.id;

    let out = custody
        .checkout(
            &basic,
            radio,
            CheckoutRequest {
                holder_id: None,
                note: Some("  field trip ".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(out.item.status, ItemStatus::InUse);
    assert_eq!(out.movement.holder_id, app.fx.basic.id);
    assert_eq!(out.movement.checkout_by, app.fx.basic.id);
    assert_eq!(out.movement.checkout_note.as_deref(), Some("field trip"));
    assert!(out.movement.is_open());
    assert_eq!(stored_status(&app, radio).await, ItemStatus::InUse);

    let held = custody.my_items(&basic).await.unwrap();
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].item.id, radio);

    let back = custody
        .return_item(&controller, radio, ReturnRequest::default())
        .await
        .unwrap();
    assert_eq!(back.item.status, ItemStatus::Available);
    assert_eq!(back.movement.id, out.movement.id);
    assert_eq!(back.movement.returned_by, Some(app.fx.controller.id));
    assert!(back.movement.returned_at.is_some());
    assert_eq!(open_movements(&app, radio).await, 0);
    assert!(custody.my_items(&basic).await.unwrap().is_empty());
}

#[tokio::test]
async fn basic_user_cannot_check_out_for_others_or_return() {
    let app = TestApp::new().await;
    let custody = &app.state.services.custody;
    let basic = app.session(&app.fx.basic);
    let radio = app.fx.radio.id;

    let for_other = custody
        .checkout(
            &basic,
            radio,
            CheckoutRequest {
                holder_id: Some(app.fx.controller.id),
                note: None,
            },
        )
        .await;
    assert_matches!(for_other, Err(ServiceError::Forbidden(_)));

    custody
        .checkout(&basic, radio, CheckoutRequest::default())
        .await
        .unwrap();
    let returned = custody
        .return_item(&basic, radio, ReturnRequest::default())
        .await;
    assert_matches!(returned, Err(ServiceError::Forbidden(_)));
    assert_eq!(stored_status(&app, radio).await, ItemStatus::InUse);
}

#[tokio::test]
async fn controller_checks_out_to_colleague_in_same_unit_only() {
    let app = TestApp::new().await;
    let custody = &app.state.services.custody;
    let controller = app.session(&app.fx.controller);

    let out = custody
        .checkout(
            &controller,
            app.fx.radio.id,
            CheckoutRequest {
                holder_id: Some(app.fx.basic.id),
                note: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(out.movement.holder_id, app.fx.basic.id);
    assert_eq!(out.movement.checkout_by, app.fx.controller.id);

    let spare = app.add_item("RAD-002", app.fx.north_a.id).await;
    let outside = custody
        .checkout(
            &controller,
            spare.id,
            CheckoutRequest {
                holder_id: Some(app.fx.south_controller.id),
                note: None,
            },
        )
        .await;
    assert_matches!(outside, Err(ServiceError::OutOfScope(_)));
    assert_eq!(stored_status(&app, spare.id).await, ItemStatus::Available);
}

#[tokio::test]
async fn items_outside_visible_units_are_not_found() {
    let app = TestApp::new().await;
    let custody = &app.state.services.custody;
    let south = app.session(&app.fx.south_controller);

    let result = custody
        .checkout(&south, app.fx.radio.id, CheckoutRequest::default())
        .await;
    assert_matches!(result, Err(ServiceError::OutOfScope(_)));

    let missing = custody
        .checkout(&south, uuid::Uuid::new_v4(), CheckoutRequest::default())
        .await;
    assert_matches!(missing, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn second_checkout_reports_current_status() {
    let app = TestApp::new().await;
    let custody = &app.state.services.custody;
    let basic = app.session(&app.fx.basic);
    let controller = app.session(&app.fx.controller);

    custody
        .checkout(&basic, app.fx.radio.id, CheckoutRequest::default())
        .await
        .unwrap();
    let again = custody
        .checkout(&controller, app.fx.radio.id, CheckoutRequest::default())
        .await;
    assert_matches!(
        again,
        Err(ServiceError::NotAvailable {
            status: ItemStatus::InUse
        })
    );
}

#[tokio::test]
async fn return_of_available_item_is_rejected() {
    let app = TestApp::new().await;
    let controller = app.session(&app.fx.controller);
    let result = app
        .state
        .services
        .custody
        .return_item(&controller, app.fx.radio.id, ReturnRequest::default())
        .await;
    assert_matches!(
        result,
        Err(ServiceError::NotInUse {
            status: ItemStatus::Available
        })
    );
}

#[tokio::test]
async fn return_to_maintenance_then_complete() {
    let app = TestApp::new().await;
    let custody = &app.state.services.custody;
    let controller = app.session(&app.fx.controller);
    let manager = app.session(&app.fx.north_manager);
    let radio = app.fx.radio.id;

    custody
        .checkout(&controller, radio, CheckoutRequest::default())
        .await
        .unwrap();
    let back = custody
        .return_item(
            &controller,
            radio,
            ReturnRequest {
                note: None,
                maintenance: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(back.item.status, ItemStatus::Maintenance);
    assert_eq!(back.item.status_note.as_deref(), Some(MAINTENANCE_NOTE));

    let checkout_blocked = custody
        .checkout(&controller, radio, CheckoutRequest::default())
        .await;
    assert_matches!(
        checkout_blocked,
        Err(ServiceError::NotAvailable {
            status: ItemStatus::Maintenance
        })
    );

    let forbidden = custody.complete_maintenance(&controller, radio).await;
    assert_matches!(forbidden, Err(ServiceError::Forbidden(_)));

    let done = custody.complete_maintenance(&manager, radio).await.unwrap();
    assert_eq!(done.status, ItemStatus::Available);
    assert!(done.status_note.is_none());

    let twice = custody.complete_maintenance(&manager, radio).await;
    assert_matches!(
        twice,
        Err(ServiceError::NotInMaintenance {
            status: ItemStatus::Available
        })
    );
}

#[tokio::test]
async fn maintenance_return_keeps_custom_note() {
    let app = TestApp::new().await;
    let custody = &app.state.services.custody;
    let controller = app.session(&app.fx.controller);

    custody
        .checkout(&controller, app.fx.radio.id, CheckoutRequest::default())
        .await
        .unwrap();
    let back = custody
        .return_item(
            &controller,
            app.fx.radio.id,
            ReturnRequest {
                note: Some("antenna broken".into()),
                maintenance: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(back.item.status_note.as_deref(), Some("antenna broken"));
    assert_eq!(back.movement.return_note.as_deref(), Some("antenna broken"));
}

#[tokio::test]
async fn inactive_holder_cannot_receive_items() {
    let app = TestApp::new().await;
    let manager = app.session(&app.fx.admin);
    app.state
        .services
        .users
        .deactivate_user(&manager, app.fx.basic.id)
        .await
        .unwrap();

    let controller = app.session(&app.fx.controller);
    let result = app
        .state
        .services
        .custody
        .checkout(
            &controller,
            app.fx.radio.id,
            CheckoutRequest {
                holder_id: Some(app.fx.basic.id),
                note: None,
            },
        )
        .await;
    assert_matches!(result, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn manager_sees_movements_of_whole_subtree() {
    let app = TestApp::new().await;
    let custody = &app.state.services.custody;
    let controller = app.session(&app.fx.controller);
    let south = app.session(&app.fx.south_controller);

    custody
        .checkout(&controller, app.fx.radio.id, CheckoutRequest::default())
        .await
        .unwrap();
    custody
        .checkout(&south, app.fx.drill.id, CheckoutRequest::default())
        .await
        .unwrap();

    let north_manager = app.session(&app.fx.north_manager);
    let north = custody
        .list_movements(&north_manager, Vec::new(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(north.total, 1);
    assert_eq!(north.items[0].item_id, app.fx.radio.id);

    let admin = app.session(&app.fx.admin);
    let all_open = custody
        .list_movements(&admin, vec![MovementFilter::Open(true)], PageRequest::default())
        .await
        .unwrap();
    assert_eq!(all_open.total, 2);

    let closed = custody
        .list_movements(&admin, vec![MovementFilter::Open(false)], PageRequest::default())
        .await
        .unwrap();
    assert_eq!(closed.total, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_checkouts_have_exactly_one_winner() {
    let app = TestApp::new().await;
    let radio = app.fx.radio.id;
    let holders = [
        app.fx.controller.clone(),
        app.fx.basic.clone(),
        app.fx.north_manager.clone(),
        app.fx.admin.clone(),
    ];

    let mut tasks = Vec::new();
    for _ in 0..3 {
        for holder in &holders {
            let custody = app.state.services.custody.clone();
            let session = app.session(holder);
            tasks.push(tokio::spawn(async move {
                custody
                    .checkout(&session, radio, CheckoutRequest::default())
                    .await
            }));
        }
    }

    let mut winners = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => assert_matches!(
                e,
                ServiceError::NotAvailable {
                    status: ItemStatus::InUse
                }
            ),
        }
    }

    assert_eq!(winners, 1, "exactly one checkout should succeed");
    assert_eq!(open_movements(&app, radio).await, 1);
    assert_eq!(stored_status(&app, radio).await, ItemStatus::InUse);
}

#[tokio::test]
async fn return_without_open_movement_reports_integrity_fault() {
    let app = TestApp::new().await;
    let radio = app.fx.radio.id;

    // IN_USE with no movement row behind it.
    item::Entity::update_many()
        .col_expr(item::Column::Status, Expr::value(ItemStatus::InUse))
        .filter(item::Column::Id.eq(radio))
        .exec(app.db())
        .await
        .unwrap();

    let result = app
        .state
        .services
        .custody
        .return_item(
            &app.session(&app.fx.controller),
            radio,
            ReturnRequest::default(),
        )
        .await;
    assert_matches!(result, Err(ServiceError::NoOpenMovement(id)) if id == radio);

    assert_eq!(stored_status(&app, radio).await, ItemStatus::InUse);
    let movements = movement::Entity::find()
        .filter(movement::Column::ItemId.eq(radio))
        .count(app.db())
        .await
        .unwrap();
    assert_eq!(movements, 0);
}
