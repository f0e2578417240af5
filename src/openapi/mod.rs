use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Custody API",
        version = "0.1.0",
        description = r#"
# Custody API

Tracks who holds which piece of equipment, across a hierarchy of organizational units.

## Features

- **Custody**: check items out to yourself or to another user, return them, route them to maintenance
- **Transfers**: move available items between units you can see
- **Hierarchy**: managers administer their home unit and every unit below it
- **Audit**: full movement and transfer history per item, plus manager reports

## Authentication

Exchange credentials at `POST /auth/login` and send the token on every `/api/v1` call:

```
Authorization: Bearer <your-jwt-token>
```

## Visibility

BASIC and CONTROLLER users see their home unit only. MANAGER users see their
home unit and all of its descendants. Records outside the visible units are
reported as not found.

## Pagination

List endpoints accept `page` (1-indexed) and `per_page`.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Login and current session"),
        (name = "units", description = "Organizational unit hierarchy"),
        (name = "users", description = "User administration"),
        (name = "item-types", description = "Item type catalog"),
        (name = "items", description = "Item registry"),
        (name = "custody", description = "Check-out, return, maintenance and transfers"),
        (name = "reports", description = "Dashboard and audit reports")
    ),
    paths(
        // Auth
        crate::handlers::auth::login,
        crate::handlers::auth::me,

        // Units
        crate::handlers::units::list_units,
        crate::handlers::units::unit_tree,
        crate::handlers::units::get_unit,
        crate::handlers::units::create_unit,
        crate::handlers::units::update_unit,
        crate::handlers::units::delete_unit,

        // Users
        crate::handlers::users::list_users,
        crate::handlers::users::get_user,
        crate::handlers::users::create_user,
        crate::handlers::users::update_user,
        crate::handlers::users::reset_password,
        crate::handlers::users::deactivate_user,
        crate::handlers::users::delete_user,

        // Item types
        crate::handlers::item_types::list_item_types,
        crate::handlers::item_types::get_item_type,
        crate::handlers::item_types::create_item_type,
        crate::handlers::item_types::update_item_type,
        crate::handlers::item_types::delete_item_type,

        // Items
        crate::handlers::items::list_items,
        crate::handlers::items::get_item,
        crate::handlers::items::create_item,
        crate::handlers::items::update_item,
        crate::handlers::items::delete_item,
        crate::handlers::items::deactivate_item,
        crate::handlers::items::item_history,

        // Custody
        crate::handlers::custody::checkout,
        crate::handlers::custody::return_item,
        crate::handlers::custody::complete_maintenance,
        crate::handlers::custody::transfer_item,
        crate::handlers::custody::list_movements,
        crate::handlers::custody::list_transfers,
        crate::handlers::custody::my_items,

        // Reports
        crate::handlers::reports::dashboard,
        crate::handlers::reports::stock_by_unit,
        crate::handlers::reports::movement_report,
        crate::handlers::reports::transfer_report,
        crate::handlers::reports::held_items,
    ),
    components(
        schemas(
            crate::ResponseMeta,
            crate::auth::Session,
            crate::auth::Action,
            crate::auth::TokenResponse,
            crate::entities::Role,
            crate::entities::ItemStatus,
            crate::entities::unit::Model,
            crate::entities::item_type::Model,
            crate::entities::item::Model,
            crate::entities::movement::Model,
            crate::entities::transfer::Model,
            crate::handlers::auth::LoginRequest,
            crate::handlers::auth::LoginResponse,
            crate::handlers::auth::MeResponse,
            crate::services::hierarchy::UnitNode,
            crate::services::units::CreateUnitRequest,
            crate::services::units::UpdateUnitRequest,
            crate::services::users::UserView,
            crate::services::users::CreateUserRequest,
            crate::services::users::UpdateUserRequest,
            crate::services::users::ResetPasswordRequest,
            crate::services::item_types::ItemTypeRequest,
            crate::services::items::CreateItemRequest,
            crate::services::items::UpdateItemRequest,
            crate::services::items::DeactivateItemRequest,
            crate::services::items::ItemHistory,
            crate::services::custody::CheckoutRequest,
            crate::services::custody::ReturnRequest,
            crate::services::custody::TransferRequest,
            crate::services::custody::MovementOutcome,
            crate::services::custody::TransferOutcome,
            crate::services::custody::HeldItem,
            crate::services::reports::StatusCounts,
            crate::services::reports::Dashboard,
            crate::services::reports::UnitStock,
            crate::services::reports::MovementReportRow,
            crate::services::reports::TransferReportRow,
            crate::services::reports::HeldItemReport,

            // Error types
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_custody_routes_and_bearer_scheme() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("Custody API"));
        assert!(json.contains("/api/v1/items/{id}/checkout"));
        assert!(json.contains("/api/v1/reports/held-items"));
        assert!(json.contains("bearer_auth"));
    }
}
