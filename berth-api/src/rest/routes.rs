use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::handlers::{self, AppState};
use super::types;
use crate::action::ActionKind;
use crate::controller::Tracking;
use crate::model;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "berth API Server",
        version = "0.1.0",
        description = "REST API for berth. Creates containers, runs lifecycle actions on them and streams record changes.",
        license(name = "MIT")
    ),
    tags(
        (name = "system", description = "System information"),
        (name = "containers", description = "Container CRUD operations"),
        (name = "actions", description = "Container lifecycle actions")
    ),
    paths(
        handlers::get_version,
        handlers::create_container,
        handlers::list_containers,
        handlers::get_container,
        handlers::update_container,
        handlers::delete_container,
        handlers::post_action,
        handlers::get_action,
    ),
    components(schemas(
        types::VersionInfo,
        types::ContainerListResponse,
        types::ContainerEvent,
        handlers::ApiError,
        model::Container,
        model::ContainerState,
        model::CreateRequest,
        model::UpdateRequest,
        model::RestartPolicy,
        model::RestartPolicyRequest,
        model::RequestedNetwork,
        model::NetworkBinding,
        model::ImageDriver,
        model::ImagePullPolicy,
        Tracking,
        ActionKind,
    ))
)]
pub struct ApiDoc;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // System
        .route("/version", get(handlers::get_version))
        // Containers
        .route(
            "/containers",
            get(handlers::list_containers).post(handlers::create_container),
        )
        .route("/containers/events", get(handlers::container_events))
        .route(
            "/containers/{ident}",
            get(handlers::get_container)
                .patch(handlers::update_container)
                .delete(handlers::delete_container),
        )
        // Actions
        .route(
            "/containers/{ident}/{action}",
            post(handlers::post_action).get(handlers::get_action),
        );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
