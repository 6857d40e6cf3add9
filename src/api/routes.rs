use axum::{
    routing::{get, post, put},
    Router,
};

use crate::api::handlers::{self, AppState};
use crate::store::MetadataStore;

pub fn create_router<S: MetadataStore + 'static>() -> Router<AppState<S>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Type definitions
        .route(
            "/types",
            get(handlers::get_all_types::<S>).post(handlers::add_type_def::<S>),
        )
        .route("/types/:guid", get(handlers::get_type_def_by_guid::<S>))
        .route("/types/name/:name", get(handlers::get_type_def_by_name::<S>))
        .route("/attribute-types", post(handlers::add_attribute_type_def::<S>))
        // Entities
        .route("/entities", post(handlers::add_entity::<S>))
        .route("/entities/search", post(handlers::find_entities::<S>))
        .route(
            "/entities/:guid",
            get(handlers::get_entity_detail::<S>).delete(handlers::delete_entity::<S>),
        )
        .route("/entities/:guid/summary", get(handlers::get_entity_summary::<S>))
        .route(
            "/entities/:guid/properties",
            put(handlers::update_entity_properties::<S>),
        )
        .route("/entities/:guid/status", put(handlers::update_entity_status::<S>))
        .route("/entities/:guid/undo", post(handlers::undo_entity_update::<S>))
        .route("/entities/:guid/restore", post(handlers::restore_entity::<S>))
        .route("/entities/:guid/purge", post(handlers::purge_entity::<S>))
        .route(
            "/entities/:guid/classifications/:name",
            post(handlers::classify_entity::<S>).delete(handlers::declassify_entity::<S>),
        )
        .route(
            "/entities/:guid/relationships",
            get(handlers::get_relationships_for_entity::<S>),
        )
        // Relationships
        .route("/relationships", post(handlers::add_relationship::<S>))
        .route(
            "/relationships/:guid",
            get(handlers::get_relationship::<S>).delete(handlers::delete_relationship::<S>),
        )
}
