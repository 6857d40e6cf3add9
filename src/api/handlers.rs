use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    Json as RequestJson,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ErrorKind, OmrsError};
use crate::logic::{LocalMetadataCollection, Removal};
use crate::model::{
    AttributeTypeDef, Classification, EntityDetail, EntityPropertyQuery, EntitySummary, Guid,
    InstanceProperties, InstanceStatus, Paging, Relationship, RelationshipQuery, TypeDef,
    TypeDefGallery, UserContext,
};
use crate::store::MetadataStore;

pub type AppState<S> = Arc<LocalMetadataCollection<S>>;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
            kind: None,
            parameter: None,
            method: None,
        }
    }
}

impl From<&OmrsError> for ErrorResponse {
    fn from(error: &OmrsError) -> Self {
        Self {
            error: error.to_string(),
            kind: Some(error.kind()),
            parameter: error.parameter().map(str::to_string),
            method: Some(error.method().to_string()),
        }
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidParameter
        | ErrorKind::PropertyError
        | ErrorKind::ClassificationError
        | ErrorKind::StatusNotSupported
        | ErrorKind::InvalidType
        | ErrorKind::IncompatiblePatch
        | ErrorKind::AmbiguousRelationships
        | ErrorKind::AmbiguousEntityName => StatusCode::BAD_REQUEST,
        ErrorKind::NotAuthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::InstanceNotKnown | ErrorKind::TypeNotKnown | ErrorKind::EntityProxyOnly => {
            StatusCode::NOT_FOUND
        }
        ErrorKind::TypeAlreadyKnown
        | ErrorKind::TypeConflict
        | ErrorKind::TypeInUse
        | ErrorKind::HomeConflict
        | ErrorKind::InstanceNotDeleted => StatusCode::CONFLICT,
        ErrorKind::FunctionNotSupported => StatusCode::NOT_IMPLEMENTED,
        ErrorKind::RepositoryUnavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn error_response(error: OmrsError) -> (StatusCode, Json<ErrorResponse>) {
    let status = status_for(error.kind());
    if status.is_server_error() {
        log::error!("Request failed: {}", error);
    } else {
        log::debug!("Request rejected: {}", error);
    }
    (status, Json(ErrorResponse::from(&error)))
}

/// Outcome of a delete: `purged` is set when the repository has no soft
/// delete and the instance is gone for good
#[derive(Debug, Serialize, Deserialize)]
pub struct RemovalResponse<T> {
    pub purged: bool,
    pub instance: T,
}

impl<T> From<Removal<T>> for RemovalResponse<T> {
    fn from(removal: Removal<T>) -> Self {
        let purged = removal.is_purged();
        Self {
            purged,
            instance: removal.into_inner(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurgeResponse {
    pub guid: Guid,
    pub purged: bool,
}

// Type definitions

pub async fn get_all_types<S: MetadataStore>(
    State(collection): State<AppState<S>>,
    user: UserContext,
) -> ApiResult<TypeDefGallery> {
    collection
        .get_all_types(&user)
        .map(Json)
        .map_err(error_response)
}

pub async fn add_type_def<S: MetadataStore>(
    State(collection): State<AppState<S>>,
    user: UserContext,
    RequestJson(type_def): RequestJson<TypeDef>,
) -> ApiResult<TypeDef> {
    let guid = type_def.guid.clone();
    collection
        .add_type_def(&user, type_def)
        .await
        .map_err(error_response)?;
    collection
        .get_type_def_by_guid(&user, &guid)
        .map(Json)
        .map_err(error_response)
}

pub async fn get_type_def_by_guid<S: MetadataStore>(
    State(collection): State<AppState<S>>,
    user: UserContext,
    Path(guid): Path<Guid>,
) -> ApiResult<TypeDef> {
    collection
        .get_type_def_by_guid(&user, &guid)
        .map(Json)
        .map_err(error_response)
}

pub async fn get_type_def_by_name<S: MetadataStore>(
    State(collection): State<AppState<S>>,
    user: UserContext,
    Path(name): Path<String>,
) -> ApiResult<TypeDef> {
    collection
        .get_type_def_by_name(&user, &name)
        .map(Json)
        .map_err(error_response)
}

pub async fn add_attribute_type_def<S: MetadataStore>(
    State(collection): State<AppState<S>>,
    user: UserContext,
    RequestJson(attribute_type_def): RequestJson<AttributeTypeDef>,
) -> ApiResult<AttributeTypeDef> {
    let guid = attribute_type_def.guid.clone();
    collection
        .add_attribute_type_def(&user, attribute_type_def)
        .await
        .map_err(error_response)?;
    collection
        .get_attribute_type_def_by_guid(&user, &guid)
        .map(Json)
        .map_err(error_response)
}

// Entities

#[derive(Debug, Serialize, Deserialize)]
pub struct NewEntityRequest {
    pub entity_type_guid: Guid,
    #[serde(default)]
    pub properties: InstanceProperties,
    #[serde(default)]
    pub classifications: Vec<Classification>,
    #[serde(default)]
    pub initial_status: Option<InstanceStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusRequest {
    pub status: InstanceStatus,
}

pub async fn add_entity<S: MetadataStore>(
    State(collection): State<AppState<S>>,
    user: UserContext,
    RequestJson(request): RequestJson<NewEntityRequest>,
) -> ApiResult<EntityDetail> {
    collection
        .add_entity(
            &user,
            &request.entity_type_guid,
            request.properties,
            request.classifications,
            request.initial_status,
        )
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn get_entity_detail<S: MetadataStore>(
    State(collection): State<AppState<S>>,
    user: UserContext,
    Path(guid): Path<Guid>,
) -> ApiResult<EntityDetail> {
    collection
        .get_entity_detail(&user, &guid)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn get_entity_summary<S: MetadataStore>(
    State(collection): State<AppState<S>>,
    user: UserContext,
    Path(guid): Path<Guid>,
) -> ApiResult<EntitySummary> {
    collection
        .get_entity_summary(&user, &guid)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn find_entities<S: MetadataStore>(
    State(collection): State<AppState<S>>,
    user: UserContext,
    RequestJson(query): RequestJson<EntityPropertyQuery>,
) -> ApiResult<Vec<EntityDetail>> {
    collection
        .find_entities_by_property(&user, query)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn update_entity_properties<S: MetadataStore>(
    State(collection): State<AppState<S>>,
    user: UserContext,
    Path(guid): Path<Guid>,
    RequestJson(properties): RequestJson<InstanceProperties>,
) -> ApiResult<EntityDetail> {
    collection
        .update_entity_properties(&user, &guid, properties)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn update_entity_status<S: MetadataStore>(
    State(collection): State<AppState<S>>,
    user: UserContext,
    Path(guid): Path<Guid>,
    RequestJson(request): RequestJson<StatusRequest>,
) -> ApiResult<EntityDetail> {
    collection
        .update_entity_status(&user, &guid, request.status)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn undo_entity_update<S: MetadataStore>(
    State(collection): State<AppState<S>>,
    user: UserContext,
    Path(guid): Path<Guid>,
) -> ApiResult<EntityDetail> {
    collection
        .undo_entity_update(&user, &guid)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn delete_entity<S: MetadataStore>(
    State(collection): State<AppState<S>>,
    user: UserContext,
    Path(guid): Path<Guid>,
) -> ApiResult<RemovalResponse<EntityDetail>> {
    collection
        .delete_entity(&user, &guid)
        .await
        .map(|removal| Json(removal.into()))
        .map_err(error_response)
}

pub async fn restore_entity<S: MetadataStore>(
    State(collection): State<AppState<S>>,
    user: UserContext,
    Path(guid): Path<Guid>,
) -> ApiResult<EntityDetail> {
    collection
        .restore_entity(&user, &guid)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn purge_entity<S: MetadataStore>(
    State(collection): State<AppState<S>>,
    user: UserContext,
    Path(guid): Path<Guid>,
) -> ApiResult<PurgeResponse> {
    collection
        .purge_entity(&user, &guid)
        .await
        .map_err(error_response)?;
    Ok(Json(PurgeResponse { guid, purged: true }))
}

/// Classify, or reclassify when the entity already carries the classification
pub async fn classify_entity<S: MetadataStore>(
    State(collection): State<AppState<S>>,
    user: UserContext,
    Path((guid, name)): Path<(Guid, String)>,
    properties: Option<RequestJson<InstanceProperties>>,
) -> ApiResult<EntityDetail> {
    let properties = properties.map(|RequestJson(p)| p).unwrap_or_default();
    let current = collection
        .get_entity_detail(&user, &guid)
        .await
        .map_err(error_response)?;
    let result = if current.classification(&name).is_some() {
        collection
            .update_entity_classification(&user, &guid, &name, properties)
            .await
    } else {
        collection.classify_entity(&user, &guid, &name, properties).await
    };
    result.map(Json).map_err(error_response)
}

pub async fn declassify_entity<S: MetadataStore>(
    State(collection): State<AppState<S>>,
    user: UserContext,
    Path((guid, name)): Path<(Guid, String)>,
) -> ApiResult<EntityDetail> {
    collection
        .declassify_entity(&user, &guid, &name)
        .await
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Deserialize)]
pub struct RelationshipsParams {
    #[serde(rename = "type")]
    pub relationship_type_guid: Option<Guid>,
    pub from: Option<usize>,
    pub page_size: Option<usize>,
}

pub async fn get_relationships_for_entity<S: MetadataStore>(
    State(collection): State<AppState<S>>,
    user: UserContext,
    Path(guid): Path<Guid>,
    Query(params): Query<RelationshipsParams>,
) -> ApiResult<Vec<Relationship>> {
    let query = RelationshipQuery {
        relationship_type_guid: params.relationship_type_guid,
        paging: Paging::new(params.from.unwrap_or(0), params.page_size.unwrap_or(0)),
        ..RelationshipQuery::default()
    };
    collection
        .get_relationships_for_entity(&user, &guid, query)
        .await
        .map(Json)
        .map_err(error_response)
}

// Relationships

#[derive(Debug, Serialize, Deserialize)]
pub struct NewRelationshipRequest {
    pub relationship_type_guid: Guid,
    pub entity_one_guid: Guid,
    pub entity_two_guid: Guid,
    #[serde(default)]
    pub properties: InstanceProperties,
    #[serde(default)]
    pub initial_status: Option<InstanceStatus>,
}

pub async fn add_relationship<S: MetadataStore>(
    State(collection): State<AppState<S>>,
    user: UserContext,
    RequestJson(request): RequestJson<NewRelationshipRequest>,
) -> ApiResult<Relationship> {
    collection
        .add_relationship(
            &user,
            &request.relationship_type_guid,
            request.properties,
            &request.entity_one_guid,
            &request.entity_two_guid,
            request.initial_status,
        )
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn get_relationship<S: MetadataStore>(
    State(collection): State<AppState<S>>,
    user: UserContext,
    Path(guid): Path<Guid>,
) -> ApiResult<Relationship> {
    collection
        .get_relationship(&user, &guid)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn delete_relationship<S: MetadataStore>(
    State(collection): State<AppState<S>>,
    user: UserContext,
    Path(guid): Path<Guid>,
) -> ApiResult<RemovalResponse<Relationship>> {
    collection
        .delete_relationship(&user, &guid)
        .await
        .map(|removal| Json(removal.into()))
        .map_err(error_response)
}
