use cohort_metadata_repo::api::routes::create_router;
use cohort_metadata_repo::seed::{self, ASSET_GUID, ASSET_OWNERSHIP_GUID, CONFIDENTIALITY_GUID, PERSON_GUID};
use cohort_metadata_repo::{CollectionIdentity, InMemoryStore, LocalMetadataCollection, TypeRegistry};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;

// Test client wrapper for making API calls
struct TestClient {
    client: Client,
    base_url: String,
}

impl TestClient {
    fn new(base_url: String) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("api-tester"));
        Self {
            client: Client::builder().default_headers(headers).build().unwrap(),
            base_url,
        }
    }

    async fn post(&self, path: &str, json: Value) -> reqwest::Result<reqwest::Response> {
        self.client
            .post(&format!("{}{}", self.base_url, path))
            .json(&json)
            .send()
            .await
    }

    async fn post_empty(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.client
            .post(&format!("{}{}", self.base_url, path))
            .send()
            .await
    }

    async fn put(&self, path: &str, json: Value) -> reqwest::Result<reqwest::Response> {
        self.client
            .put(&format!("{}{}", self.base_url, path))
            .json(&json)
            .send()
            .await
    }

    async fn get(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.client
            .get(&format!("{}{}", self.base_url, path))
            .send()
            .await
    }

    async fn delete(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.client
            .delete(&format!("{}{}", self.base_url, path))
            .send()
            .await
    }
}

/// Serve a freshly seeded repository on an ephemeral port
async fn spawn_server(soft_delete: bool) -> TestClient {
    let store = InMemoryStore::new()
        .with_soft_delete(soft_delete)
        .with_metadata_collection_id("mc-api", Some("API test collection".to_string()));
    let collection = LocalMetadataCollection::new(
        CollectionIdentity::new("api-test", "mc-api"),
        Arc::new(store),
        Arc::new(TypeRegistry::new()),
    );
    seed::load_seed_types(&collection).await.unwrap();
    let app = create_router().with_state(Arc::new(collection));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestClient::new(format!("http://{}", address))
}

fn string_value(value: &str) -> Value {
    json!({ "category": "PRIMITIVE", "value": { "type": "STRING", "value": value } })
}

async fn create_entity(client: &TestClient, type_guid: &str, qualified_name: &str) -> Value {
    let response = client
        .post(
            "/entities",
            json!({
                "entity_type_guid": type_guid,
                "properties": { "qualifiedName": string_value(qualified_name) }
            }),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    response.json().await.unwrap()
}

#[tokio::test]
async fn test_type_endpoints() {
    let client = spawn_server(true).await;

    let response = client.get("/types/name/Asset").await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let asset: Value = response.json().await.unwrap();
    assert_eq!(asset["guid"], ASSET_GUID);

    let gallery: Value = client.get("/types").await.unwrap().json().await.unwrap();
    assert_eq!(gallery["type_defs"].as_array().unwrap().len(), 7);

    // Re-adding a known definition is refused
    let response = client.post("/types", asset).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["kind"], "TYPE_ALREADY_KNOWN");

    let response = client.get("/types/not-a-type").await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_entity_lifecycle_over_http() {
    let client = spawn_server(true).await;
    let entity = create_entity(&client, ASSET_GUID, "asset-http").await;
    let guid = entity["guid"].as_str().unwrap().to_string();
    assert_eq!(entity["metadata_collection_id"], "mc-api");
    assert_eq!(entity["created_by"], "api-tester");

    let response = client
        .put(
            &format!("/entities/{}/properties", guid),
            json!({
                "qualifiedName": string_value("asset-http"),
                "name": string_value("Renamed")
            }),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let updated: Value = response.json().await.unwrap();
    assert_eq!(updated["version"], 2);

    let response = client.post_empty(&format!("/entities/{}/undo", guid)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let undone: Value = response.json().await.unwrap();
    assert!(undone["properties"].get("name").is_none());

    let response = client
        .post(
            &format!("/entities/{}/classifications/Confidentiality", guid),
            json!({ "steward": string_value("team-a") }),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let classified: Value = response.json().await.unwrap();
    assert_eq!(classified["classifications"][0]["name"], "Confidentiality");

    let response = client.delete(&format!("/entities/{}", guid)).await.unwrap();
    let removal: Value = response.json().await.unwrap();
    assert_eq!(removal["purged"], false);
    assert_eq!(removal["instance"]["status"], "DELETED");

    let response = client.post_empty(&format!("/entities/{}/restore", guid)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let restored: Value = response.json().await.unwrap();
    assert_eq!(restored["properties"], undone["properties"]);
    assert_eq!(restored["classifications"][0]["name"], "Confidentiality");

    // Purging requires a soft delete first
    let response = client.post_empty(&format!("/entities/{}/purge", guid)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_relationships_over_http() {
    let client = spawn_server(true).await;
    let asset = create_entity(&client, ASSET_GUID, "asset-rel").await;
    let person = create_entity(&client, PERSON_GUID, "person-rel").await;
    let asset_guid = asset["guid"].as_str().unwrap();
    let person_guid = person["guid"].as_str().unwrap();

    let response = client
        .post(
            "/relationships",
            json!({
                "relationship_type_guid": ASSET_OWNERSHIP_GUID,
                "entity_one_guid": asset_guid,
                "entity_two_guid": person_guid,
            }),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let relationship: Value = response.json().await.unwrap();
    let relationship_guid = relationship["guid"].as_str().unwrap();

    let listed: Value = client
        .get(&format!(
            "/entities/{}/relationships?type={}",
            asset_guid, ASSET_OWNERSHIP_GUID
        ))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["guid"], relationship_guid);

    // The ends of a relationship type are fixed
    let response = client
        .post(
            "/relationships",
            json!({
                "relationship_type_guid": ASSET_OWNERSHIP_GUID,
                "entity_one_guid": person_guid,
                "entity_two_guid": asset_guid,
            }),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client.delete(&format!("/relationships/{}", relationship_guid)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let listed: Value = client
        .get(&format!("/entities/{}/relationships", asset_guid))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(listed.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_without_soft_delete_purges() {
    let client = spawn_server(false).await;
    let entity = create_entity(&client, ASSET_GUID, "asset-hard").await;
    let guid = entity["guid"].as_str().unwrap();

    let removal: Value = client
        .delete(&format!("/entities/{}", guid))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(removal["purged"], true);

    let response = client.get(&format!("/entities/{}", guid)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_classification_must_apply_to_type() {
    let client = spawn_server(true).await;
    let entity = create_entity(&client, ASSET_GUID, "asset-class").await;
    let guid = entity["guid"].as_str().unwrap();

    let response = client
        .post(&format!("/entities/{}/classifications/Unheard", guid), json!({}))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client.get(&format!("/types/{}", CONFIDENTIALITY_GUID)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
