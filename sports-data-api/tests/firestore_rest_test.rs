use serde_json::json;
use sports_data_api::services::firestore::{
    AmbientEnvironment, AppRegistry, ClientFactory, Credential, FirestoreClient,
    GoogleClientFactory, StoreClient, StoreError, TokenProvider,
};
use wiremock::matchers::{body_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LIST_PATH: &str =
    "/v1/projects/demo-project/databases/sports-data/documents:listCollectionIds";

fn emulator_client(server: &MockServer) -> FirestoreClient {
    let http = reqwest::Client::new();
    FirestoreClient::new(
        "demo-project",
        format!("{}/v1", server.uri()),
        http.clone(),
        TokenProvider::new(Credential::Emulator, http),
    )
}

#[tokio::test]
async fn list_collections_follows_page_tokens_in_order() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(LIST_PATH))
        .and(header("authorization", "Bearer owner"))
        .and(body_json(json!({ "pageSize": 300 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "collectionIds": ["teams", "sports"],
            "nextPageToken": "page-2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(LIST_PATH))
        .and(body_json(json!({ "pageSize": 300, "pageToken": "page-2" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "collectionIds": ["leagues"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let database = emulator_client(&server).database("sports-data").unwrap();
    let collections = database.list_collections().await.unwrap();

    assert_eq!(collections, vec!["teams", "sports", "leagues"]);
}

#[tokio::test]
async fn empty_database_has_no_collections() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(LIST_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let database = emulator_client(&server).database("sports-data").unwrap();
    assert!(database.list_collections().await.unwrap().is_empty());
}

#[tokio::test]
async fn error_status_is_reported() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(LIST_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_string("permission denied"))
        .mount(&server)
        .await;

    let database = emulator_client(&server).database("sports-data").unwrap();
    let err = database.list_collections().await.unwrap_err();

    match err {
        StoreError::Status { status, body } => {
            assert_eq!(status, 403);
            assert!(body.contains("permission denied"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn invalid_database_id_is_rejected_before_any_request() {
    let server = MockServer::start().await;
    let err = emulator_client(&server).database("Bad_Id").unwrap_err();
    assert!(matches!(err, StoreError::InvalidDatabaseId(_)));
}

#[tokio::test]
async fn authorized_user_file_exchanges_refresh_token_once() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=1%2F%2Frefresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.user-token",
            "expires_in": 3599,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(
            "/v1/projects/quota-project/databases/sports-data/documents:listCollectionIds",
        ))
        .and(header("authorization", "Bearer ya29.user-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "collectionIds": ["players"]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(
        file.path(),
        json!({
            "type": "authorized_user",
            "client_id": "client-id.apps.googleusercontent.com",
            "client_secret": "client-secret",
            "refresh_token": "1//refresh",
            "quota_project_id": "quota-project",
            "token_uri": format!("{}/token", server.uri())
        })
        .to_string(),
    )
    .unwrap();

    let factory = GoogleClientFactory::new(
        AmbientEnvironment {
            credentials_file: Some(file.path().to_path_buf()),
            ..Default::default()
        },
        AppRegistry::new(),
    )
    .unwrap()
    .with_base_url(format!("{}/v1", server.uri()));

    let client = factory.from_application_default(None).await.unwrap();
    assert_eq!(client.project_id(), "quota-project");
    assert_eq!(factory.existing().len(), 1);

    let database = client.database("sports-data").unwrap();
    assert_eq!(database.list_collections().await.unwrap(), vec!["players"]);
    assert_eq!(database.list_collections().await.unwrap(), vec!["players"]);
}

#[tokio::test]
async fn explicit_project_overrides_credentials_file() {
    let server = MockServer::start().await;
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(
        file.path(),
        json!({
            "type": "authorized_user",
            "client_id": "id",
            "client_secret": "secret",
            "refresh_token": "refresh",
            "quota_project_id": "quota-project"
        })
        .to_string(),
    )
    .unwrap();

    let factory = GoogleClientFactory::new(
        AmbientEnvironment {
            credentials_file: Some(file.path().to_path_buf()),
            ..Default::default()
        },
        AppRegistry::new(),
    )
    .unwrap()
    .with_base_url(format!("{}/v1", server.uri()));

    let client = factory
        .from_application_default(Some("configured-project"))
        .await
        .unwrap();
    assert_eq!(client.project_id(), "configured-project");
}

#[tokio::test]
async fn metadata_server_supplies_project_and_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .and(header("metadata-flavor", "Google"))
        .respond_with(ResponseTemplate::new(200).insert_header("Metadata-Flavor", "Google"))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/computeMetadata/v1/project/project-id"))
        .and(header("metadata-flavor", "Google"))
        .respond_with(ResponseTemplate::new(200).set_body_string("meta-project"))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(
            "/computeMetadata/v1/instance/service-accounts/default/token",
        ))
        .and(header("metadata-flavor", "Google"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.metadata-token",
            "expires_in": 3599,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(
            "/v1/projects/meta-project/databases/sports-data/documents:listCollectionIds",
        ))
        .and(header("authorization", "Bearer ya29.metadata-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "collectionIds": ["venues"]
        })))
        .mount(&server)
        .await;

    let factory = GoogleClientFactory::new(
        AmbientEnvironment {
            metadata_base_url: Some(server.uri()),
            ..Default::default()
        },
        AppRegistry::new(),
    )
    .unwrap()
    .with_base_url(format!("{}/v1", server.uri()));

    let client = factory.from_application_default(None).await.unwrap();
    assert_eq!(client.project_id(), "meta-project");

    let database = client.database("sports-data").unwrap();
    assert_eq!(database.list_collections().await.unwrap(), vec!["venues"]);
}

#[tokio::test]
async fn token_endpoint_rejection_is_auth_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant"
        })))
        .mount(&server)
        .await;

    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(
        file.path(),
        json!({
            "type": "authorized_user",
            "client_id": "id",
            "client_secret": "secret",
            "refresh_token": "revoked",
            "token_uri": format!("{}/token", server.uri())
        })
        .to_string(),
    )
    .unwrap();

    let factory = GoogleClientFactory::new(
        AmbientEnvironment {
            credentials_file: Some(file.path().to_path_buf()),
            ..Default::default()
        },
        AppRegistry::new(),
    )
    .unwrap()
    .with_base_url(format!("{}/v1", server.uri()));

    let client = factory.from_application_default(Some("p-1234")).await.unwrap();
    let err = client
        .database("sports-data")
        .unwrap()
        .list_collections()
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Auth(ref msg) if msg.contains("invalid_grant")));
}
