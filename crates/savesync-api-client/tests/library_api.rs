use std::time::Duration;

use savesync_api_client::{ApiClient, ApiError, AuthSession, LibraryCatalog};
use savesync_core::{AuthToken, EngineError, ErrorMetadata, Outcome};

fn client(url: &str) -> ApiClient {
    ApiClient::new(url, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_list_library_filters_and_orders() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/profile/games")
        .match_header("authorization", "Bearer token-1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"[
                {"objectId":"1245620","title":"Elden Ring","shop":"steam","id":"r1",
                 "winePrefixPath":"/home/deck/prefixes/elden","automaticCloudSync":true,
                 "playTimeInMilliseconds":3600000},
                {"objectId":"70","title":"Half-Life","shop":"steam","isDeleted":true},
                {"objectId":"400","title":"celeste","shop":"steam"}
            ]"#,
        )
        .create_async()
        .await;

    let catalog = LibraryCatalog::new(client(&server.url()));
    let entries = catalog
        .list_library(&AuthToken::new("token-1", None))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].display_name, "celeste");
    assert_eq!(entries[1].game_identity.as_str(), "1245620");
    assert_eq!(entries[1].metadata.remote_id.as_deref(), Some("r1"));
    assert!(entries[1].metadata.automatic_cloud_sync);
    assert_eq!(
        entries[1].metadata.wine_prefix_path.as_deref(),
        Some("/home/deck/prefixes/elden")
    );
}

#[tokio::test]
async fn test_list_library_refetches_every_call() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/profile/games")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("[]")
        .expect(2)
        .create_async()
        .await;

    let catalog = LibraryCatalog::new(client(&server.url()));
    let token = AuthToken::new("t", None);
    assert!(catalog.list_library(&token).await.unwrap().is_empty());
    assert!(catalog.list_library(&token).await.unwrap().is_empty());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_unauthorized_library_call_makes_session_stale() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/profile/games")
        .with_status(401)
        .with_body("token expired")
        .create_async()
        .await;

    let session = AuthSession::from_token(client(&server.url()), "t");
    let catalog = LibraryCatalog::new(session.client().clone());

    let token = session.current_token().unwrap();
    let result = session.observe(catalog.list_library(&token).await);

    let err = result.unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized(_)));
    assert!(session.current_token().is_err());

    let engine: EngineError = err.into();
    assert_eq!(engine.outcome(), Outcome::Unauthenticated);
}
