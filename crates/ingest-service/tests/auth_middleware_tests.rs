use actix_web::{test, web, App, HttpResponse};
use credential_store::{hash_api_key, ApiKeyRecord, CredentialStore, InMemoryCredentialStore};
use ingest_service::auth::{ApiKeyAuth, AuthenticatedUser};
use std::sync::Arc;

async fn whoami(user: AuthenticatedUser) -> HttpResponse {
    HttpResponse::Ok().body(user.user_id)
}

#[actix_web::test]
async fn missing_api_key_is_rejected_with_401() {
    let store: Arc<dyn CredentialStore> = Arc::new(InMemoryCredentialStore::new());
    let app = test::init_service(
        App::new()
            .wrap(ApiKeyAuth::new(store))
            .route("/whoami", web::get().to(whoami)),
    )
    .await;

    let req = test::TestRequest::get().uri("/whoami").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
}

#[actix_web::test]
async fn unknown_api_key_is_rejected_with_401() {
    let store: Arc<dyn CredentialStore> = Arc::new(InMemoryCredentialStore::new());
    let app = test::init_service(
        App::new()
            .wrap(ApiKeyAuth::new(store))
            .route("/whoami", web::get().to(whoami)),
    )
    .await;

    let req = test::TestRequest::get().uri("/whoami").insert_header(("x-api-key", "evp_unknown")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
}

#[actix_web::test]
async fn valid_api_key_attaches_authenticated_user() {
    let in_memory = InMemoryCredentialStore::new();
    let raw_key = "evp_test_key_123";
    in_memory
        .insert(
            hash_api_key(raw_key),
            ApiKeyRecord {
                user_id: "user-42".to_string(),
                role: "producer".to_string(),
                revoked_at: None,
                expires_at: None,
            },
        )
        .await;
    let store: Arc<dyn CredentialStore> = Arc::new(in_memory);

    let app = test::init_service(
        App::new()
            .wrap(ApiKeyAuth::new(store))
            .route("/whoami", web::get().to(whoami)),
    )
    .await;

    let req = test::TestRequest::get().uri("/whoami").insert_header(("x-api-key", raw_key)).to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
}

#[actix_web::test]
async fn revoked_api_key_is_rejected_with_401() {
    let in_memory = InMemoryCredentialStore::new();
    let raw_key = "evp_revoked_key";
    in_memory
        .insert(
            hash_api_key(raw_key),
            ApiKeyRecord {
                user_id: "user-42".to_string(),
                role: "producer".to_string(),
                revoked_at: Some(chrono::Utc::now()),
                expires_at: None,
            },
        )
        .await;
    let store: Arc<dyn CredentialStore> = Arc::new(in_memory);

    let app = test::init_service(
        App::new()
            .wrap(ApiKeyAuth::new(store))
            .route("/whoami", web::get().to(whoami)),
    )
    .await;

    let req = test::TestRequest::get().uri("/whoami").insert_header(("x-api-key", raw_key)).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
}
