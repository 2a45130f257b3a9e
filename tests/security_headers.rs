#![cfg(feature = "inmem-store")]

use actix_web::{test, web, App, HttpResponse};
use msgboard::repo::inmem::InMemRepo;
use msgboard::{configure, AppState, SecurityHeaders};
use std::sync::Arc;

#[actix_web::test]
async fn test_security_headers_present() {
    let dir = tempfile::tempdir().unwrap();
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::default())
            .app_data(web::Data::new(AppState { repo: Arc::new(InMemRepo::with_data_dir(dir.path()).unwrap()) }))
            .configure(configure)
    ).await;
    let req = test::TestRequest::get().uri("/api/threads/general").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let headers = resp.headers();
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "SAMEORIGIN");
    assert_eq!(headers.get("referrer-policy").unwrap(), "same-origin");
    assert_eq!(headers.get("x-dns-prefetch-control").unwrap(), "off");
    assert_eq!(headers.get("x-download-options").unwrap(), "noopen");
    assert!(headers.get("x-xss-protection").is_some());
    assert!(headers.get("x-powered-by").is_none());
    assert!(headers.get("strict-transport-security").is_none()); // not enabled
}

#[actix_web::test]
async fn test_security_headers_on_error_responses() {
    let dir = tempfile::tempdir().unwrap();
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::default())
            .app_data(web::Data::new(AppState { repo: Arc::new(InMemRepo::with_data_dir(dir.path()).unwrap()) }))
            .configure(configure)
    ).await;
    let req = test::TestRequest::get().uri("/api/replies/general").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    assert_eq!(resp.headers().get("x-frame-options").unwrap(), "SAMEORIGIN");
}

#[actix_web::test]
async fn test_hsts_enabled_via_builder() {
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::default().with_hsts(true))
            .route("/ping", web::get().to(|| async { HttpResponse::Ok().finish() }))
    ).await;
    let req = test::TestRequest::get().uri("/ping").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.headers().get("strict-transport-security").is_some(), "HSTS header missing");
}

#[actix_web::test]
async fn test_existing_header_preserved_and_powered_by_stripped() {
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::new(false))
            .route("/custom", web::get().to(|| async {
                HttpResponse::Ok()
                    .insert_header(("X-Frame-Options", "DENY"))
                    .insert_header(("X-Powered-By", "something"))
                    .finish()
            }))
    ).await;
    let req = test::TestRequest::get().uri("/custom").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert_eq!(resp.headers().get("x-frame-options").unwrap(), "DENY");
    assert!(resp.headers().get("x-powered-by").is_none());
}
