#![cfg(feature = "inmem-store")]

use actix_web::{test, web, App};
use chrono::{DateTime, Utc};
use msgboard::repo::inmem::InMemRepo;
use msgboard::routes::not_found;
use msgboard::{configure, AppState, SecurityHeaders};
use serde_json::{json, Value};
use std::sync::Arc;

macro_rules! app {
    ($repo:expr) => {
        test::init_service(
            App::new()
                .wrap(SecurityHeaders::default())
                .app_data(web::Data::new(AppState { repo: Arc::new($repo) }))
                .configure(configure)
                .default_service(web::to(not_found)),
        )
        .await
    };
}

// (status, parsed JSON body or Null)
macro_rules! call {
    ($app:expr, $req:expr) => {{
        let resp = test::call_service(&$app, $req.to_request()).await;
        let status = resp.status().as_u16();
        let body = test::read_body(resp).await;
        let v: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, v)
    }};
}

fn repo() -> (InMemRepo, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    (InMemRepo::with_data_dir(dir.path()).unwrap(), dir)
}

fn ts(v: &Value) -> DateTime<Utc> {
    v.as_str().unwrap().parse().unwrap()
}

#[actix_web::test]
async fn thread_reply_flow() {
    let (r, _dir) = repo();
    let app = app!(r);

    let (status, thread) = call!(app, test::TestRequest::post()
        .uri("/api/threads/b1")
        .set_json(json!({"text": "hi", "delete_password": "p"})));
    assert_eq!(status, 200);
    assert_eq!(thread["text"], "hi");
    assert_eq!(thread["created_on"], thread["bumped_on"]);
    assert!(thread.get("delete_password").is_none());
    let thread_id = thread["_id"].as_str().unwrap().to_string();

    let (status, reply) = call!(app, test::TestRequest::post()
        .uri("/api/replies/b1")
        .set_json(json!({"text": "r1", "delete_password": "p2", "thread_id": thread_id})));
    assert_eq!(status, 200);
    assert_eq!(reply["text"], "r1");
    assert!(reply["_id"].is_string());
    assert!(reply.get("delete_password").is_none());

    let (status, listing) = call!(app, test::TestRequest::get().uri("/api/threads/b1"));
    assert_eq!(status, 200);
    let listing = listing.as_array().unwrap();
    assert_eq!(listing.len(), 1);
    let entry = &listing[0];
    assert_eq!(entry["_id"], thread_id.as_str());
    assert_eq!(entry["replycount"], 1);
    assert_eq!(entry["replies"][0]["_id"], reply["_id"]);
    assert!(ts(&entry["bumped_on"]) >= ts(&reply["created_on"]));
    assert!(ts(&entry["bumped_on"]) > ts(&entry["created_on"]));
    assert!(entry.get("reported").is_none());
    assert!(entry["replies"][0].get("delete_password").is_none());
}

#[actix_web::test]
async fn missing_fields_are_rejected() {
    let (r, _dir) = repo();
    let app = app!(r);

    let (status, body) = call!(app, test::TestRequest::post()
        .uri("/api/threads/b")
        .set_json(json!({"text": "no password"})));
    assert_eq!(status, 400);
    assert_eq!(body, json!({"error": "Missing required fields"}));

    let (status, body) = call!(app, test::TestRequest::post()
        .uri("/api/threads/b")
        .set_json(json!({"text": "", "delete_password": "p"})));
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Missing required fields");

    let (status, body) = call!(app, test::TestRequest::post()
        .uri("/api/replies/b")
        .set_json(json!({"text": "t", "delete_password": "p"})));
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Missing required fields");

    let (status, body) = call!(app, test::TestRequest::get().uri("/api/replies/b"));
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Missing thread_id");

    // nothing was created
    let (_, listing) = call!(app, test::TestRequest::get().uri("/api/threads/b"));
    assert_eq!(listing, json!([]));
}

#[actix_web::test]
async fn malformed_body_is_a_client_error() {
    let (r, _dir) = repo();
    let app = app!(r);
    let (status, body) = call!(app, test::TestRequest::post()
        .uri("/api/threads/b")
        .insert_header(("Content-Type", "application/json"))
        .set_payload("{not json"));
    assert_eq!(status, 400);
    assert!(body["error"].is_string());
}

#[actix_web::test]
async fn reply_requires_thread_on_same_board() {
    let (r, _dir) = repo();
    let app = app!(r);
    let (_, thread) = call!(app, test::TestRequest::post()
        .uri("/api/threads/a")
        .set_json(json!({"text": "on a", "delete_password": "p"})));

    let (status, body) = call!(app, test::TestRequest::post()
        .uri("/api/replies/other")
        .set_json(json!({"text": "t", "delete_password": "p", "thread_id": thread["_id"]})));
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Thread not found");

    let (status, body) = call!(app, test::TestRequest::post()
        .uri("/api/replies/a")
        .set_json(json!({"text": "t", "delete_password": "p", "thread_id": "not-an-id"})));
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Thread not found");

    let (status, body) = call!(app, test::TestRequest::get()
        .uri(&format!("/api/replies/other?thread_id={}", thread["_id"].as_str().unwrap())));
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Thread not found");
}

#[actix_web::test]
async fn listing_caps_threads_and_recent_replies() {
    let (r, _dir) = repo();
    let app = app!(r);

    let mut ids = Vec::new();
    for i in 0..11 {
        let (_, t) = call!(app, test::TestRequest::post()
            .uri("/api/threads/busy")
            .set_json(json!({"text": format!("thread {i}"), "delete_password": "p"})));
        ids.push(t["_id"].as_str().unwrap().to_string());
    }
    // the oldest thread gets four replies and is bumped to the top
    for i in 0..4 {
        call!(app, test::TestRequest::post()
            .uri("/api/replies/busy")
            .set_json(json!({"text": format!("reply {i}"), "delete_password": "p", "thread_id": ids[0]})));
    }
    // another board stays separate
    call!(app, test::TestRequest::post()
        .uri("/api/threads/quiet")
        .set_json(json!({"text": "elsewhere", "delete_password": "p"})));

    let (status, listing) = call!(app, test::TestRequest::get().uri("/api/threads/busy"));
    assert_eq!(status, 200);
    let listing = listing.as_array().unwrap();
    assert_eq!(listing.len(), 10);
    assert_eq!(listing[0]["_id"], ids[0].as_str());
    assert_eq!(listing[1]["_id"], ids[10].as_str());
    assert!(listing.iter().all(|t| t["text"] != "elsewhere"));
    // ids[1] is the oldest un-bumped thread and falls off
    assert!(listing.iter().all(|t| t["_id"] != ids[1].as_str()));

    for pair in listing.windows(2) {
        assert!(ts(&pair[0]["bumped_on"]) >= ts(&pair[1]["bumped_on"]));
    }

    let top = &listing[0];
    assert_eq!(top["replycount"], 4);
    let texts: Vec<_> = top["replies"].as_array().unwrap().iter().map(|r| r["text"].as_str().unwrap()).collect();
    assert_eq!(texts, vec!["reply 3", "reply 2", "reply 1"]);
    assert!(listing.iter().all(|t| t["replies"].as_array().unwrap().len() <= 3));
}

#[actix_web::test]
async fn replies_endpoint_returns_every_reply_in_order() {
    let (r, _dir) = repo();
    let app = app!(r);
    let (_, thread) = call!(app, test::TestRequest::post()
        .uri("/api/threads/b")
        .set_json(json!({"text": "op", "delete_password": "p"})));
    let thread_id = thread["_id"].as_str().unwrap().to_string();
    for i in 0..5 {
        call!(app, test::TestRequest::post()
            .uri("/api/replies/b")
            .set_json(json!({"text": format!("r{i}"), "delete_password": "p", "thread_id": thread_id})));
    }

    let (status, detail) = call!(app, test::TestRequest::get().uri(&format!("/api/replies/b?thread_id={thread_id}")));
    assert_eq!(status, 200);
    assert_eq!(detail["_id"], thread_id.as_str());
    assert_eq!(detail["text"], "op");
    assert!(detail["bumped_on"].is_string());
    let replies = detail["replies"].as_array().unwrap();
    let texts: Vec<_> = replies.iter().map(|r| r["text"].as_str().unwrap()).collect();
    assert_eq!(texts, vec!["r0", "r1", "r2", "r3", "r4"]);
    for r in replies {
        assert!(r.get("delete_password").is_none());
        assert!(r.get("reported").is_none());
    }
}

#[actix_web::test]
async fn form_encoded_bodies_are_accepted() {
    let (r, _dir) = repo();
    let app = app!(r);
    let (status, thread) = call!(app, test::TestRequest::post()
        .uri("/api/threads/forms")
        .set_form(vec![("text", "from a form"), ("delete_password", "p")]));
    assert_eq!(status, 200);
    assert_eq!(thread["text"], "from a form");

    let thread_id = thread["_id"].as_str().unwrap();
    let (status, reply) = call!(app, test::TestRequest::post()
        .uri("/api/replies/forms")
        .set_form(vec![("text", "form reply"), ("delete_password", "p"), ("thread_id", thread_id)]));
    assert_eq!(status, 200);
    assert_eq!(reply["text"], "form reply");
}

#[actix_web::test]
async fn unknown_route_is_plain_not_found() {
    let (r, _dir) = repo();
    let app = app!(r);
    let resp = test::call_service(&app, test::TestRequest::get().uri("/nope").to_request()).await;
    assert_eq!(resp.status(), 404);
    let body = test::read_body(resp).await;
    assert_eq!(&body[..], b"Not Found");
}

#[actix_web::test]
async fn unreadable_stored_password_is_a_server_error() {
    use msgboard::{models::NewThread, repo::ThreadRepo};

    let (r, _dir) = repo();
    // a stored value that is not a password hash
    let t = r
        .create_thread(NewThread { board: "b".into(), text: "legacy".into(), delete_password: "plaintext".into() })
        .await
        .unwrap();
    let app = app!(r);

    let (status, body) = call!(app, test::TestRequest::delete()
        .uri("/api/threads/b")
        .set_json(json!({"thread_id": t.id.to_string(), "delete_password": "plaintext"})));
    assert_eq!(status, 500);
    assert_eq!(body, json!({"error": "Server error"}));

    let (_, listing) = call!(app, test::TestRequest::get().uri("/api/threads/b"));
    assert_eq!(listing.as_array().unwrap().len(), 1);
}

#[actix_web::test]
async fn bodyless_requests_report_missing_fields() {
    let (r, _dir) = repo();
    let app = app!(r);

    let (status, body) = call!(app, test::TestRequest::delete().uri("/api/threads/b"));
    assert_eq!(status, 400);
    assert_eq!(body, json!({"error": "Missing required fields"}));

    let (status, body) = call!(app, test::TestRequest::delete().uri("/api/replies/b"));
    assert_eq!(status, 400);
    assert_eq!(body, json!({"error": "Missing required fields"}));

    let (status, body) = call!(app, test::TestRequest::put().uri("/api/threads/b"));
    assert_eq!(status, 400);
    assert_eq!(body, json!({"error": "Missing thread_id"}));

    let (status, body) = call!(app, test::TestRequest::post()
        .uri("/api/threads/b")
        .insert_header(("Content-Type", "application/json")));
    assert_eq!(status, 400);
    assert_eq!(body, json!({"error": "Missing required fields"}));
}
