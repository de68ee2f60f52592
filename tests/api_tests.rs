//! Integration tests for the HTTP adapter.
//!
//! Requests go through the full axum router with `oneshot`; no socket is bound.

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use task_assign::api::{REPLAY_HEADER, build_router};
use task_assign::config::Config;
use task_assign::db::Database;
use task_assign::engine::AssignmentEngine;
use task_assign::types::TaskStatus;
use tower::ServiceExt;

/// Helper to create a fresh in-memory database for testing.
fn setup_db() -> Database {
    Database::open_in_memory().expect("Failed to create in-memory database")
}

fn setup_app() -> (Router, Arc<Database>) {
    let db = Arc::new(setup_db());
    db.create_task(Some("t-1".to_string()), "Ship it", TaskStatus::ToDo)
        .unwrap();
    db.register_agent(Some("agent-a".to_string()), Some("Ada".to_string()), None, "active")
        .unwrap();
    db.register_agent(Some("agent-b".to_string()), None, None, "active")
        .unwrap();

    let engine = AssignmentEngine::new(Arc::clone(&db), &Config::default());
    (build_router(engine), db)
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn post_with_key(uri: &str, key: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("idempotency-key", key)
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, headers, body)
}

mod health_tests {
    use super::*;

    #[tokio::test]
    async fn health_reports_version() {
        let (app, _db) = setup_app();
        let (status, _, body) = send(&app, get("/api/health")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }
}

mod assign_route_tests {
    use super::*;

    #[tokio::test]
    async fn assign_then_stale_version_conflicts() {
        let (app, _db) = setup_app();

        let (status, headers, body) = send(
            &app,
            post(
                "/api/tasks/t-1/assign",
                r#"{"agentId":"agent-a","expectedVersion":0}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.get(REPLAY_HEADER).is_none());
        assert_eq!(body["changed"], true);
        assert_eq!(body["task"]["status"], "ASSIGNED");
        assert_eq!(body["task"]["version"], 1);
        assert_eq!(body["task"]["assigneeId"], "agent-a");

        let (status, _, body) = send(
            &app,
            post(
                "/api/tasks/t-1/assign",
                r#"{"agentId":"agent-b","expectedVersion":0}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "VERSION_CONFLICT");
        assert_eq!(body["error"]["details"]["currentVersion"], 1);
    }

    #[tokio::test]
    async fn malformed_and_invalid_bodies() {
        let (app, _db) = setup_app();

        let (status, _, body) = send(&app, post("/api/tasks/t-1/assign", "{oops")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_JSON");

        let (status, _, body) = send(
            &app,
            post("/api/tasks/t-1/assign", r#"{"agentId":"agent-a","mode":"sometimes"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn blank_task_id_is_rejected() {
        let (app, _db) = setup_app();
        let (status, _, body) = send(
            &app,
            post("/api/tasks/%20/assign", r#"{"agentId":"agent-a"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_TASK_ID");
    }

    #[tokio::test]
    async fn not_found_and_precondition_statuses() {
        let (app, db) = setup_app();

        let (status, _, body) =
            send(&app, post("/api/tasks/nope/assign", r#"{"agentId":"agent-a"}"#)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "TASK_NOT_FOUND");

        db.set_task_status("t-1", TaskStatus::Done).unwrap();
        let (status, _, body) =
            send(&app, post("/api/tasks/t-1/assign", r#"{"agentId":"agent-a"}"#)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "TERMINAL_TASK");
        assert!(body["error"]["message"].is_string());
    }

    #[tokio::test]
    async fn idempotent_retry_replays_with_header() {
        let (app, db) = setup_app();
        let payload = r#"{"agentId":"agent-a","reason":"retry"}"#;

        let (status, headers, first) =
            send(&app, post_with_key("/api/tasks/t-1/assign", "req-1", payload)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.get(REPLAY_HEADER).is_none());

        let (status, headers, second) =
            send(&app, post_with_key("/api/tasks/t-1/assign", "req-1", payload)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            headers.get(REPLAY_HEADER).and_then(|v| v.to_str().ok()),
            Some("true")
        );
        assert_eq!(second, first);

        assert_eq!(db.get_task("t-1").unwrap().unwrap().version, 1);
        assert_eq!(db.count_assignment_events("t-1").unwrap(), 1);
    }

    #[tokio::test]
    async fn reused_key_with_other_payload_conflicts() {
        let (app, db) = setup_app();

        send(
            &app,
            post_with_key("/api/tasks/t-1/assign", "req-1", r#"{"agentId":"agent-a"}"#),
        )
        .await;
        let (status, _, body) = send(
            &app,
            post_with_key("/api/tasks/t-1/assign", "req-1", r#"{"agentId":"agent-b"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(
            body["error"]["code"],
            "IDEMPOTENCY_KEY_REUSED_WITH_DIFFERENT_REQUEST"
        );
        assert_eq!(
            db.get_task("t-1").unwrap().unwrap().assignee_id.as_deref(),
            Some("agent-a")
        );
    }

    #[tokio::test]
    async fn oversized_idempotency_key_is_rejected() {
        let (app, db) = setup_app();
        let key = "k".repeat(257);

        let (status, _, body) = send(
            &app,
            post_with_key("/api/tasks/t-1/assign", &key, r#"{"agentId":"agent-a"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(db.get_task("t-1").unwrap().unwrap().version, 0);
    }
}

mod unassign_route_tests {
    use super::*;

    #[tokio::test]
    async fn empty_body_unassigns_then_404s() {
        let (app, _db) = setup_app();
        send(&app, post("/api/tasks/t-1/assign", r#"{"agentId":"agent-a"}"#)).await;

        let (status, _, body) = send(&app, post("/api/tasks/t-1/unassign", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["unassigned"], true);
        assert_eq!(body["task"]["status"], "TO_DO");
        assert!(body["task"]["assigneeId"].is_null());
        assert_eq!(body["task"]["version"], 2);

        let (status, _, body) = send(&app, post("/api/tasks/t-1/unassign", "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NO_ACTIVE_ASSIGNMENT");
    }

    #[tokio::test]
    async fn unassign_validates_parsed_body() {
        let (app, _db) = setup_app();
        let (status, _, body) = send(
            &app,
            post("/api/tasks/t-1/unassign", r#"{"expectedVersion":-4}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["details"]["field"], "expectedVersion");
    }
}

mod list_route_tests {
    use super::*;

    #[tokio::test]
    async fn lists_newest_first_with_cursor() {
        let (app, _db) = setup_app();
        for agent in ["agent-a", "agent-b", "agent-a"] {
            let body = json!({ "agentId": agent }).to_string();
            send(&app, post("/api/tasks/t-1/assign", &body)).await;
        }

        let (status, _, page) = send(&app, get("/api/tasks/t-1/assignments?limit=2")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["taskId"], "t-1");
        assert_eq!(page["page"]["limit"], 2);
        assert_eq!(page["data"].as_array().unwrap().len(), 2);
        let cursor = page["page"]["nextCursor"].as_str().unwrap().to_string();

        let (status, _, rest) = send(
            &app,
            get(&format!("/api/tasks/t-1/assignments?limit=2&cursor={}", cursor)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rest["data"].as_array().unwrap().len(), 1);
        assert!(rest["page"]["nextCursor"].is_null());
    }

    #[tokio::test]
    async fn default_limit_and_agent_summary() {
        let (app, _db) = setup_app();
        send(&app, post("/api/tasks/t-1/assign", r#"{"agentId":"agent-a"}"#)).await;

        let (status, _, page) = send(&app, get("/api/tasks/t-1/assignments")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["page"]["limit"], 50);
        assert_eq!(page["data"][0]["agent"]["id"], "agent-a");
        assert_eq!(page["data"][0]["agent"]["name"], "Ada");
    }

    #[tokio::test]
    async fn bad_queries_and_unknown_tasks() {
        let (app, _db) = setup_app();

        for uri in [
            "/api/tasks/t-1/assignments?limit=0",
            "/api/tasks/t-1/assignments?limit=201",
            "/api/tasks/t-1/assignments?limit=abc",
            "/api/tasks/t-1/assignments?cursor=missing",
        ] {
            let (status, _, body) = send(&app, get(uri)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "uri {}", uri);
            assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        }

        let (status, _, body) = send(&app, get("/api/tasks/ghost/assignments")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "TASK_NOT_FOUND");
    }
}
