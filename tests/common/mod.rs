//! Helpers shared by the HTTP-level integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use chrono::{Timelike, Utc};
use serde_json::Value;
use tower::ServiceExt;

use keygate::config::Config;
use keygate::AppState;

pub const ADMIN_KEY: &str = "admin-test-key";

pub struct TestApp {
    pub state: Arc<AppState>,
    pub router: Router,
}

pub fn app() -> TestApp {
    let config = Config {
        admin_key: Some(ADMIN_KEY.into()),
        session_secret: "integration-test-session-secret-0123456789".into(),
        ..Default::default()
    };
    let state = AppState::in_memory(config).unwrap();
    TestApp {
        router: keygate::api::router(state.clone()),
        state,
    }
}

impl TestApp {
    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(req).await.unwrap()
    }

    /// Mint a dashboard session through the bootstrap endpoint.
    pub async fn session(&self, principal: &str) -> String {
        let res = self
            .send(
                Request::post("/auth/session")
                    .header("x-admin-key", ADMIN_KEY)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        serde_json::json!({ "principal_id": principal }).to_string(),
                    ))
                    .unwrap(),
            )
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        body_json(res).await["token"].as_str().unwrap().to_string()
    }

    /// Create a credential via the management API; returns the response body.
    pub async fn create_credential(&self, session: &str, body: Value) -> Value {
        let res = self
            .send(
                Request::post("/api/v1/credentials")
                    .header(header::AUTHORIZATION, format!("Bearer {}", session))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        body_json(res).await
    }
}

pub fn authorize(secret: &str, body: Value) -> Request<Body> {
    Request::post("/v1/authorize")
        .header(header::AUTHORIZATION, format!("Bearer {}", secret))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_json(res: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(res.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Rate-limit windows are aligned to the wall clock. Tests that count
/// requests in one window wait out the last few seconds of a minute.
pub async fn avoid_window_edge() {
    let second = Utc::now().second();
    if second >= 55 {
        tokio::time::sleep(std::time::Duration::from_secs(u64::from(61 - second))).await;
    }
}
