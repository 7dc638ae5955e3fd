//! End-to-end tests for the HTTP surface.
//!
//! Each test builds a fresh store and request log under a temp directory,
//! seeds principals directly, then drives the router through axum-test.

use std::sync::Arc;

use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderValue, StatusCode};
use axum_test::{TestRequest, TestServer};
use serde_json::{json, Value};
use tempfile::TempDir;

use fieldops_lib::api::{build_router, AppState};
use fieldops_lib::config::Config;
use fieldops_lib::db::identity::{NewPromoter, TOKEN_OWNER_PROMOTER, TOKEN_OWNER_USER};
use fieldops_lib::db::FieldDb;
use fieldops_lib::request_log::RequestLog;
use fieldops_lib::services::auth::{hash_password, issue_token};

struct Harness {
    server: TestServer,
    state: Arc<AppState>,
    _dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = FieldDb::open_at(dir.path().join("fieldops.db")).expect("open store");
        let state = Arc::new(AppState::new(
            db,
            Config::default(),
            RequestLog::new(dir.path().join("logs")),
        ));
        let server = TestServer::new(build_router(state.clone())).expect("test server");
        Self {
            server,
            state,
            _dir: dir,
        }
    }

    fn db<T>(&self, f: impl FnOnce(&FieldDb) -> T) -> T {
        let guard = self.state.db.lock();
        f(&guard)
    }

    /// Admin holding `role`, scoped to `states` (empty means unrestricted).
    fn admin_token(&self, email: &str, role: &str, states: &[&str]) -> String {
        self.db(|db| {
            let id = db.create_user("Admin", email, "x", "active").unwrap();
            let role = db.get_role_by_name(role).unwrap().unwrap();
            db.attach_role_to_user(id, role.id).unwrap();
            let states: Vec<String> = states.iter().map(|s| s.to_string()).collect();
            db.sync_user_states(id, &states).unwrap();
            issue_token(db, TOKEN_OWNER_USER, id, "test").unwrap()
        })
    }

    fn promoter(&self, username: &str, state: &str) -> (i64, String) {
        self.db(|db| {
            let id = db
                .create_promoter(&NewPromoter {
                    name: "Field Promoter",
                    username,
                    phone: None,
                    password_hash: "x",
                    state: Some(state),
                    district: None,
                    status: "active",
                })
                .unwrap();
            let token = issue_token(db, TOKEN_OWNER_PROMOTER, id, "test").unwrap();
            (id, token)
        })
    }
}

fn bearer(request: TestRequest, token: &str) -> TestRequest {
    request.add_header(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
    )
}

fn recce(local_id: &str, state: &str) -> Value {
    json!({
        "local_id": local_id,
        "plan_id": 0,
        "visit_date": "2025-03-01",
        "latitude": "12.9716",
        "longitude": 77.5946,
        "location": "MG Road",
        "state": state,
        "district": "Bengaluru",
        "width": 10,
        "height": 4,
        "photos": ["recce/a.jpg"],
    })
}

#[tokio::test]
async fn test_health_is_public() {
    let h = Harness::new();
    let response = h.server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_admin_login_then_me_then_logout() {
    let h = Harness::new();
    h.db(|db| {
        let hash = hash_password("correct-horse").unwrap();
        let id = db
            .create_user("Ops", "ops@example.com", &hash, "active")
            .unwrap();
        let role = db.get_role_by_name("super_admin").unwrap().unwrap();
        db.attach_role_to_user(id, role.id).unwrap();
    });

    let bad = h
        .server
        .post("/auth/login")
        .json(&json!({ "email": "ops@example.com", "password": "wrong-pass" }))
        .await;
    bad.assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    let login = h
        .server
        .post("/auth/login")
        .json(&json!({ "email": "ops@example.com", "password": "correct-horse" }))
        .await;
    login.assert_status_ok();
    let body: Value = login.json();
    let token = body["token"].as_str().unwrap().to_string();
    assert_eq!(body["token_type"], "Bearer");

    let me = bearer(h.server.get("/me"), &token).await;
    me.assert_status_ok();
    let me: Value = me.json();
    assert_eq!(me["all_states"], true);
    assert!(me["permissions"]
        .as_array()
        .unwrap()
        .iter()
        .any(|p| p == "dashboard.view"));

    bearer(h.server.post("/auth/logout"), &token)
        .await
        .assert_status_ok();
    bearer(h.server.get("/me"), &token)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_missing_or_unknown_token_is_401() {
    let h = Harness::new();
    h.server
        .get("/activities")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    bearer(h.server.get("/activities"), "not-a-real-token")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_promoter_cannot_reach_admin_routes() {
    let h = Harness::new();
    let (_, token) = h.promoter("ravi", "Karnataka");
    bearer(h.server.get("/activities"), &token)
        .await
        .assert_status(StatusCode::FORBIDDEN);
    bearer(h.server.get("/dashboard/analytics"), &token)
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_mobile_submit_then_resubmit_updates() {
    let h = Harness::new();
    let (_, token) = h.promoter("ravi", "Karnataka");

    let created = bearer(h.server.post("/mobile/activities"), &token)
        .json(&recce("m-1", "Karnataka"))
        .await;
    created.assert_status(StatusCode::CREATED);
    let body: Value = created.json();
    assert_eq!(body["status"], "success");
    assert_eq!(body["is_update"], false);
    let id = body["data"]["id"].as_i64().unwrap();

    let mut again = recce("m-1", "Karnataka");
    again["location"] = json!("Brigade Road");
    let updated = bearer(h.server.post("/mobile/activities"), &token)
        .json(&again)
        .await;
    updated.assert_status_ok();
    let body: Value = updated.json();
    assert_eq!(body["is_update"], true);
    assert_eq!(body["data"]["id"].as_i64().unwrap(), id);
    assert_eq!(body["data"]["location"], "Brigade Road");
}

#[tokio::test]
async fn test_mobile_bulk_reports_mixed_results() {
    let h = Harness::new();
    let (_, token) = h.promoter("ravi", "Karnataka");

    let mut invalid = recce("b-2", "Karnataka");
    invalid["latitude"] = json!(120);
    let response = bearer(h.server.post("/mobile/activities/bulk"), &token)
        .json(&json!({ "activities": [recce("b-1", "Karnataka"), invalid] }))
        .await;
    response.assert_status(StatusCode::MULTI_STATUS);
    let body: Value = response.json();
    assert_eq!(body["status"], "mixed");
    assert_eq!(body["success_count"], 1);
    assert_eq!(body["error_count"], 1);
    assert_eq!(body["results"][1]["local_id"], "b-2");
}

#[tokio::test]
async fn test_out_of_scope_activity_is_404() {
    let h = Harness::new();
    let (_, promoter_token) = h.promoter("ravi", "Karnataka");
    let created = bearer(h.server.post("/mobile/activities"), &promoter_token)
        .json(&recce("s-1", "Karnataka"))
        .await;
    let id = created.json::<Value>()["data"]["id"].as_i64().unwrap();

    let goa_viewer = h.db(|db| {
        let role_id = db.create_role("goa_viewer", None, None).unwrap();
        let view = db
            .get_permission_by_name("activity_recce.view")
            .unwrap()
            .unwrap();
        db.attach_permission_to_role(role_id, view.id).unwrap();
        let id = db
            .create_user("Goa", "goa@example.com", "x", "active")
            .unwrap();
        db.attach_role_to_user(id, role_id).unwrap();
        db.sync_user_states(id, &["Goa".to_string()]).unwrap();
        issue_token(db, TOKEN_OWNER_USER, id, "test").unwrap()
    });
    bearer(h.server.get(&format!("/activities/{id}")), &goa_viewer)
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let admin = h.admin_token("root@example.com", "super_admin", &[]);
    let shown = bearer(h.server.get(&format!("/activities/{id}")), &admin).await;
    shown.assert_status_ok();
    assert_eq!(shown.json::<Value>()["state"], "Karnataka");
}

#[tokio::test]
async fn test_missing_permission_is_403() {
    let h = Harness::new();
    let token = h.db(|db| {
        let id = db
            .create_user("Nobody", "nobody@example.com", "x", "active")
            .unwrap();
        issue_token(db, TOKEN_OWNER_USER, id, "test").unwrap()
    });
    bearer(h.server.get("/roles"), &token)
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_dashboard_counts_scoped_recces() {
    let h = Harness::new();
    let (_, karnataka) = h.promoter("ravi", "Karnataka");
    let (_, goa) = h.promoter("anita", "Goa");
    for (token, local_id, state, location) in [
        (&karnataka, "d-1", "Karnataka", "MG Road"),
        (&karnataka, "d-2", "Karnataka", "Church Street"),
        (&goa, "d-3", "Goa", "Panjim Market"),
    ] {
        let mut item = recce(local_id, state);
        item["location"] = json!(location);
        bearer(h.server.post("/mobile/activities"), token)
            .json(&item)
            .await
            .assert_status(StatusCode::CREATED);
    }

    let admin = h.admin_token("root@example.com", "admin", &[]);
    let response = bearer(h.server.get("/dashboard/analytics"), &admin)
        .add_query_param("start_date", "2025-02-20")
        .add_query_param("end_date", "2025-03-10")
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["totals"]["total"], 3);
    assert_eq!(body["granularity"], "daily");

    let goa_viewer = h.db(|db| {
        let role_id = db.create_role("goa_dashboard", None, None).unwrap();
        let view = db.get_permission_by_name("dashboard.view").unwrap().unwrap();
        db.attach_permission_to_role(role_id, view.id).unwrap();
        let id = db
            .create_user("Goa", "goa@example.com", "x", "active")
            .unwrap();
        db.attach_role_to_user(id, role_id).unwrap();
        db.sync_user_states(id, &["Goa".to_string()]).unwrap();
        issue_token(db, TOKEN_OWNER_USER, id, "test").unwrap()
    });
    let scoped = bearer(h.server.get("/dashboard/analytics"), &goa_viewer)
        .add_query_param("start_date", "2025-02-20")
        .add_query_param("end_date", "2025-03-10")
        .await;
    scoped.assert_status_ok();
    assert_eq!(scoped.json::<Value>()["totals"]["total"], 1);

    let reversed = bearer(h.server.get("/dashboard/analytics"), &admin)
        .add_query_param("start_date", "2025-03-10")
        .add_query_param("end_date", "2025-02-20")
        .await;
    reversed.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
}
