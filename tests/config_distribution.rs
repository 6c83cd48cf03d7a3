//! Config distribution through the HTTP surface: system registration,
//! credentialed pulls, and the prefix-free payload contract.

mod common;

use axum::http::StatusCode;
use serde_json::Value;

use common::{harness, json_body};

#[tokio::test]
async fn registered_system_pulls_a_prefix_free_payload() {
    let h = harness();
    let acme = h
        .systems
        .register("acme", "Acme CRM", "", "https://acme.test")
        .await
        .unwrap();

    let editor = h
        .rbac
        .create_role("acme", "editor", "Editor", None, "")
        .await
        .unwrap();
    let read = h
        .rbac
        .create_permission("acme", "doc:read", "Read docs", None, "doc", "read", "")
        .await
        .unwrap();
    h.rbac
        .set_role_permissions(editor.id, &[read.id])
        .await
        .unwrap();
    h.rbac
        .create_role("global", "admin", "Admin", None, "")
        .await
        .unwrap();

    let response = h
        .get_with_header("/systems/acme/config", "x-system-token", &acme.credential)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let payload = json_body(response).await;

    assert_eq!(payload["namespace"], "acme");
    assert!(payload["version"].as_str().unwrap().starts_with("vacme_"));

    // only the system's own namespace slice, keyed by local code
    let roles = payload["roles"].as_object().unwrap();
    assert_eq!(roles.len(), 1);
    assert_eq!(
        roles["editor"]["permissions"],
        serde_json::json!(["doc:read"])
    );
    // global policy rides in user tokens, not in the config payload
    assert!(!roles.contains_key("admin"));

    let permissions = payload["permissions"].as_object().unwrap();
    assert_eq!(permissions["doc:read"]["action"], "read");
    // the namespace convention never leaks to the consumer
    assert!(roles.keys().all(|c| !c.contains("acme:")));
    assert!(permissions.keys().all(|c| !c.contains("acme:")));
}

#[tokio::test]
async fn config_pull_requires_a_matching_system_token() {
    let h = harness();
    let acme = h.systems.register("acme", "Acme", "", "").await.unwrap();
    h.systems.register("other", "Other", "", "").await.unwrap();

    // no token
    let response = h.get("/systems/acme/config").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // a valid token for a different system
    let other = h.systems.get("other").await.unwrap();
    let response = h
        .get_with_header("/systems/acme/config", "x-system-token", &other.credential)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // a user token of any kind
    let user_tokens = h.login().await;
    let response = h
        .get_with_header(
            "/systems/acme/config",
            "x-system-token",
            user_tokens["access_token"].as_str().unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // the right credential still works
    let response = h
        .get_with_header("/systems/acme/config", "x-system-token", &acme.credential)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn rotated_credential_locks_out_the_old_one() {
    let h = harness();
    let before = h.systems.register("acme", "Acme", "", "").await.unwrap();
    let after = h.systems.rotate_credential("acme").await.unwrap();

    let old = h
        .get_with_header("/systems/acme/config", "x-system-token", &before.credential)
        .await;
    assert_eq!(old.status(), StatusCode::UNAUTHORIZED);

    let new = h
        .get_with_header("/systems/acme/config", "x-system-token", &after.credential)
        .await;
    assert_eq!(new.status(), StatusCode::OK);
}

#[tokio::test]
async fn route_patterns_ship_priority_ordered_with_local_role_codes() {
    let h = harness();
    let acme = h.systems.register("acme", "Acme", "", "").await.unwrap();
    let editor = h
        .rbac
        .create_role("acme", "editor", "Editor", None, "")
        .await
        .unwrap();
    h.rbac
        .create_route_pattern("acme", editor.id, "^/docs/.*$", "GET", 1, "")
        .await
        .unwrap();
    h.rbac
        .create_route_pattern("acme", editor.id, "^/docs/admin/.*$", "*", 10, "")
        .await
        .unwrap();

    let response = h
        .get_with_header("/systems/acme/config", "x-system-token", &acme.credential)
        .await;
    let payload = json_body(response).await;

    let routes = payload["route_patterns"].as_array().unwrap();
    let priorities: Vec<i64> = routes
        .iter()
        .map(|r| r["priority"].as_i64().unwrap())
        .collect();
    assert_eq!(priorities, vec![10, 1]);
    assert!(routes.iter().all(|r| r["role"] == "editor"));
}

#[tokio::test]
async fn unknown_system_is_not_found_even_with_forged_subject() {
    let h = harness();
    // mint a system token for a code that was never registered
    let issued = h.tokens.issue_system_token("ghost", "Ghost", 1).unwrap();

    let response = h
        .get_with_header("/systems/ghost/config", "x-system-token", &issued.token)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let h = harness();
    let response = h.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = json_body(response).await;
    assert_eq!(body["status"], "ok");
}
