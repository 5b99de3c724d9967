use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

use crate::AppState;
use crate::auth::caller_identity_middleware;
use crate::handlers::{admins, bindings, profiles};
use crate::request_id::request_id_middleware;

/// `<base path>/v1`, always with a single leading slash.
pub fn api_prefix(base_path: &str) -> String {
    let base = base_path.trim_matches('/');
    if base.is_empty() {
        "/v1".to_string()
    } else {
        format!("/{}/v1", base)
    }
}

pub fn router(state: AppState) -> Router {
    let prefix = api_prefix(&state.access.config().base_path);

    let v1 = Router::new()
        .route("/role/clusteradmin", get(admins::is_cluster_admin))
        .route(
            "/bindings",
            get(bindings::read_bindings)
                .post(bindings::add_contributor)
                .delete(bindings::remove_contributor),
        )
        .route("/profiles", post(profiles::create_profile))
        .route("/profiles/{name}", delete(profiles::remove_profile))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            caller_identity_middleware,
        ));

    Router::new()
        .nest(&prefix, v1)
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Serve the access API until `shutdown` resolves.
pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let prefix = api_prefix(&state.access.config().base_path);
    let app = router(state);

    info!("Starting access API on {} under {}", addr, prefix);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Access API stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessManager;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use pkg_state::Registry;
    use pkg_types::config::ManagerConfig;
    use pkg_types::meta::{ObjectKey, set_controller_reference};
    use pkg_types::namespace::Namespace;
    use pkg_types::profile::Profile;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    const OWNER: &str = "starlord@guardians.net";

    async fn app() -> (Registry, Router) {
        let registry = Registry::in_memory().await.unwrap();
        let config = ManagerConfig {
            cluster_admins: ["admin@guardians.net".to_string()].into(),
            userid_prefix: "accounts.google.com:".into(),
            ..Default::default()
        };
        let state = AppState {
            access: Arc::new(AccessManager::new(registry.clone(), Arc::new(config))),
        };
        (registry, router(state))
    }

    fn request(method: &str, uri: &str, caller: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(caller) = caller {
            builder = builder.header("kubeflow-userid", format!("accounts.google.com:{}", caller));
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    /// Stand in for the profile controller: give the profile its namespace.
    async fn provision(registry: &Registry, name: &str) {
        let profile: Profile = registry.get(&ObjectKey::cluster(name)).await.unwrap();
        let mut ns = Namespace::new(name);
        set_controller_reference(&profile, &mut ns).unwrap();
        registry.create(ns).await.unwrap();
    }

    fn profile_body(name: &str, owner: &str) -> Value {
        json!({
            "metadata": {"name": name},
            "spec": {"owner": {"kind": "User", "name": owner}}
        })
    }

    fn binding_body(user: &str, namespace: &str) -> Value {
        json!({
            "user": {"kind": "User", "name": user},
            "referredNamespace": namespace,
            "RoleRef": {"kind": "ClusterRole", "name": "edit"}
        })
    }

    #[test]
    fn api_prefix_normalizes_base_path() {
        assert_eq!(api_prefix("/kfam"), "/kfam/v1");
        assert_eq!(api_prefix("kfam/"), "/kfam/v1");
        assert_eq!(api_prefix(""), "/v1");
        assert_eq!(api_prefix("/"), "/v1");
    }

    #[tokio::test]
    async fn cluster_admin_query() {
        let (_, app) = app().await;
        let (status, body) = send(
            &app,
            request("GET", "/kfam/v1/role/clusteradmin?user=admin@guardians.net", None, None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"true");

        let (status, body) = send(
            &app,
            request("GET", "/kfam/v1/role/clusteradmin?user=gamora@guardians.net", None, None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"false");

        let (status, body) =
            send(&app, request("GET", "/kfam/v1/role/clusteradmin", None, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "missing required param 'user'");
    }

    #[tokio::test]
    async fn responses_carry_request_id() {
        let (_, app) = app().await;
        let resp = app
            .oneshot(request("GET", "/kfam/v1/role/clusteradmin?user=x", None, None))
            .await
            .unwrap();
        let id = resp.headers().get("x-request-id").unwrap().to_str().unwrap();
        assert_eq!(id.len(), 36);
    }

    #[tokio::test]
    async fn create_profile_statuses() {
        let (registry, app) = app().await;
        let (status, body) = send(
            &app,
            request("POST", "/kfam/v1/profiles", None, Some(profile_body("starlord", OWNER))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let created: Profile = serde_json::from_slice(&body).unwrap();
        assert!(!created.metadata.uid.is_empty());
        assert!(
            registry
                .get::<Profile>(&ObjectKey::cluster("starlord"))
                .await
                .is_ok()
        );

        let (status, _) = send(
            &app,
            request("POST", "/kfam/v1/profiles", None, Some(profile_body("starlord", OWNER))),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(
            &app,
            request("POST", "/kfam/v1/profiles", None, Some(profile_body("Star_Lord", OWNER))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let malformed = Request::builder()
            .method("POST")
            .uri("/kfam/v1/profiles")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _) = send(&app, malformed).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            request("POST", "/kfam/v1/profiles", None, Some(json!({"spec": 42}))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn remove_profile_requires_admin() {
        let (registry, app) = app().await;
        send(
            &app,
            request("POST", "/kfam/v1/profiles", None, Some(profile_body("starlord", OWNER))),
        )
        .await;

        let (status, _) = send(
            &app,
            request("DELETE", "/kfam/v1/profiles/starlord", Some("mallory@example.com"), None),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(
            registry
                .get::<Profile>(&ObjectKey::cluster("starlord"))
                .await
                .is_ok()
        );

        let (status, _) =
            send(&app, request("DELETE", "/kfam/v1/profiles/starlord", None, None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            &app,
            request("DELETE", "/kfam/v1/profiles/starlord", Some(OWNER), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(
            registry
                .get::<Profile>(&ObjectKey::cluster("starlord"))
                .await
                .unwrap_err()
                .is_not_found()
        );

        let (status, _) = send(
            &app,
            request("DELETE", "/kfam/v1/profiles/starlord", Some(OWNER), None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn manages_contributors() {
        let (registry, app) = app().await;
        send(
            &app,
            request("POST", "/kfam/v1/profiles", None, Some(profile_body("starlord", OWNER))),
        )
        .await;
        provision(&registry, "starlord").await;

        let (status, _) = send(
            &app,
            request(
                "POST",
                "/kfam/v1/bindings",
                Some("drax@guardians.net"),
                Some(binding_body("gamora@guardians.net", "starlord")),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(
            &app,
            request(
                "POST",
                "/kfam/v1/bindings",
                Some(OWNER),
                Some(binding_body("gamora@guardians.net", "starlord")),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["message"], "Added Contributor");

        let (status, body) = send(
            &app,
            request(
                "GET",
                "/kfam/v1/bindings?namespace=starlord&user=gamora@guardians.net",
                None,
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        let bindings = body["bindings"].as_array().unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0]["user"]["name"], "gamora@guardians.net");
        assert_eq!(bindings[0]["referredNamespace"], "starlord");
        assert_eq!(bindings[0]["RoleRef"]["name"], "edit");

        let (status, _) = send(
            &app,
            request(
                "POST",
                "/kfam/v1/bindings",
                Some(OWNER),
                Some(json!({
                    "user": {"kind": "Group", "name": "guardians"},
                    "referredNamespace": "starlord"
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            request(
                "DELETE",
                "/kfam/v1/bindings",
                Some(OWNER),
                Some(binding_body("gamora@guardians.net", "starlord")),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["message"], "Removed Contributor");

        let (_, body) = send(
            &app,
            request("GET", "/kfam/v1/bindings?namespace=starlord", None, None),
        )
        .await;
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert!(body["bindings"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_contributor_refused_outside_managed_namespace() {
        let (registry, app) = app().await;
        let mut system = Namespace::new("kube-system");
        system.metadata.add_annotation("owner", "root");
        registry.create(system).await.unwrap();
        send(
            &app,
            request(
                "POST",
                "/kfam/v1/profiles",
                None,
                Some(profile_body("kube-system", "mallory@evil.io")),
            ),
        )
        .await;

        let (status, body) = send(
            &app,
            request(
                "POST",
                "/kfam/v1/bindings",
                Some("mallory@evil.io"),
                Some(binding_body("mallory@evil.io", "kube-system")),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            body["error"],
            "namespace kube-system is not managed by profile kube-system"
        );

        let (status, _) = send(
            &app,
            request(
                "POST",
                "/kfam/v1/bindings",
                Some("mallory@evil.io"),
                Some(binding_body("a/b@evil.io", "kube-system")),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn binding_ops_on_missing_profile_are_not_found() {
        let (_, app) = app().await;
        let (status, _) = send(
            &app,
            request(
                "DELETE",
                "/kfam/v1/bindings",
                Some("admin@guardians.net"),
                Some(binding_body("gamora@guardians.net", "nowhere")),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
