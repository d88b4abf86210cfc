use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::api::rest::{handlers, logging_middleware::request_logging_middleware};
use crate::shared::models::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/version", get(version))
        .route("/health", get(health));

    // Sandbox lifecycle, exec and diff
    let sandbox_routes = Router::new()
        .route("/sandboxes", post(handlers::sandboxes::create_sandbox))
        .route(
            "/sandboxes/cleanup",
            post(handlers::sandboxes::cleanup_sandbox),
        )
        .route("/sandboxes/exec", post(handlers::sandboxes::exec_command))
        .route("/sandboxes/diff", post(handlers::sandboxes::get_diff));

    let file_routes = Router::new()
        .route("/files/read", post(handlers::files::read_file))
        .route("/files/write", post(handlers::files::write_file))
        .route("/files/list", post(handlers::files::list_files))
        .route("/files/delete", post(handlers::files::delete_file))
        .route("/files/rename", post(handlers::files::rename_file));

    let browser_routes = Router::new()
        .route(
            "/browser/screenshot",
            post(handlers::browser::screenshot),
        )
        .route("/browser/extract", post(handlers::browser::extract));

    let api_routes = public_routes
        .merge(sandbox_routes)
        .merge(file_routes)
        .merge(browser_routes)
        .with_state(state);

    Router::new()
        .nest("/api/v0", api_routes)
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(TraceLayer::new_for_http())
}

async fn version() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "api": "v0"
    }))
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{
        BrowserBackend, BrowserCredentials, BrowserError, BrowserPage, HostResolver,
        RemoteBrowserSession,
    };
    use crate::controller::LocalPlatform;
    use crate::sandbox::SandboxPlatform;
    use crate::shared::config::{CloneConfig, GatewayConfig};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::net::IpAddr;
    use std::path::{Path, PathBuf};
    use std::process::Command;
    use tower::ServiceExt;

    struct UnreachableBackend;

    #[async_trait]
    impl BrowserBackend for UnreachableBackend {
        async fn create_session(
            &self,
            _credentials: &BrowserCredentials,
        ) -> Result<RemoteBrowserSession, BrowserError> {
            Err(BrowserError::Execution("no browser in tests".to_string()))
        }

        async fn release_session(
            &self,
            _credentials: &BrowserCredentials,
            _session_id: &str,
        ) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn open_page(
            &self,
            _connect_url: &str,
        ) -> Result<Box<dyn BrowserPage>, BrowserError> {
            Err(BrowserError::Execution("no browser in tests".to_string()))
        }
    }

    struct LoopbackResolver;

    #[async_trait]
    impl HostResolver for LoopbackResolver {
        async fn resolve(&self, _host: &str, _port: u16) -> std::io::Result<Vec<IpAddr>> {
            Ok(vec!["127.0.0.1".parse().unwrap()])
        }
    }

    struct TestApp {
        _dir: tempfile::TempDir,
        sandboxes: PathBuf,
        router: Router,
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    fn app() -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let seed = dir.path().join("seed");
        let remotes = dir.path().join("remotes");
        std::fs::create_dir_all(&seed).unwrap();
        std::fs::create_dir_all(remotes.join("acme")).unwrap();
        git(&seed, &["init", "-q"]);
        git(&seed, &["checkout", "-q", "-b", "main"]);
        git(&seed, &["config", "user.name", "Seed"]);
        git(&seed, &["config", "user.email", "seed@example.com"]);
        std::fs::write(seed.join("README.md"), "hello\n").unwrap();
        git(&seed, &["add", "-A"]);
        git(&seed, &["commit", "-q", "-m", "init"]);
        let status = Command::new("git")
            .args(["clone", "-q", "--bare"])
            .arg(&seed)
            .arg(remotes.join("acme").join("app.git"))
            .status()
            .unwrap();
        assert!(status.success());

        let sandboxes = dir.path().join("sandboxes");
        let config = GatewayConfig {
            clone: CloneConfig {
                base_url: format!("file://{}", remotes.display()),
                ..CloneConfig::default()
            },
            ..GatewayConfig::default()
        };
        let platform: Arc<dyn SandboxPlatform> =
            Arc::new(LocalPlatform::new(sandboxes.clone(), 30));
        let state = AppState::new(
            Arc::new(config),
            platform,
            Arc::new(UnreachableBackend),
            Arc::new(LoopbackResolver),
            reqwest::Client::new(),
        );

        TestApp {
            _dir: dir,
            sandboxes,
            router: create_router(Arc::new(state)),
        }
    }

    async fn post(router: &Router, path: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(format!("/api/v0{path}"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn create(app: &TestApp) -> (String, String) {
        let (status, body) = post(&app.router, "/sandboxes", json!({ "repo": "acme/app" })).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["status"], "ready");
        (
            body["sandbox_id"].as_str().unwrap().to_string(),
            body["owner_token"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn version_and_health() {
        let app = app();
        let request = Request::builder()
            .uri("/api/v0/health")
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let request = Request::builder()
            .uri("/api/v0/version")
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn full_session_workflow() {
        let app = app();
        let (id, token) = create(&app).await;
        let auth = |extra: Value| {
            let mut body = json!({ "sandbox_id": id, "owner_token": token });
            if let (Some(b), Some(e)) = (body.as_object_mut(), extra.as_object()) {
                b.extend(e.clone());
            }
            body
        };

        let (status, body) = post(&app.router, "/sandboxes/diff", auth(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["git_status"], "clean");
        assert_eq!(body["diff"], "");

        let content = "it's\n\"quoted\"\n\ttabs\u{1}\n";
        let (status, body) = post(
            &app.router,
            "/files/write",
            auth(json!({ "path": "src/notes.txt", "content": content })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["ok"], json!(true));
        assert_eq!(body["bytes_written"], json!(content.len()));

        let (status, body) = post(
            &app.router,
            "/files/read",
            auth(json!({ "path": "src/notes.txt" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["content"], content);
        assert_eq!(body["truncated"], json!(false));

        let (status, body) = post(&app.router, "/files/list", auth(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec![".git", "src", "README.md"]);

        let (status, body) = post(
            &app.router,
            "/sandboxes/exec",
            auth(json!({ "command": "cat src/notes.txt | wc -l; exit 3" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["exit_code"], json!(3));
        assert_eq!(body["stdout"].as_str().unwrap().trim(), "3");
        assert_eq!(body["truncated"], json!(false));

        let (status, body) = post(
            &app.router,
            "/files/rename",
            auth(json!({ "old_path": "src/notes.txt", "new_path": "docs/notes.txt" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");

        let (status, body) = post(&app.router, "/sandboxes/diff", auth(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["diff"].as_str().unwrap().contains("docs/notes.txt"));

        let workspace = app.sandboxes.join(&id).join("workspace");
        let (status, body) = post(
            &app.router,
            "/files/delete",
            auth(json!({ "path": workspace.to_string_lossy() })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["ok"], json!(false));
        assert!(workspace.join("README.md").exists());

        let (status, _) = post(&app.router, "/files/delete", auth(json!({ "path": "docs" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!workspace.join("docs").exists());

        let (status, body) = post(&app.router, "/sandboxes/cleanup", auth(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], json!(true));
        assert!(!app.sandboxes.join(&id).exists());
    }

    #[tokio::test]
    async fn bad_token_has_no_side_effects() {
        let app = app();
        let (id, token) = create(&app).await;
        let marker = app.sandboxes.join(&id).join("workspace").join("pwned");

        let (status, body) = post(
            &app.router,
            "/sandboxes/exec",
            json!({ "sandbox_id": id, "owner_token": "nope", "command": "touch pwned" }),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["ok"], json!(false));
        assert!(!marker.exists());

        let (status, _) = post(
            &app.router,
            "/sandboxes/exec",
            json!({ "sandbox_id": id, "command": "touch pwned" }),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(!marker.exists());

        let (status, _) = post(
            &app.router,
            "/sandboxes/cleanup",
            json!({ "sandbox_id": id, "owner_token": format!("{token}x") }),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(app.sandboxes.join(&id).exists());
    }

    #[tokio::test]
    async fn missing_parameters_and_unknown_sandboxes() {
        let app = app();

        let (status, body) = post(&app.router, "/sandboxes", json!({ "repo": "" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "MISSING_PARAMETER");

        let (status, body) = post(
            &app.router,
            "/files/read",
            json!({ "sandbox_id": uuid::Uuid::new_v4().to_string(), "owner_token": "t", "path": "x" }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "SANDBOX_NOT_FOUND");

        let (id, token) = create(&app).await;
        let (status, body) = post(
            &app.router,
            "/files/read",
            json!({ "sandbox_id": id, "owner_token": token, "path": "missing.txt" }),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["content"], "");
        assert!(!body["error"].as_str().unwrap().is_empty());

        let (status, body) = post(
            &app.router,
            "/files/list",
            json!({ "sandbox_id": id, "owner_token": token, "path": "nowhere" }),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["entries"], json!([]));

        let (status, body) = post(
            &app.router,
            "/files/write",
            json!({ "sandbox_id": id, "owner_token": token, "path": "a.txt" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "MISSING_PARAMETER");
    }

    #[tokio::test]
    async fn browser_requests_are_gated() {
        let app = app();
        let (id, token) = create(&app).await;

        let (status, body) = post(
            &app.router,
            "/browser/screenshot",
            json!({ "sandbox_id": id, "owner_token": token, "url": "https://example.com" }),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "BROWSERBASE_NOT_CONFIGURED");

        let (status, body) = post(
            &app.router,
            "/browser/extract",
            json!({
                "sandbox_id": id,
                "owner_token": token,
                "url": "https://internal.example/",
                "browserbase_api_key": "k",
                "browserbase_project_id": "p",
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_URL");
        assert!(body["error"].as_str().unwrap().contains("127.0.0.1"));
    }
}
