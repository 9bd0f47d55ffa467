mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::{BROKEN, FakeFactory, MISSING};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use taskfleet_cloud::Identifier;
use taskfleet_config::Settings;
use taskfleet_controlplane::{AppState, router};
use tower::ServiceExt;

struct Api {
    app: Router,
    factory: Arc<FakeFactory>,
}

impl Api {
    fn new(factory: FakeFactory) -> Self {
        let factory = Arc::new(factory);
        let app = router(AppState::new(Settings::default(), factory.clone()));
        Self { app, factory }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, body)
    }

    async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let credentials = STANDARD.encode(r#"{"KUBECONFIG_DATA": "apiVersion: v1"}"#);
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("X-Cloud-Provider", "k8s")
            .header("X-Cloud-Credentials", credentials)
            .header("content-type", "application/json");
        let body = match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        };
        self.send(request.body(body).unwrap()).await
    }

    async fn job(&self, id: &str) -> Value {
        for _ in 0..200 {
            let (status, body) = self.call(Method::GET, &format!("/job/{id}"), None).await;
            assert_eq!(status, StatusCode::OK);
            if body["status"] != "running" {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never finished");
    }
}

fn task_id(name: &str) -> String {
    Identifier::new(name).long()
}

#[tokio::test]
async fn test_health() {
    let api = Api::new(FakeFactory::new());
    let request = Request::get("/health").body(Body::empty()).unwrap();

    let (status, body) = api.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn test_task_lifecycle() {
    let api = Api::new(FakeFactory::new());

    let (status, body) = api
        .call(
            Method::POST,
            "/task",
            Some(json!({"name": "training", "parallelism": 3})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let job = api.job(body["id"].as_str().unwrap()).await;
    assert_eq!(job["status"], "succeeded");
    assert!(job.get("error").is_none());

    let (status, body) = api.call(Method::GET, "/tasks", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"tasks": [task_id("training")]}));

    let uri = format!("/task/{}", task_id("training"));
    let (status, body) = api.call(Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"active": 3, "succeeded": 0, "failed": 0}));

    let (status, body) = api.call(Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(api.job(body["id"].as_str().unwrap()).await["status"], "succeeded");
    assert!(api.factory.backend.tasks().is_empty());
    assert!(
        api.factory
            .backend
            .calls()
            .contains(&format!("task:k8s:{}", task_id("training")))
    );
}

#[tokio::test]
async fn test_delete_twice() {
    let api = Api::new(FakeFactory::new());
    let uri = format!("/task/{}", task_id("gone"));

    for _ in 0..2 {
        let (status, body) = api.call(Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(api.job(body["id"].as_str().unwrap()).await["status"], "succeeded");
    }
}

#[tokio::test]
async fn test_missing_credentials() {
    let api = Api::new(FakeFactory::new());
    let request = Request::get("/tasks")
        .header("X-Cloud-Provider", "aws")
        .body(Body::empty())
        .unwrap();

    let (status, body) = api.send(request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap().contains("x-cloud-credentials"));
    assert!(api.factory.backend.calls().is_empty());
}

#[tokio::test]
async fn test_malformed_requests() {
    let api = Api::new(FakeFactory::new());

    let (status, _) = api
        .call(Method::POST, "/task", Some(json!({"parallelism": "many"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = api.call(Method::DELETE, "/task/not-a-task", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = api.call(Method::GET, "/job/42", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(api.factory.backend.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_job() {
    let api = Api::new(FakeFactory::new());

    let (status, _) = api
        .call(Method::GET, &format!("/job/{}", uuid::Uuid::new_v4()), None)
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_busy_task_conflicts() {
    let api = Api::new(FakeFactory::gated());
    let body = json!({"name": "slow"});

    let (status, first) = api.call(Method::POST, "/task", Some(body.clone())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = api.call(Method::POST, "/task", Some(body.clone())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = api
        .call(Method::DELETE, &format!("/task/{}", task_id("slow")), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Other tasks are unaffected
    let (status, _) = api
        .call(Method::POST, "/task", Some(json!({"name": "other"})))
        .await;
    assert_eq!(status, StatusCode::OK);

    api.factory.backend.release(2);
    assert_eq!(api.job(first["id"].as_str().unwrap()).await["status"], "succeeded");

    let (status, _) = api
        .call(Method::DELETE, &format!("/task/{}", task_id("slow")), None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_task_errors_are_server_errors() {
    let api = Api::new(FakeFactory::new());

    let (status, body) = api
        .call(Method::GET, &format!("/task/{}", task_id(BROKEN)), None)
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "API error: bucket unreachable"}));
}

#[tokio::test]
async fn test_absent_task_is_not_found() {
    let api = Api::new(FakeFactory::new());

    let (status, body) = api
        .call(Method::GET, &format!("/task/{}", task_id(MISSING)), None)
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().starts_with("Not found: bucket"));
}
