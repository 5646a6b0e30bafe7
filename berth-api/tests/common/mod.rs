//! Shared harness for the REST integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use berth_api::rest::{AppState, PROJECT_HEADER, USER_HEADER, create_router};
use berth_api::test_util::Harness;

/// A berth-api router served on a free local port, backed by the
/// instrumented collaborators from `test_util`.
pub struct TestServer {
    pub base_url: String,
    pub harness: Harness,
    client: reqwest::Client,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        let port = portpicker::pick_unused_port().expect("no free port");
        let addr = format!("127.0.0.1:{}", port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .expect("bind test listener");

        let harness = Harness::new();
        let state = Arc::new(AppState {
            dispatcher: harness.dispatcher.clone(),
        });
        let router = create_router(state);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.changed().await.ok();
                })
                .await
                .expect("serve");
        });

        Self {
            base_url: format!("http://{}/v1", addr),
            harness,
            client: reqwest::Client::new(),
            shutdown_tx,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str, project: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header(PROJECT_HEADER, project)
            .header(USER_HEADER, "alice")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.get_as("demo", path).await
    }

    pub async fn get_as(&self, project: &str, path: &str) -> reqwest::Response {
        self.request(reqwest::Method::GET, path, project)
            .send()
            .await
            .expect("GET request")
    }

    pub async fn post(&self, path: &str) -> reqwest::Response {
        self.request(reqwest::Method::POST, path, "demo")
            .send()
            .await
            .expect("POST request")
    }

    pub async fn post_json(&self, path: &str, body: &serde_json::Value) -> reqwest::Response {
        self.post_json_as("demo", path, body).await
    }

    pub async fn post_json_as(
        &self,
        project: &str,
        path: &str,
        body: &serde_json::Value,
    ) -> reqwest::Response {
        self.request(reqwest::Method::POST, path, project)
            .json(body)
            .send()
            .await
            .expect("POST request")
    }

    pub async fn patch_json(&self, path: &str, body: &serde_json::Value) -> reqwest::Response {
        self.request(reqwest::Method::PATCH, path, "demo")
            .json(body)
            .send()
            .await
            .expect("PATCH request")
    }

    pub async fn delete(&self, path: &str) -> reqwest::Response {
        self.request(reqwest::Method::DELETE, path, "demo")
            .send()
            .await
            .expect("DELETE request")
    }

    /// Create a container in project `demo` and wait for provisioning.
    pub async fn create_container(&self, name: &str, run: bool) -> serde_json::Value {
        let response = self
            .post_json(
                &format!("/containers?run={}", run),
                &serde_json::json!({
                    "name": name,
                    "image": "ubuntu",
                    "command": "env",
                    "memory": "512"
                }),
            )
            .await;
        assert_eq!(response.status(), 202);
        let body: serde_json::Value = response.json().await.unwrap();
        self.settle(&body).await;
        self.get(&format!("/containers/{}", name))
            .await
            .json()
            .await
            .unwrap()
    }

    /// Wait until no action is in flight for the container in `body`.
    pub async fn settle(&self, body: &serde_json::Value) {
        let uuid = body["uuid"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .expect("container uuid");
        self.harness.settle(uuid).await;
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
    }
}
