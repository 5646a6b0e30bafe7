//! REST API integration tests for berth-api.
//!
//! These tests drive the real router over HTTP against in-memory collaborators.

mod common;

use serde_json::{Value, json};

// =============================================================================
// Version Endpoint
// =============================================================================

#[tokio::test]
async fn test_get_version() {
    let server = common::TestServer::spawn().await;

    let response = server.get("/version").await;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert!(!body["version"].as_str().unwrap().is_empty());

    server.shutdown().await;
}

// =============================================================================
// Container CRUD
// =============================================================================

#[tokio::test]
async fn test_create_container_defaults() {
    let server = common::TestServer::spawn().await;

    let response = server
        .post_json(
            "/containers",
            &json!({
                "name": "MyDocker",
                "image": "ubuntu",
                "memory": "512"
            }),
        )
        .await;
    assert_eq!(response.status(), 202);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "Creating");
    assert_eq!(body["image"], "ubuntu");
    assert_eq!(body["image_tag"], "latest");
    assert_eq!(body["project_id"], "demo");
    server.settle(&body).await;

    let response = server.get("/containers").await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    let containers = body["containers"].as_array().unwrap();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0]["memory"], "512M");
    assert_eq!(containers[0]["status"], "Created");
    assert_eq!(containers[0]["addresses"][0]["network_id"], "private");

    let response = server.post("/containers/MyDocker/start").await;
    assert_eq!(response.status(), 202);
    server.settle(&containers[0]).await;

    let body: Value = server.get("/containers/MyDocker").await.json().await.unwrap();
    assert_eq!(body["status"], "Running");

    server.shutdown().await;
}

#[tokio::test]
async fn test_create_restart_policy_normalised() {
    let server = common::TestServer::spawn().await;

    let response = server
        .post_json(
            "/containers",
            &json!({
                "name": "web",
                "image": "nginx:1.25",
                "restart_policy": {"Name": "no", "MaximumRetryCount": "6"}
            }),
        )
        .await;
    assert_eq!(response.status(), 202);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["image_tag"], "1.25");
    assert_eq!(
        body["restart_policy"],
        json!({"Name": "no", "MaximumRetryCount": "0"})
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_create_invalid_restart_policy() {
    let server = common::TestServer::spawn().await;

    let response = server
        .post_json(
            "/containers",
            &json!({
                "name": "web",
                "image": "ubuntu",
                "restart_policy": {"Name": "always", "MaximumRetryCount": "1"}
            }),
        )
        .await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], 400);
    assert!(body["error"].is_string());

    let body: Value = server.get("/containers").await.json().await.unwrap();
    assert!(body["containers"].as_array().unwrap().is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn test_create_invalid_run_flag() {
    let server = common::TestServer::spawn().await;

    let response = server
        .post_json("/containers?run=xyz", &json!({"image": "ubuntu"}))
        .await;
    assert_eq!(response.status(), 400);

    server.shutdown().await;
}

#[tokio::test]
async fn test_create_rejects_unknown_field() {
    let server = common::TestServer::spawn().await;

    let response = server
        .post_json(
            "/containers",
            &json!({"name": "web", "image": "ubuntu", "runtime": "wrong_value"}),
        )
        .await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], 400);
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .contains("Invalid input for field")
    );

    let body: Value = server.get("/containers").await.json().await.unwrap();
    assert!(body["containers"].as_array().unwrap().is_empty());

    server.create_container("web", false).await;
    let response = server
        .patch_json("/containers/web", &json!({"memory": "1g", "swap": "2g"}))
        .await;
    assert_eq!(response.status(), 400);

    server.shutdown().await;
}

#[tokio::test]
async fn test_create_duplicate_name() {
    let server = common::TestServer::spawn().await;
    server.create_container("web", false).await;

    let response = server
        .post_json("/containers", &json!({"name": "web", "image": "ubuntu"}))
        .await;
    assert_eq!(response.status(), 409);

    server.shutdown().await;
}

#[tokio::test]
async fn test_get_container_not_found() {
    let server = common::TestServer::spawn().await;

    let response = server.get("/containers/nonexistent").await;
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], 404);

    server.shutdown().await;
}

#[tokio::test]
async fn test_get_container_by_uuid_and_name() {
    let server = common::TestServer::spawn().await;
    let created = server.create_container("web", false).await;
    let uuid = created["uuid"].as_str().unwrap();

    let by_uuid: Value = server
        .get(&format!("/containers/{}", uuid))
        .await
        .json()
        .await
        .unwrap();
    let by_name: Value = server.get("/containers/web").await.json().await.unwrap();
    assert_eq!(by_uuid["uuid"], by_name["uuid"]);

    server.shutdown().await;
}

#[tokio::test]
async fn test_projects_are_isolated() {
    let server = common::TestServer::spawn().await;
    server.create_container("web", false).await;

    let response = server.get_as("other", "/containers/web").await;
    assert_eq!(response.status(), 404);

    let body: Value = server
        .get_as("other", "/containers")
        .await
        .json()
        .await
        .unwrap();
    assert!(body["containers"].as_array().unwrap().is_empty());

    let body: Value = server
        .get_as("other", "/containers?all_tenants=true")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["containers"].as_array().unwrap().len(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_ambiguous_name_across_tenants() {
    let server = common::TestServer::spawn().await;
    server.create_container("web", false).await;
    let response = server
        .post_json_as("other", "/containers", &json!({"name": "web", "image": "ubuntu"}))
        .await;
    assert_eq!(response.status(), 202);
    let body: Value = response.json().await.unwrap();
    server.settle(&body).await;

    let response = server.get("/containers/web?all_tenants=1").await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("Multiple containers"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_list_pagination_and_sort() {
    let server = common::TestServer::spawn().await;
    for name in ["c-one", "a-two", "b-three"] {
        server.create_container(name, false).await;
    }

    let body: Value = server
        .get("/containers?sort_key=name&sort_dir=asc&limit=2")
        .await
        .json()
        .await
        .unwrap();
    let page = body["containers"].as_array().unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0]["name"], "a-two");
    assert_eq!(page[1]["name"], "b-three");

    let marker = page[1]["uuid"].as_str().unwrap();
    let body: Value = server
        .get(&format!(
            "/containers?sort_key=name&sort_dir=asc&limit=2&marker={}",
            marker
        ))
        .await
        .json()
        .await
        .unwrap();
    let page = body["containers"].as_array().unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["name"], "c-one");

    let response = server.get("/containers?limit=0").await;
    assert_eq!(response.status(), 400);
    let response = server.get("/containers?sort_key=color").await;
    assert_eq!(response.status(), 400);

    server.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_runtime_reports_unknown() {
    let server = common::TestServer::spawn().await;
    let created = server.create_container("web", true).await;
    server.harness.driver.fail_on("inspect", "docker daemon down");

    let response = server.get("/containers").await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    let containers = body["containers"].as_array().unwrap();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0]["uuid"], created["uuid"]);
    assert_eq!(containers[0]["status"], "Unknown");

    let body: Value = server.get("/containers/web").await.json().await.unwrap();
    assert_eq!(body["status"], "Unknown");

    server.harness.driver.clear_failures();
    let body: Value = server.get("/containers/web").await.json().await.unwrap();
    assert_eq!(body["status"], "Running");

    server.shutdown().await;
}

#[tokio::test]
async fn test_update_container_limits() {
    let server = common::TestServer::spawn().await;
    server.create_container("web", true).await;

    let response = server
        .patch_json("/containers/web", &json!({"memory": "1g", "cpu": 1.5}))
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["memory"], "1G");
    assert_eq!(body["cpu"], 1.5);

    let response = server.patch_json("/containers/web", &json!({})).await;
    assert_eq!(response.status(), 400);

    server.shutdown().await;
}

#[tokio::test]
async fn test_delete_container() {
    let server = common::TestServer::spawn().await;
    let created = server.create_container("web", false).await;

    let response = server.delete("/containers/web").await;
    assert_eq!(response.status(), 204);
    server.settle(&created).await;

    let response = server.get("/containers/web").await;
    assert_eq!(response.status(), 404);

    server.shutdown().await;
}

#[tokio::test]
async fn test_delete_running_requires_force() {
    let server = common::TestServer::spawn().await;
    let created = server.create_container("web", true).await;

    let response = server.delete("/containers/web").await;
    assert_eq!(response.status(), 409);

    let response = server.delete("/containers/web?force=wrong").await;
    assert_eq!(response.status(), 400);

    let response = server.delete("/containers/web?force=true").await;
    assert_eq!(response.status(), 204);
    server.settle(&created).await;
    assert_eq!(server.get("/containers/web").await.status(), 404);

    server.shutdown().await;
}

// =============================================================================
// Actions
// =============================================================================

#[tokio::test]
async fn test_start_running_conflicts() {
    let server = common::TestServer::spawn().await;
    server.create_container("web", true).await;

    let response = server.post("/containers/web/start").await;
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], 409);
    assert!(body["error"].as_str().unwrap().contains("Running"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_unknown_action() {
    let server = common::TestServer::spawn().await;
    server.create_container("web", true).await;

    let response = server.post("/containers/web/explode").await;
    assert_eq!(response.status(), 400);

    server.shutdown().await;
}

#[tokio::test]
async fn test_invalid_parameters_rejected() {
    let server = common::TestServer::spawn().await;
    let created = server.create_container("web", true).await;
    let uuid = created["uuid"].as_str().unwrap().parse().unwrap();
    let before = server.harness.driver.calls_for(uuid).len();

    for path in [
        "/containers/web/stop?timeout=xyz",
        "/containers/web/kill?signal=11x",
        "/containers/web/logs?since=x11",
        "/containers/web/execute?command=",
    ] {
        let response = server.post(path).await;
        assert_eq!(response.status(), 400, "{path}");
    }
    assert_eq!(server.harness.driver.calls_for(uuid).len(), before);

    server.shutdown().await;
}

#[tokio::test]
async fn test_stop_accepted_with_tracking() {
    let server = common::TestServer::spawn().await;
    let created = server.create_container("web", true).await;

    let response = server.post("/containers/web/stop?timeout=5").await;
    assert_eq!(response.status(), 202);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["action"], "stop");
    assert_eq!(body["container"], created["uuid"]);
    assert!(body["request_id"].is_string());
    server.settle(&created).await;

    let body: Value = server.get("/containers/web").await.json().await.unwrap();
    assert_eq!(body["status"], "Stopped");

    server.shutdown().await;
}

#[tokio::test]
async fn test_action_parameters_from_body() {
    let server = common::TestServer::spawn().await;
    let created = server.create_container("web", true).await;

    let response = server
        .post_json(
            "/containers/web/put_archive",
            &json!({"path": "/etc/motd", "data": "hello"}),
        )
        .await;
    assert_eq!(response.status(), 200);

    let response = server.get("/containers/web/get_archive?path=/etc/motd").await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"], "hello");

    let response = server
        .post_json("/containers/web/execute", &json!({"command": "ls", "run": true}))
        .await;
    assert_eq!(response.status(), 202);
    let body: Value = response.json().await.unwrap();
    assert!(body["exec_id"].is_string());
    server.settle(&created).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_read_only_actions_over_get() {
    let server = common::TestServer::spawn().await;
    server.create_container("web", true).await;

    let response = server.get("/containers/web/logs").await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert!(body["logs"].as_str().unwrap().contains("started ubuntu:latest"));

    let response = server.get("/containers/web/stats").await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert!(body["memory_limit"].as_u64().unwrap() > 0);

    let response = server.get("/containers/web/top").await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["titles"], json!(["PID", "CMD"]));

    let response = server.get("/containers/web/stop").await;
    assert_eq!(response.status(), 405);

    server.shutdown().await;
}

#[tokio::test]
async fn test_rename() {
    let server = common::TestServer::spawn().await;
    server.create_container("web", false).await;
    server.create_container("db", false).await;

    let response = server.post("/containers/web/rename?name=web").await;
    assert_eq!(response.status(), 400);

    let response = server.post("/containers/web/rename?name=db").await;
    assert_eq!(response.status(), 409);

    let response = server.post("/containers/web/rename?name=api").await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["name"], "api");

    assert_eq!(server.get("/containers/api").await.status(), 200);
    assert_eq!(server.get("/containers/web").await.status(), 404);

    server.shutdown().await;
}

#[tokio::test]
async fn test_driver_failure_marks_error() {
    let server = common::TestServer::spawn().await;
    let created = server.create_container("web", true).await;
    server.harness.driver.fail_on("pause", "cgroup freeze failed");

    let response = server.post("/containers/web/pause").await;
    assert_eq!(response.status(), 202);
    server.settle(&created).await;

    let body: Value = server.get("/containers/web").await.json().await.unwrap();
    assert_eq!(body["status"], "Error");
    assert_eq!(body["status_reason"], "pause failed: cgroup freeze failed");

    server.shutdown().await;
}

#[tokio::test]
async fn test_read_only_failure_is_server_error() {
    let server = common::TestServer::spawn().await;
    server.create_container("web", true).await;
    server.harness.driver.fail_on("stats", "cgroup missing");

    let response = server.get("/containers/web/stats").await;
    assert_eq!(response.status(), 500);

    let body: Value = server.get("/containers/web").await.json().await.unwrap();
    assert_eq!(body["status"], "Running");

    server.shutdown().await;
}

#[tokio::test]
async fn test_security_group_actions() {
    let server = common::TestServer::spawn().await;
    let created = server.create_container("web", false).await;
    let group = uuid::Uuid::new_v4();

    let response = server
        .post(&format!("/containers/web/add_security_group?uuid={}", group))
        .await;
    assert_eq!(response.status(), 202);
    server.settle(&created).await;

    let response = server
        .post(&format!("/containers/web/add_security_group?uuid={}", group))
        .await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("already present"));

    let response = server
        .post("/containers/web/add_security_group?uuid=not-a-uuid")
        .await;
    assert_eq!(response.status(), 400);

    server.shutdown().await;
}

#[tokio::test]
async fn test_network_attach_and_detach() {
    let server = common::TestServer::spawn().await;
    let created = server.create_container("web", false).await;

    let response = server
        .post("/containers/web/network_attach?network=public")
        .await;
    assert_eq!(response.status(), 202);
    server.settle(&created).await;

    let body: Value = server.get("/containers/web").await.json().await.unwrap();
    assert_eq!(body["addresses"].as_array().unwrap().len(), 2);

    let response = server
        .post("/containers/web/network_detach?network=public")
        .await;
    assert_eq!(response.status(), 202);
    server.settle(&created).await;

    let body: Value = server.get("/containers/web").await.json().await.unwrap();
    assert_eq!(body["addresses"].as_array().unwrap().len(), 1);

    server.shutdown().await;
}
