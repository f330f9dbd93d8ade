//! HTTP control surface, driven through the router with tower::ServiceExt.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use gpu_switchboard::config::{ControllerConfig, InstanceConfig, Timings, WorkerConfig};
use gpu_switchboard::runtime::Controller;
use serde_json::{json, Value};
use tower::ServiceExt;

fn config(worker: WorkerConfig) -> ControllerConfig {
    ControllerConfig {
        listen_addr: "127.0.0.1:0".into(),
        probe_host: "127.0.0.1".into(),
        worker,
        instances: vec![
            InstanceConfig { id: "5090".into(), port: 45090, gpu: 1, url: None },
            InstanceConfig { id: "4090".into(), port: 44090, gpu: 0, url: None },
        ],
        timings: Timings {
            restart_delay_ms: 10,
            crash_watch_interval_ms: 50,
            ..Timings::default()
        },
    }
}

fn broken_worker() -> WorkerConfig {
    WorkerConfig {
        interpreter: "/nonexistent/python_embeded/python.exe".into(),
        ..WorkerConfig::default()
    }
}

async fn get_json(app: &Router, uri: &str) -> Value {
    let req = Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK, "{} should answer 200", uri);
    let body = axum::body::to_bytes(resp.into_body(), 1024 * 64).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_status_endpoint() {
    let controller = Controller::new(config(broken_worker()));
    let app = controller.server().router();

    assert_eq!(get_json(&app, "/status/5090").await, json!({"status": "stopped"}));
    assert_eq!(get_json(&app, "/status/3090").await, json!({"status": "unknown"}));
}

#[tokio::test]
async fn test_unknown_instance_is_error_payload_not_http_error() {
    let controller = Controller::new(config(broken_worker()));
    let app = controller.server().router();

    for action in ["start", "stop", "restart"] {
        let body = get_json(&app, &format!("/{}/3090", action)).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "unknown instance '3090'");
    }
}

#[tokio::test]
async fn test_stop_on_stopped_instance() {
    let controller = Controller::new(config(broken_worker()));
    let app = controller.server().router();

    let body = get_json(&app, "/stop/4090").await;
    assert_eq!(body, json!({"status": "error", "message": "4090 is not running"}));
    assert_eq!(get_json(&app, "/status/4090").await["status"], "stopped");
}

#[tokio::test]
async fn test_launch_failure_sets_error_status() {
    let controller = Controller::new(config(broken_worker()));
    let app = controller.server().router();

    let body = get_json(&app, "/start/5090").await;
    assert_eq!(body["status"], "error");
    assert!(body["message"].as_str().unwrap().contains("failed to launch"));
    assert_eq!(get_json(&app, "/status/5090").await["status"], "error");
    // 다른 인스턴스에는 영향 없음
    assert_eq!(get_json(&app, "/status/4090").await["status"], "stopped");
}

#[tokio::test]
async fn test_instances_listing() {
    let controller = Controller::new(config(broken_worker()));
    let app = controller.server().router();

    let list = get_json(&app, "/instances").await;
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["id"], "5090");
    assert_eq!(list[0]["gpu"], 1);
    assert_eq!(list[0]["url"], "http://localhost:45090");
    assert_eq!(list[1]["status"], "stopped");
}

#[tokio::test]
async fn test_dashboard_page() {
    let controller = Controller::new(config(broken_worker()));
    let app = controller.server().router();

    let req = Request::builder().uri("/").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), 1024 * 256).await.unwrap();
    let html = String::from_utf8(body.to_vec()).unwrap();
    assert!(html.contains("<iframe") || html.contains("iframe"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_full_lifecycle_over_http() {
    let worker = WorkerConfig {
        interpreter: "sh".into(),
        interpreter_args: vec!["-c".into(), "exec sleep 30".into()],
        entrypoint: "worker".into(),
        flags: Vec::new(),
        working_dir: None,
    };
    let controller = Controller::new(config(worker));
    let app = controller.server().router();

    let body = get_json(&app, "/start/5090").await;
    assert_eq!(body, json!({"status": "success", "message": "5090 starting..."}));
    assert_eq!(get_json(&app, "/status/5090").await["status"], "starting");

    let again = get_json(&app, "/start/5090").await;
    assert_eq!(again["status"], "error");
    assert_eq!(again["message"], "5090 is already running or starting");

    let restarted = get_json(&app, "/restart/5090").await;
    assert_eq!(restarted["status"], "success");
    assert_eq!(get_json(&app, "/status/5090").await["status"], "starting");

    let stopped = get_json(&app, "/stop/5090").await;
    assert_eq!(stopped, json!({"status": "success", "message": "5090 stopped"}));
    assert_eq!(get_json(&app, "/status/5090").await["status"], "stopped");

    controller.shutdown().await;
}
