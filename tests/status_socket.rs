//! `/ws/status` end to end over a real socket.

use futures::{SinkExt, StreamExt};
use gpu_switchboard::config::{ControllerConfig, InstanceConfig, WorkerConfig};
use gpu_switchboard::runtime::Controller;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn boot() -> (Controller, String) {
    let config = ControllerConfig {
        listen_addr: "127.0.0.1:0".into(),
        worker: WorkerConfig {
            interpreter: "/nonexistent/python".into(),
            ..WorkerConfig::default()
        },
        instances: vec![
            InstanceConfig { id: "5090".into(), port: 45091, gpu: 1, url: None },
            InstanceConfig { id: "4090".into(), port: 44091, gpu: 0, url: None },
        ],
        ..ControllerConfig::default()
    };
    let controller = Controller::new(config);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws/status", listener.local_addr().unwrap());
    tokio::spawn(controller.server().serve(listener));
    (controller, url)
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a message")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_snapshot_then_updates() {
    let (controller, url) = boot().await;
    let (mut first, _) = connect_async(&url).await.unwrap();

    assert_eq!(
        next_json(&mut first).await,
        json!({"type": "status_update", "machine": "5090", "status": "stopped"})
    );
    assert_eq!(
        next_json(&mut first).await,
        json!({"type": "status_update", "machine": "4090", "status": "stopped"})
    );

    // 클라이언트가 보내는 메시지는 무시되고 연결은 유지됨
    first.send(Message::Text("ping".into())).await.unwrap();

    let result = controller.control().start("5090").await;
    assert!(result.message.starts_with("5090 failed to launch"));
    assert_eq!(
        next_json(&mut first).await,
        json!({"type": "status_update", "machine": "5090", "status": "error"})
    );

    // late joiner sees current state, not the initial one
    let (mut second, _) = connect_async(&url).await.unwrap();
    assert_eq!(next_json(&mut second).await["status"], "error");
    assert_eq!(next_json(&mut second).await["status"], "stopped");

    controller.shutdown().await;
}

#[tokio::test]
async fn test_closed_client_is_pruned() {
    let (controller, url) = boot().await;
    let (mut stays, _) = connect_async(&url).await.unwrap();
    let (mut leaves, _) = connect_async(&url).await.unwrap();
    for client in [&mut stays, &mut leaves] {
        next_json(client).await;
        next_json(client).await;
    }

    leaves.close(None).await.unwrap();
    drop(leaves);

    let hub = controller.control().hub().clone();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while hub.subscriber_count() != 1 {
        assert!(tokio::time::Instant::now() < deadline, "closed subscriber was not removed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    controller.control().stop("4090").await;
    assert_eq!(next_json(&mut stays).await["machine"], "4090");

    controller.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_sockets() {
    let (controller, url) = boot().await;
    let (mut client, _) = connect_async(&url).await.unwrap();
    next_json(&mut client).await;
    next_json(&mut client).await;

    controller.shutdown().await;

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(msg) = client.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => return true,
                _ => continue,
            }
        }
        true
    })
    .await
    .unwrap_or(false);
    assert!(closed);
}
