use super::*;
use std::time::Duration;

/// Poll /healthz until the server accepts connections
async fn wait_for_server(port: u16, max_retries: u32) -> reqwest::Client {
    let client = reqwest::Client::new();
    let mut delay = Duration::from_millis(10);

    for attempt in 1..=max_retries {
        match client
            .get(format!("http://127.0.0.1:{port}/healthz"))
            .timeout(Duration::from_millis(100))
            .send()
            .await
        {
            Ok(_) => return client,
            Err(_) if attempt < max_retries => {
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_millis(200));
            }
            Err(e) => panic!("Server not ready after {max_retries} attempts: {e}"),
        }
    }
    client
}

fn start(port: u16, readiness: ReadinessState) -> (tokio::task::JoinHandle<()>, SharedMetrics) {
    let metrics = create_metrics().expect("metrics registry");
    let server_metrics = metrics.clone();
    let handle = tokio::spawn(async move {
        let _ = run_health_server(port, readiness, server_metrics).await;
    });
    (handle, metrics)
}

async fn get(client: &reqwest::Client, port: u16, path: &str) -> reqwest::Response {
    client
        .get(format!("http://127.0.0.1:{port}{path}"))
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .expect("Failed to connect to health server")
}

#[tokio::test]
async fn test_healthz_returns_200() {
    let port = 18180;
    let (handle, _) = start(port, ReadinessState::new());
    let client = wait_for_server(port, 10).await;

    assert_eq!(get(&client, port, "/healthz").await.status(), 200);

    handle.abort();
}

#[tokio::test]
async fn test_readyz_follows_readiness_state() {
    let port = 18181;
    let readiness = ReadinessState::new();
    let (handle, _) = start(port, readiness.clone());
    let client = wait_for_server(port, 10).await;

    assert_eq!(get(&client, port, "/readyz").await.status(), 503);

    readiness.set_ready();
    assert_eq!(get(&client, port, "/readyz").await.status(), 200);

    readiness.set_not_ready();
    assert_eq!(get(&client, port, "/readyz").await.status(), 503);

    handle.abort();
}

#[tokio::test]
async fn test_metrics_endpoint_serves_registry() {
    let port = 18182;
    let (handle, metrics) = start(port, ReadinessState::new());
    metrics.record_reconciliation_success(0.01);
    let client = wait_for_server(port, 10).await;

    let response = get(&client, port, "/metrics").await;
    assert_eq!(response.status(), 200);
    let body = response.text().await.expect("metrics body");
    assert!(body.contains("kanari_reconciliations_total"));

    handle.abort();
}

#[test]
fn test_readiness_clones_share_state() {
    let state = ReadinessState::new();
    let cloned = state.clone();
    assert!(!cloned.is_ready());

    state.set_ready();
    assert!(cloned.is_ready());
}
