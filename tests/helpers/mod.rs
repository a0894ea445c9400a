#![allow(dead_code)] // Test helpers appear unused when compiled independently

use parakeet_relay::Settings;
use reqwest::Client;
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const WAIT_ATTEMPTS: usize = 50;
const WAIT_DELAY: Duration = Duration::from_millis(100);

/// Transmitter 8388641, textual id "80011".
pub const TRANSMITTER: &str = "8388641";
pub const TRANSMITTER_ID: &str = "80011";
pub const PASSCODE: &str = "12345";

pub struct RunningApp {
    pub base_url: String,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl RunningApp {
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

/// Best-effort check for whether binding to loopback is permitted in the current sandbox.
pub async fn can_bind_loopback() -> bool {
    match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => false,
        Err(_) => true, // treat other errors as non-fatal for skipping
    }
}

/// Serve the receiver on an ephemeral loopback port.
pub async fn spawn_app(settings: Settings) -> RunningApp {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind receiver listener");
    let port = listener.local_addr().unwrap().port();
    let app = parakeet_relay::build_router(settings);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        if let Err(err) = server.await {
            eprintln!("receiver server error: {}", err);
        }
    });

    RunningApp {
        base_url: format!("http://127.0.0.1:{}", port),
        shutdown_tx,
        handle,
    }
}

/// Client that reports redirects instead of following them.
pub fn client() -> Client {
    Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("failed to build client")
}

/// Wait for a server to respond to /health
pub async fn wait_for_health(client: &Client, base_url: &str) {
    poll_until(|| async {
        client
            .get(format!("{}/health", base_url))
            .send()
            .await
            .ok()
            .map(|_| ())
    })
    .await
    .unwrap_or_else(|| panic!("timed out waiting for {} to be healthy", base_url));
}

/// GET a path and return (status, body).
pub async fn get_text(client: &Client, base_url: &str, path: &str) -> (u16, String) {
    let resp = client
        .get(format!("{}{}", base_url, path))
        .send()
        .await
        .expect("request failed");
    let status = resp.status().as_u16();
    let body = resp.text().await.expect("failed to read body");
    (status, body)
}

/// Upload query string for a reading from the test transmitter.
pub fn upload_query(lv: i64, lf: i64, gl: &str) -> String {
    format!(
        "/receiver.cgi?lv={}&lf={}&ts=1000&bp=80&bm=0&ct=0&db=90&zi={}&gl={}&pc={}",
        lv, lf, TRANSMITTER, gl, PASSCODE
    )
}

/// Non-empty lines of a json.get body, parsed.
pub fn records(body: &str) -> Vec<serde_json::Value> {
    body.lines()
        .filter(|l| !l.is_empty())
        .map(|l| serde_json::from_str(l).expect("record is not JSON"))
        .collect()
}

async fn poll_until<T, F, Fut>(mut f: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for _ in 0..WAIT_ATTEMPTS {
        if let Some(result) = f().await {
            return Some(result);
        }
        tokio::time::sleep(WAIT_DELAY).await;
    }
    None
}
