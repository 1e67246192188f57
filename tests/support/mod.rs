// One arena server per integration test binary, shared by every test in it.
use arena_server::Settings;
use std::sync::{OnceLock, mpsc};

static SERVER_URL: OnceLock<String> = OnceLock::new();

// Settings independent of the developer's environment and config file.
fn test_settings() -> Settings {
    Settings {
        default_lobby_id: "test".to_string(),
        tick_rate_hz: 60,
        ..Settings::default()
    }
}

// Starts the server on first use and returns its base URL.
pub fn ensure_server() -> &'static str {
    SERVER_URL.get_or_init(|| {
        let (addr_tx, addr_rx) = mpsc::channel();
        // A dedicated thread and runtime so the server outlives each `#[tokio::test]` runtime.
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().expect("test runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind ephemeral test port");
                let addr = listener.local_addr().expect("local addr");
                // The socket already accepts once bound; no readiness polling needed.
                addr_tx.send(addr).expect("publish test server address");
                arena_server::serve(listener, test_settings())
                    .await
                    .expect("arena server failed");
            });
        });
        let addr = addr_rx.recv().expect("test server never started");
        format!("http://{addr}")
    })
}

// WebSocket URL for a lobby on the shared test server.
#[allow(dead_code)]
pub fn ws_url(lobby_id: Option<&str>) -> String {
    let base = ensure_server().replacen("http://", "ws://", 1);
    match lobby_id {
        Some(id) => format!("{base}/ws?lobby_id={id}"),
        None => format!("{base}/ws"),
    }
}
