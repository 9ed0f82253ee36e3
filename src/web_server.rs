use crate::data_manager::DataManager;
use crate::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// First port the server tries; bumped until a free one is found.
pub const BASE_PORT: u16 = 8989;

pub struct WebServer {
    data_manager: Arc<DataManager>,
}

impl WebServer {
    pub fn new(data_manager: Arc<DataManager>) -> Self {
        Self { data_manager }
    }

    fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/", get(index))
            .route("/api/data", get(get_data))
            .route("/api/enemies", get(get_enemies))
            .route("/api/clear", get(clear_data))
            .route("/api/pause", get(get_pause).post(set_pause))
            .route("/api/skill/:uid", get(get_user_skill))
            .route("/api/settings", get(get_settings).post(update_settings))
            .route("/api/health", get(health))
            .route("/api/history/list", get(history_list))
            .route("/api/history/:ts/summary", get(history_summary))
            .route("/api/history/:ts/data", get(history_data))
            .route("/api/history/:ts/skill/:uid", get(history_skill))
            .route("/api/history/:ts/download", get(history_download))
            .route("/ws", get(ws_handler))
            .route("/files/*path", get(serve_static))
            .layer(cors)
            .with_state(self.data_manager.clone())
    }

    /// Bind (retrying past occupied ports), open the browser, serve until
    /// `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut port = BASE_PORT;
        let listener = loop {
            match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
                Ok(listener) => break listener,
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                    log::warn!("Port {} in use, trying {}", port, port + 1);
                    port += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };

        let url = format!("http://localhost:{}", port);
        log::info!("Web server listening on {}", url);
        open_browser(&url);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

/// Best-effort launch of the OS default browser.
fn open_browser(url: &str) {
    #[cfg(target_os = "windows")]
    let result = std::process::Command::new("cmd").args(["/C", "start", url]).spawn();
    #[cfg(target_os = "macos")]
    let result = std::process::Command::new("open").arg(url).spawn();
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    let result = std::process::Command::new("xdg-open").arg(url).spawn();

    if let Err(e) = result {
        log::warn!("Could not open browser at {}: {}", url, e);
    }
}

// ---- handlers --------------------------------------------------------------

async fn index() -> Response {
    match tokio::fs::read("public/index.html").await {
        Ok(content) => ([(header::CONTENT_TYPE, "text/html")], content).into_response(),
        Err(_) => Json(json!({"code": 0, "msg": "resonance-meter"})).into_response(),
    }
}

async fn get_data(State(dm): State<Arc<DataManager>>) -> Json<Value> {
    Json(json!({
        "code": 0,
        "user": dm.get_all_users_data(),
        "enemy": dm.get_all_enemies_data(),
    }))
}

async fn get_enemies(State(dm): State<Arc<DataManager>>) -> Json<Value> {
    Json(json!({
        "code": 0,
        "enemy": dm.get_all_enemies_data(),
    }))
}

async fn clear_data(State(dm): State<Arc<DataManager>>) -> Json<Value> {
    dm.clear_all();
    log::info!("Statistics cleared via API");
    Json(json!({"code": 0, "msg": "Statistics have been cleared!"}))
}

async fn get_pause(State(dm): State<Arc<DataManager>>) -> Json<Value> {
    Json(json!({"code": 0, "paused": dm.is_paused()}))
}

async fn set_pause(
    State(dm): State<Arc<DataManager>>,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    match payload.get("paused").and_then(|v| v.as_bool()) {
        Some(paused) => {
            dm.pause(paused);
            log::info!("Statistics {} via API", if paused { "paused" } else { "resumed" });
            (StatusCode::OK, Json(json!({"code": 0, "paused": paused})))
        }
        None => (
            StatusCode::BAD_REQUEST,
            Json(json!({"code": 1, "msg": "missing boolean field: paused"})),
        ),
    }
}

async fn get_user_skill(
    State(dm): State<Arc<DataManager>>,
    Path(uid): Path<u32>,
) -> (StatusCode, Json<Value>) {
    match dm.get_user_skill_data(uid) {
        Some(data) => (StatusCode::OK, Json(json!({"code": 0, "data": data}))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"code": 1, "msg": format!("user {} not found", uid)})),
        ),
    }
}

async fn get_settings(State(dm): State<Arc<DataManager>>) -> Json<Value> {
    let settings = dm.settings.read().clone();
    Json(json!({"code": 0, "data": settings}))
}

async fn update_settings(
    State(dm): State<Arc<DataManager>>,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let Some(patch) = payload.as_object() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"code": 1, "msg": "settings payload must be an object"})),
        );
    };
    let updated = {
        let mut settings = dm.settings.write();
        settings.merge(patch);
        settings.clone()
    };
    if let Err(e) = dm.save_settings() {
        log::error!("Settings save failed: {}", e);
    }
    (StatusCode::OK, Json(json!({"code": 0, "data": updated})))
}

async fn health(State(dm): State<Arc<DataManager>>) -> Json<Value> {
    Json(json!({
        "code": 0,
        "status": "healthy",
        "version": crate::VERSION,
        "uptime_ms": crate::now_ms() - dm.start_time(),
        "users_count": dm.users.len(),
        "paused": dm.is_paused(),
    }))
}

// ---- history ---------------------------------------------------------------

fn is_timestamp(ts: &str) -> bool {
    !ts.is_empty() && ts.chars().all(|c| c.is_ascii_digit())
}

async fn history_list(State(dm): State<Arc<DataManager>>) -> Json<Value> {
    let mut entries: Vec<i64> = Vec::new();
    if let Ok(dir) = std::fs::read_dir(dm.logs_dir()) {
        for entry in dir.flatten() {
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                if let Some(name) = entry.file_name().to_str() {
                    if is_timestamp(name) {
                        if let Ok(ts) = name.parse::<i64>() {
                            entries.push(ts);
                        }
                    }
                }
            }
        }
    }
    entries.sort_unstable();
    Json(json!({"code": 0, "history": entries}))
}

/// Read one snapshot file: 404 when the timestamp or file is missing, 500 on
/// any other IO failure.
fn read_history_json(dm: &DataManager, ts: &str, file: &str) -> std::result::Result<Value, StatusCode> {
    if !is_timestamp(ts) {
        return Err(StatusCode::NOT_FOUND);
    }
    let path = dm.logs_dir().join(ts).join(file);
    match std::fs::read_to_string(&path) {
        Ok(content) => serde_json::from_str(&content).map_err(|e| {
            log::error!("Corrupt history file {}: {}", path.display(), e);
            StatusCode::INTERNAL_SERVER_ERROR
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            log::error!("History read {} failed: {}", path.display(), e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn history_error(status: StatusCode) -> (StatusCode, Json<Value>) {
    let msg = if status == StatusCode::NOT_FOUND {
        "snapshot not found"
    } else {
        "failed to read snapshot"
    };
    (status, Json(json!({"code": 1, "msg": msg})))
}

async fn history_summary(
    State(dm): State<Arc<DataManager>>,
    Path(ts): Path<String>,
) -> (StatusCode, Json<Value>) {
    match read_history_json(&dm, &ts, "summary.json") {
        Ok(summary) => (StatusCode::OK, Json(json!({"code": 0, "summary": summary}))),
        Err(status) => history_error(status),
    }
}

async fn history_data(
    State(dm): State<Arc<DataManager>>,
    Path(ts): Path<String>,
) -> (StatusCode, Json<Value>) {
    match read_history_json(&dm, &ts, "allUserData.json") {
        Ok(users) => (StatusCode::OK, Json(json!({"code": 0, "user": users}))),
        Err(status) => history_error(status),
    }
}

async fn history_skill(
    State(dm): State<Arc<DataManager>>,
    Path((ts, uid)): Path<(String, u32)>,
) -> (StatusCode, Json<Value>) {
    match read_history_json(&dm, &ts, &format!("users/{}.json", uid)) {
        Ok(data) => (StatusCode::OK, Json(json!({"code": 0, "data": data}))),
        Err(status) => history_error(status),
    }
}

async fn history_download(
    State(dm): State<Arc<DataManager>>,
    Path(ts): Path<String>,
) -> Response {
    if !is_timestamp(ts.as_str()) {
        return history_error(StatusCode::NOT_FOUND).into_response();
    }
    let path = dm.logs_dir().join(&ts).join("fight.log");
    match tokio::fs::read(&path).await {
        Ok(content) => (
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"fight-{}.log\"", ts),
                ),
            ],
            content,
        )
            .into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            history_error(StatusCode::NOT_FOUND).into_response()
        }
        Err(e) => {
            log::error!("fight.log read failed: {}", e);
            history_error(StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

// ---- websocket -------------------------------------------------------------

async fn ws_handler(State(dm): State<Arc<DataManager>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(dm, socket))
}

/// Push the `/api/data` snapshot to the subscriber every 100 ms while the
/// meter is running; pausing suspends the stream without dropping the
/// connection.
async fn handle_socket(dm: Arc<DataManager>, mut socket: WebSocket) {
    log::info!("WebSocket client connected");
    let mut interval = tokio::time::interval(std::time::Duration::from_millis(100));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if dm.is_paused() {
                    continue;
                }
                let msg = json!({
                    "type": "data",
                    "data": dm.data_payload(),
                });
                match serde_json::to_string(&msg) {
                    Ok(text) => {
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::error!("Broadcast serialisation failed: {}", e);
                        break;
                    }
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
        }
    }
}

// ---- static files ----------------------------------------------------------

fn content_type_for(path: &str) -> &'static str {
    match path.rsplit('.').next() {
        Some("html") => "text/html",
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

async fn serve_static(Path(path): Path<String>) -> Response {
    // keep requests inside ./public
    if path.contains("..") {
        return StatusCode::NOT_FOUND.into_response();
    }
    let file = PathBuf::from("public").join(path.trim_start_matches('/'));
    match tokio::fs::read(&file).await {
        Ok(content) => (
            [(header::CONTENT_TYPE, content_type_for(&file.to_string_lossy()))],
            content,
        )
            .into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_digit_only() {
        assert!(is_timestamp("1722400000000"));
        assert!(!is_timestamp(""));
        assert!(!is_timestamp("17224x"));
        assert!(!is_timestamp("../etc"));
    }

    #[test]
    fn content_types_cover_the_ui_assets() {
        assert_eq!(content_type_for("public/index.html"), "text/html");
        assert_eq!(content_type_for("app.js"), "application/javascript");
        assert_eq!(content_type_for("unknown.bin"), "application/octet-stream");
    }
}
