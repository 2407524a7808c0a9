use axum::{
    extract::{Form, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use piradio_core::controller::Controller;
use piradio_core::error::ControllerError;
use piradio_core::protocol::{Command, Snapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

const INDEX_HTML: &str = include_str!("../web/index.html");
const APP_JS: &str = include_str!("../web/app.js");

#[derive(Clone)]
struct HttpState {
    controller: Arc<Controller>,
}

/// Shape polled by the web UI once a second.
#[derive(Debug, Serialize, Deserialize)]
struct ApiStatus {
    url: String,
    label: String,
    volume: i32,
    muted: bool,
    timer_status: String,
}

impl From<Snapshot> for ApiStatus {
    fn from(s: Snapshot) -> Self {
        Self {
            url: s.url,
            label: s.label,
            volume: s.volume,
            muted: s.muted,
            timer_status: s.timer_status,
        }
    }
}

#[derive(Serialize)]
struct StationInfo {
    idx: usize,
    label: String,
    url: String,
}

#[derive(Deserialize)]
struct VolumeForm {
    volume: Option<String>,
}

#[derive(Deserialize)]
struct UrlForm {
    url: Option<String>,
}

#[derive(Deserialize)]
struct MinutesForm {
    minutes: Option<String>,
}

#[derive(Deserialize)]
struct PresetForm {
    label: Option<String>,
    url: Option<String>,
}

pub fn router(controller: Arc<Controller>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/app.js", get(app_js))
        .route("/status", get(status))
        .route("/stations", get(stations))
        .route("/next", post(next_station))
        .route("/prev", post(prev_station))
        .route("/volume_up", post(volume_up))
        .route("/volume_down", post(volume_down))
        .route("/toggle_mute", post(toggle_mute))
        .route("/set_volume", post(set_volume))
        .route("/set_url", post(set_url))
        .route("/toggle_timer", post(toggle_timer))
        .route("/set_timer_interval", post(set_timer_interval))
        .route("/add_preset", post(add_preset))
        .route("/save_settings", post(save_settings))
        .route("/wake", post(wake))
        .layer(CorsLayer::permissive())
        .with_state(HttpState { controller })
}

pub fn start_server(
    bind_address: String,
    port: u16,
    controller: Arc<Controller>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(controller);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP control listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn error_response(err: ControllerError) -> Response {
    let status = match &err {
        ControllerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        ControllerError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
        ControllerError::Persistence(_) => {
            error!("HTTP API: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string()).into_response()
}

async fn run(state: &HttpState, cmd: Command) -> Response {
    info!("HTTP API: {:?}", cmd);
    match state.controller.apply(cmd).await {
        Ok(snapshot) => Json(ApiStatus::from(snapshot)).into_response(),
        Err(e) => error_response(e),
    }
}

fn bad_request(msg: &'static str) -> Response {
    warn!("HTTP API: rejected request: {}", msg);
    (StatusCode::BAD_REQUEST, msg).into_response()
}

/// Non-empty, trimmed form field.
fn field(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn app_js() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/javascript")], APP_JS)
}

async fn status(State(state): State<HttpState>) -> Json<ApiStatus> {
    Json(state.controller.status().await.into())
}

async fn stations(State(state): State<HttpState>) -> Json<Vec<StationInfo>> {
    let stations = state
        .controller
        .stations()
        .await
        .into_iter()
        .enumerate()
        .map(|(idx, s)| StationInfo {
            idx,
            label: s.label,
            url: s.url,
        })
        .collect();
    Json(stations)
}

async fn next_station(State(state): State<HttpState>) -> Response {
    run(&state, Command::Next).await
}

async fn prev_station(State(state): State<HttpState>) -> Response {
    run(&state, Command::Prev).await
}

async fn volume_up(State(state): State<HttpState>) -> Response {
    run(&state, Command::VolumeUp).await
}

async fn volume_down(State(state): State<HttpState>) -> Response {
    run(&state, Command::VolumeDown).await
}

async fn toggle_mute(State(state): State<HttpState>) -> Response {
    run(&state, Command::ToggleMute).await
}

async fn set_volume(State(state): State<HttpState>, Form(form): Form<VolumeForm>) -> Response {
    let Some(value) = field(form.volume).and_then(|v| v.parse::<i64>().ok()) else {
        return bad_request("Invalid volume");
    };
    // Any integer is accepted; the controller clamps to the configured bounds.
    let value = value.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
    run(&state, Command::SetVolume { value }).await
}

async fn set_url(State(state): State<HttpState>, Form(form): Form<UrlForm>) -> Response {
    let Some(url) = field(form.url) else {
        return bad_request("Missing url");
    };
    run(&state, Command::SetStation { url }).await
}

async fn toggle_timer(State(state): State<HttpState>) -> Response {
    run(&state, Command::ToggleTimer).await
}

async fn set_timer_interval(
    State(state): State<HttpState>,
    Form(form): Form<MinutesForm>,
) -> Response {
    let Some(minutes) = field(form.minutes).and_then(|v| v.parse::<u32>().ok()) else {
        return bad_request("Invalid minutes");
    };
    run(&state, Command::SetTimerInterval { minutes }).await
}

async fn add_preset(State(state): State<HttpState>, Form(form): Form<PresetForm>) -> Response {
    let (Some(label), Some(url)) = (field(form.label), field(form.url)) else {
        return bad_request("Missing label or url");
    };
    run(&state, Command::AddPreset { label, url }).await
}

async fn save_settings(State(state): State<HttpState>) -> Response {
    info!("HTTP API: save settings");
    match state.controller.save().await {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(e) => error_response(e),
    }
}

async fn wake(State(state): State<HttpState>) -> Response {
    run(&state, Command::Wake).await
}
