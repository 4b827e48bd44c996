use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

use crate::connectivity::{NetworkSettings, SupervisorCommand};
use crate::dispatch::Dispatcher;
use crate::error::{ControllerError, Result};
use crate::live_status::{LiveStatus, SharedStatus};
use crate::peer_client::PeerTransport;
use crate::types::PatternId;

/// Everything the service loop needs. Settings changes go through the
/// supervisor's command channel; nothing here is mutated in place.
pub struct PortalState<T> {
    pub status: Arc<SharedStatus>,
    pub supervisor: mpsc::Sender<SupervisorCommand>,
    pub dispatcher: Dispatcher<T>,
}

impl<T> Clone for PortalState<T> {
    fn clone(&self) -> Self {
        Self {
            status: Arc::clone(&self.status),
            supervisor: self.supervisor.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Ack {
    pub success: bool,
    pub message: String,
}

impl Ack {
    fn ok(message: &str) -> Json<Self> {
        Json(Ack { success: true, message: message.to_string() })
    }

    fn failed(message: String) -> Json<Self> {
        Json(Ack { success: false, message })
    }
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InfoResponse {
    /// Profiles with secrets blanked.
    pub settings: NetworkSettings,
    pub status: LiveStatus,
}

#[derive(Deserialize)]
struct PatternQuery {
    #[serde(rename = "patternChooserChange")]
    pattern: Option<String>,
}

pub fn router<T: PeerTransport + 'static>(state: PortalState<T>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/info", get(info_handler::<T>))
        .route("/save", post(save_handler::<T>))
        .route("/reset", post(reset_handler::<T>))
        .route("/list", get(list_handler))
        .route("/pattern", get(pattern_handler::<T>))
        .route("/update/begin", post(update_begin_handler::<T>))
        .route("/update/end", post(update_end_handler::<T>))
        .route("/generate_204", get(probe_handler))
        .route("/hotspot-detect.html", get(probe_handler))
        .route("/connectivity-check.html", get(probe_handler))
        .fallback(fallback_handler::<T>)
        .with_state(state)
}

pub async fn serve<T: PeerTransport + 'static>(state: PortalState<T>, port: u16) -> Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ControllerError::Service(format!("bind {}: {}", addr, e)))?;
    log::info!("[PORTAL] Listening on http://{}", addr);

    axum::serve(listener, router(state))
        .await
        .map_err(|e| ControllerError::Service(e.to_string()))
}

async fn index_handler() -> &'static str {
    "pattern_spinner\n\nGET  /info          settings and status\nPOST /save          replace network settings\nPOST /reset         restore defaults\nPOST /update/begin  hold off sends and restarts\nPOST /update/end    resume\n"
}

async fn request<R>(
    supervisor: &mpsc::Sender<SupervisorCommand>,
    command: impl FnOnce(oneshot::Sender<R>) -> SupervisorCommand,
) -> Result<R> {
    let (reply, response) = oneshot::channel();
    supervisor
        .send(command(reply))
        .await
        .map_err(|_| ControllerError::SupervisorGone)?;
    response.await.map_err(|_| ControllerError::SupervisorGone)
}

async fn info_handler<T: PeerTransport + 'static>(State(state): State<PortalState<T>>) -> Response {
    match request(&state.supervisor, |reply| SupervisorCommand::Snapshot { reply }).await {
        Ok(settings) => Json(InfoResponse {
            settings: settings.redacted(),
            status: state.status.snapshot(),
        })
        .into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

async fn save_handler<T: PeerTransport + 'static>(
    State(state): State<PortalState<T>>,
    Json(settings): Json<NetworkSettings>,
) -> Response {
    match request(&state.supervisor, |reply| SupervisorCommand::Save { settings, reply }).await {
        Ok(Ok(())) => Ack::ok("Settings saved").into_response(),
        Ok(Err(e)) => (StatusCode::INTERNAL_SERVER_ERROR, Ack::failed(e.to_string())).into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, Ack::failed(e.to_string())).into_response(),
    }
}

async fn reset_handler<T: PeerTransport + 'static>(State(state): State<PortalState<T>>) -> Response {
    match request(&state.supervisor, |reply| SupervisorCommand::Reset { reply }).await {
        Ok(Ok(())) => Ack::ok("Settings reset to defaults").into_response(),
        Ok(Err(e)) => (StatusCode::INTERNAL_SERVER_ERROR, Ack::failed(e.to_string())).into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, Ack::failed(e.to_string())).into_response(),
    }
}

/// This device holds no pattern files of its own.
async fn list_handler() -> Json<Vec<serde_json::Value>> {
    Json(Vec::new())
}

/// Relay a selection to every peer, as if this device had paused on it.
async fn pattern_handler<T: PeerTransport + 'static>(
    State(state): State<PortalState<T>>,
    Query(query): Query<PatternQuery>,
) -> (StatusCode, &'static str) {
    let Some(raw) = query.pattern else {
        return (StatusCode::BAD_REQUEST, "Missing parameter");
    };
    let Some(pattern) = raw.trim().parse::<i64>().ok().and_then(PatternId::new) else {
        return (StatusCode::BAD_REQUEST, "Invalid pattern");
    };
    if state.status.is_update_in_progress() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Update in progress");
    }

    log::info!("[PORTAL] Relaying pattern {}", pattern);
    state.dispatcher.send_to_all(pattern).await;
    (StatusCode::OK, "Pattern set")
}

/// Called by the update transport before it takes over the device. While
/// set, discovery, dispatch and watchdog restarts are held off.
async fn update_begin_handler<T: PeerTransport + 'static>(State(state): State<PortalState<T>>) -> Json<Ack> {
    log::info!("[UPDATE] Update started");
    state.status.set_update_in_progress(true);
    Ack::ok("Update started")
}

async fn update_end_handler<T: PeerTransport + 'static>(State(state): State<PortalState<T>>) -> Json<Ack> {
    log::info!("[UPDATE] Update finished");
    state.status.set_update_in_progress(false);
    Ack::ok("Update finished")
}

async fn probe_handler() -> Redirect {
    Redirect::to("/")
}

async fn fallback_handler<T: PeerTransport + 'static>(State(state): State<PortalState<T>>) -> Response {
    if state.status.is_portal_active() {
        Redirect::to("/").into_response()
    } else {
        (StatusCode::NOT_FOUND, "Not found").into_response()
    }
}
