use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use shinbot_core::{LiveBroadcaster, VisitRecord};
use tokio::select;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use crate::viewer;

#[derive(Clone)]
pub struct AppState {
    broadcaster: LiveBroadcaster,
}

pub fn router(broadcaster: LiveBroadcaster) -> Router {
    let state = AppState { broadcaster };
    Router::new()
        .route("/healthz", get(healthz))
        .route("/map", get(map_page))
        .route("/ws", get(ws_handler))
        .route("/v1/history", get(history))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn map_page(State(st): State<AppState>) -> Result<Html<String>, AppError> {
    let snapshot = st.broadcaster.history().snapshot();
    Ok(Html(viewer::render_map(&snapshot)?))
}

async fn history(State(st): State<AppState>) -> Json<Vec<VisitRecord>> {
    Json(st.broadcaster.history().snapshot())
}

async fn ws_handler(ws: WebSocketUpgrade, State(st): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| observe(socket, st.broadcaster))
}

/// Streams the snapshot, then live records, to one connection until either
/// side goes away.
async fn observe(socket: WebSocket, broadcaster: LiveBroadcaster) {
    let mut subscription = broadcaster.subscribe();
    let observer = subscription.id();
    let (mut sender, mut receiver) = socket.split();

    let snapshot = subscription.take_snapshot();
    info!(%observer, snapshot = snapshot.len(), "live map connected");
    for record in &snapshot {
        if send_record(&mut sender, record).await.is_err() {
            debug!(%observer, "live map went away during snapshot");
            return;
        }
    }

    loop {
        select! {
            record = subscription.recv() => match record {
                Some(record) => {
                    if send_record(&mut sender, &record).await.is_err() {
                        debug!(%observer, "live map went away");
                        break;
                    }
                }
                None => {
                    warn!(%observer, "live map fell behind; closing");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | None => {
                    debug!(%observer, "live map closed");
                    break;
                }
                Some(Ok(Message::Ping(data))) => {
                    if sender.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    debug!(%observer, error = %e, "websocket error");
                    break;
                }
                _ => {}
            },
        }
    }
}

async fn send_record<S>(sender: &mut S, record: &VisitRecord) -> anyhow::Result<()>
where
    S: futures::Sink<Message, Error = axum::Error> + Unpin,
{
    let json = serde_json::to_string(record)?;
    sender.send(Message::Text(json.into())).await?;
    Ok(())
}

#[derive(Debug)]
pub struct AppError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(value: E) -> Self {
        Self(value.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "request failed");
        let body = Json(serde_json::json!({
            "error": self.0.to_string()
        }));
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}
