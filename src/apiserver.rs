// apiserver.rs

use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, Method, Response, StatusCode},
    response::IntoResponse,
    routing::*,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::{net::SocketAddr, sync::atomic::Ordering};
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::{Any, CorsLayer};

use crate::*;

pub async fn run_api_server(state: Arc<Pin<Box<BridgeState>>>) -> anyhow::Result<()> {
    let listen = format!("0.0.0.0:{}", state.config.port);
    let addr = listen.parse::<SocketAddr>()?;

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(target: "api", "API server listening to {listen}");
    serve_api(listener, state).await
}

pub async fn serve_api(
    listener: tokio::net::TcpListener,
    state: Arc<Pin<Box<BridgeState>>>,
) -> anyhow::Result<()> {
    Ok(axum::serve(listener, api_router(state).into_make_service()).await?)
}

pub fn api_router(state: Arc<Pin<Box<BridgeState>>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/ws", get(get_ws))
        .route("/status", get(get_status))
        .layer(cors)
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct StatusView {
    pub firmware: &'static str,
    pub built: &'static str,
    pub conditions: Vec<StatusCondition>,
    pub station: StationState,
    pub network: Option<String>,
    pub ap_stations: Vec<String>,
    pub serial: SerialAvailability,
}

impl StatusView {
    pub fn collect(state: &BridgeState) -> Self {
        Self {
            firmware: FW_VERSION,
            built: FW_TIMESTAMP,
            conditions: state.status.snapshot().to_vec(),
            station: state.wifi.state(),
            network: state.wifi.current_network(),
            ap_stations: state
                .wifi
                .ap_stations()
                .iter()
                .map(ToString::to_string)
                .collect(),
            serial: SerialAvailability {
                available: state.serial.is_device_connected(),
                baud_rate: state.serial.baud_rate(),
            },
        }
    }
}

pub async fn get_status(State(state): State<Arc<Pin<Box<BridgeState>>>>) -> Response<Body> {
    let cnt = state.api_cnt.fetch_add(1, Ordering::Relaxed);
    info!(target: "api", "#{cnt} get_status()");

    // the radio lock can be held by a running scan
    match tokio::task::spawn_blocking(move || StatusView::collect(&state)).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => {
            let msg = format!("Status collection failed: {e}");
            error!(target: "api", "{msg}");
            (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response()
        }
    }
}

pub async fn get_ws(
    State(state): State<Arc<Pin<Box<BridgeState>>>>,
    ws: WebSocketUpgrade,
) -> Response<Body> {
    let cnt = state.api_cnt.fetch_add(1, Ordering::Relaxed);
    info!(target: "api", "#{cnt} get_ws()");
    ws.on_upgrade(move |socket| handle_client(state, socket, cnt))
}

async fn handle_client(state: Arc<Pin<Box<BridgeState>>>, socket: WebSocket, cnt: u64) {
    let (mut sink, mut stream) = socket.split();
    let mut events = state.events.subscribe();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<String>();

    // new clients learn the serial state right away
    let _ = reply_tx.send(serial_availability(
        state.serial.is_device_connected(),
        state.serial.baud_rate(),
    ));

    let mut send_task = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                Some(reply) = reply_rx.recv() => reply,
                ev = events.recv() => match ev {
                    Ok(text) => text,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(target: "api", "#{cnt} client lagging, {n} events dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => {
                    if let Some(reply) = Box::pin(execute(state.clone(), text.as_str())).await {
                        if reply_tx.send(reply).is_err() {
                            break;
                        }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    };
    info!(target: "api", "#{cnt} client disconnected");
}

// EOF
