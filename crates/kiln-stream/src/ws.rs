// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! WebSocket surface for the stream hub.
//!
//! Each connected socket runs two tasks. The reader half parses inbound
//! [`ClientMessage`] frames and mutates the client's subscription set; any
//! protocol or transport error ends the session and unregisters the
//! client. The writer half drains the client's outbound queue and sends a
//! ping every 30 s; any write error ends it. The hub closes the outbound
//! queue after unregistration, which releases the writer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::interval;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use kiln_core::message::{ClientMessage, MessageType};

use crate::hub::{ClientRegistration, StreamHub};

/// Keep-alive ping cadence.
const PING_INTERVAL: Duration = Duration::from_secs(30);

// =============================================================================
// Router
// =============================================================================

/// Builds the stream router: `/ws` for upgrades, `/healthz` for probes.
pub fn router(hub: Arc<StreamHub>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(health_handler))
        .layer(cors)
        .with_state(hub)
}

/// Serves the stream router until the shutdown future resolves.
pub async fn serve(
    hub: Arc<StreamHub>,
    addr: SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "stream endpoint listening");

    axum::serve(listener, router(hub))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(hub): State<Arc<StreamHub>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

// =============================================================================
// Socket handling
// =============================================================================

async fn handle_socket(socket: WebSocket, hub: Arc<StreamHub>) {
    let registration = match hub.register().await {
        Ok(reg) => reg,
        Err(e) => {
            warn!(error = %e, "rejecting socket, hub unavailable");
            return;
        }
    };
    let client_id = registration.id;
    debug!(%client_id, "websocket connected");

    let (sink, stream) = socket.split();
    let ClientRegistration { id, subs, out_rx } = registration;

    let writer = tokio::spawn(write_pump(sink, out_rx));
    read_pump(stream, &hub, id, &subs).await;

    // Reader is done (client went away or misbehaved); unregistering closes
    // the outbound queue, which in turn releases the writer.
    hub.unregister(id).await;
    let _ = writer.await;
    debug!(%client_id, "websocket closed");
}

async fn read_pump(
    mut stream: SplitStream<WebSocket>,
    hub: &Arc<StreamHub>,
    id: crate::hub::ClientId,
    subs: &Arc<parking_lot::RwLock<crate::hub::SubscriptionSet>>,
) {
    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(_) => break,
        };

        match frame {
            Message::Text(text) => {
                let msg: ClientMessage = match serde_json::from_str(text.as_str()) {
                    Ok(msg) => msg,
                    Err(e) => {
                        debug!(client_id = %id, error = %e, "unparsable client frame");
                        break;
                    }
                };
                handle_client_message(hub, id, subs, msg).await;
            }
            Message::Close(_) => break,
            // Pings are answered by axum; pongs need no action.
            _ => {}
        }
    }
}

async fn handle_client_message(
    hub: &Arc<StreamHub>,
    id: crate::hub::ClientId,
    subs: &Arc<parking_lot::RwLock<crate::hub::SubscriptionSet>>,
    msg: ClientMessage,
) {
    match msg.msg_type {
        MessageType::Subscribe => {
            if let Some(machine_id) = msg.machine_id {
                subs.write().subscribe(machine_id, msg.chamber_id);
            }
        }
        MessageType::Unsubscribe => {
            if let Some(machine_id) = msg.machine_id {
                subs.write()
                    .unsubscribe(&machine_id, msg.chamber_id.as_ref());
            }
        }
        MessageType::History => {
            hub.send_error(id, "not_implemented").await;
        }
        MessageType::Data | MessageType::Error => {
            // Outbound-only kinds; ignore them from clients.
        }
    }
}

async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<Arc<str>>,
) {
    let mut ping = interval(PING_INTERVAL);
    // The first interval tick fires immediately; swallow it so pings start
    // one period in.
    ping.tick().await;

    loop {
        tokio::select! {
            msg = out_rx.recv() => {
                match msg {
                    Some(text) => {
                        if sink
                            .send(Message::Text(text.to_string().into()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    None => {
                        // Queue closed after unregister; say goodbye.
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            _ = ping.tick() => {
                if sink
                    .send(Message::Ping(axum::body::Bytes::new()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }
}
