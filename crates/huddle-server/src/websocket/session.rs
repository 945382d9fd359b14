//! WebSocket session lifecycle: handles a single connected collaborator
//! from upgrade through disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use huddle_core::{PeerId, UserId};
use metrics::{counter, gauge, histogram};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ServerConfig;
use crate::membership::PeerIdentity;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::rpc::context::RpcContext;
use crate::rpc::registry::MethodRegistry;
use crate::rpc::types::{CONNECTION_ESTABLISHED, RpcEvent};

use super::connection::ClientConnection;
use super::handler::{dispatch_request, encode_response, is_relay_method, parse_request};
use super::heartbeat::{HeartbeatResult, run_heartbeat};

/// Outbound queue depth per connection. Fan-out never waits on it.
const SEND_QUEUE_CAPACITY: usize = 1024;

/// How long the writer gets to flush a Close frame on the way out.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Run a WebSocket session for a connected collaborator.
///
/// 1. Mints a fresh peer id and sends `connection.established`
/// 2. Dispatches incoming frames as RPC requests; relay calls run off the
///    inbound loop so a slow host never blocks the caller's other requests
/// 3. Forwards queued responses and events, with periodic Ping frames
/// 4. Drops clients that stay silent past the heartbeat timeout
/// 5. Reaps every piece of participant state on the way out
#[instrument(skip_all, fields(user_id = %user_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    user_id: UserId,
    registry: Arc<MethodRegistry>,
    ctx: Arc<RpcContext>,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) {
    let peer_id = PeerId::new();
    let caller = PeerIdentity::new(peer_id.clone(), user_id.clone());
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(SEND_QUEUE_CAPACITY);
    let connection = Arc::new(ClientConnection::new(
        peer_id.clone(),
        user_id.clone(),
        send_tx,
    ));

    let connection_start = Instant::now();
    info!(peer_id = %peer_id, "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    ctx.membership.connect(peer_id.clone(), user_id.clone());
    ctx.peers.add(Arc::clone(&connection));

    let _ = connection.send_json(&RpcEvent::new(
        CONNECTION_ESTABLISHED,
        json!({ "peerId": peer_id, "userId": user_id }),
    ));

    let session = shutdown.child_token();

    // Outbound forwarder with periodic Ping frames.
    let outbound = {
        let session = session.clone();
        let ping_every = config.heartbeat_interval();
        tokio::spawn(async move {
            let mut ping = tokio::time::interval(ping_every);
            let _ = ping.tick().await;
            loop {
                tokio::select! {
                    msg = send_rx.recv() => {
                        let Some(text) = msg else { break };
                        if ws_tx.send(Message::Text((*text).clone().into())).await.is_err() {
                            break;
                        }
                    }
                    _ = ping.tick() => {
                        if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                            break;
                        }
                    }
                    () = session.cancelled() => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            session.cancel();
        })
    };

    let heartbeat = {
        let connection = Arc::clone(&connection);
        let session = session.clone();
        let interval = config.heartbeat_interval();
        let timeout = config.heartbeat_timeout();
        tokio::spawn(async move {
            if run_heartbeat(connection, interval, timeout, session.clone()).await
                == HeartbeatResult::TimedOut
            {
                warn!("client unresponsive for {timeout:?}, disconnecting");
                session.cancel();
            }
        })
    };

    let mut relays = JoinSet::new();
    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let Some(Ok(msg)) = frame else { break };
                connection.mark_alive();

                let text = match msg {
                    Message::Text(t) => t.to_string(),
                    Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                        Ok(s) => s,
                        Err(_) => {
                            debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                            continue;
                        }
                    },
                    Message::Close(_) => {
                        info!("client sent close frame");
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) => continue,
                };

                let request = match parse_request(&text) {
                    Ok(request) => request,
                    Err(response) => {
                        let _ = connection.send(Arc::new(encode_response(&response)));
                        continue;
                    }
                };

                if is_relay_method(&request.method) {
                    let registry = Arc::clone(&registry);
                    let ctx = Arc::clone(&ctx);
                    let connection = Arc::clone(&connection);
                    let caller = caller.clone();
                    let _ = relays.spawn(async move {
                        let json = dispatch_request(request, &caller, &registry, &ctx).await;
                        if !connection.send(Arc::new(json)) {
                            debug!("failed to enqueue relay response");
                        }
                    });
                } else {
                    let json = dispatch_request(request, &caller, &registry, &ctx).await;
                    if !connection.send(Arc::new(json)) {
                        debug!("failed to enqueue response (channel full or closed)");
                    }
                }
            }
            Some(_) = relays.join_next(), if !relays.is_empty() => {}
            () = session.cancelled() => break,
        }
    }

    // Clean up
    session.cancel();
    relays.shutdown().await;
    ctx.peers.remove(&peer_id);
    if let Some(report) = ctx.membership.disconnect(&peer_id) {
        ctx.reaper.on_disconnect(&report);
    }
    let _ = heartbeat.await;
    let outbound_abort = outbound.abort_handle();
    if tokio::time::timeout(CLOSE_GRACE, outbound).await.is_err() {
        outbound_abort.abort();
    }

    info!(
        peer_id = %peer_id,
        dropped = connection.drop_count(),
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection_start.elapsed().as_secs_f64());
}
