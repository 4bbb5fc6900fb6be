//! Connection adapter: runs one client socket from upgrade through detach.
//!
//! The socket is split into an outbound pump (hub queue → socket) running as
//! its own task and an inbound pump (socket → hub) running inline. Whichever
//! ends first cancels the other. On exit the adapter always sends a detach;
//! the hub ignores it if the link was already dropped or replaced.

use std::time::Instant;

use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket};
use chat_core::Envelope;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::hub::{outbound_queue, ConnectionId, HubHandle, OutboundReceiver, Outgoing};
use crate::metrics::{
    PROTOCOL_VIOLATIONS_TOTAL, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_CONNECTION_DURATION_SECONDS, WS_DISCONNECTIONS_TOTAL,
};

/// Serve one upgraded socket.
///
/// 1. Attaches to the hub with `token`; a missing or rejected token closes
///    the socket with a policy-violation frame
/// 2. Forwards hub output to the socket
/// 3. Decodes inbound frames and hands them to the hub
/// 4. Detaches on exit
#[instrument(skip_all)]
pub async fn run_connection(
    mut ws: WebSocket,
    token: Option<String>,
    hub: HubHandle,
    outbound_capacity: usize,
) {
    counter!(WS_CONNECTIONS_TOTAL).increment(1);

    let Some(token) = token else {
        warn!("connection without session token");
        reject(&mut ws, "missing session token").await;
        return;
    };

    let (tx, rx) = outbound_queue(outbound_capacity);
    let attached = match hub.attach(token, tx).await {
        Ok(attached) => attached,
        Err(e) => {
            warn!(error = %e, "attach failed, closing socket");
            reject(&mut ws, "unauthorized").await;
            return;
        }
    };
    let conn = attached.conn;
    let started = Instant::now();
    info!(%conn, name = %attached.name, resumed = attached.resumed, "client connected");
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let (ws_tx, ws_rx) = ws.split();
    let cancel = CancellationToken::new();
    let outbound = tokio::spawn(outbound_pump(ws_tx, rx, cancel.clone(), conn));

    inbound_pump(ws_rx, &hub, conn, &cancel).await;

    cancel.cancel();
    if hub.detach(conn).await.is_err() {
        debug!(%conn, "hub already closed at detach");
    }
    let _ = outbound.await;

    info!(%conn, "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

async fn inbound_pump(
    mut ws_rx: futures::stream::SplitStream<WebSocket>,
    hub: &HubHandle,
    conn: ConnectionId,
    cancel: &CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            () = cancel.cancelled() => break,
            msg = ws_rx.next() => msg,
        };
        let text = match msg {
            Some(Ok(Message::Text(text))) => text.to_string(),
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    counter!(PROTOCOL_VIOLATIONS_TOTAL).increment(1);
                    info!(%conn, len = data.len(), "received non-UTF8 binary frame");
                    continue;
                }
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) => {
                info!(%conn, "client sent close frame");
                break;
            }
            Some(Err(e)) => {
                debug!(%conn, error = %e, "socket read failed");
                break;
            }
            None => break,
        };

        match Envelope::decode(&text) {
            Ok(envelope) => {
                if hub.inbound(conn, envelope).await.is_err() {
                    info!(%conn, "hub closed, ending session");
                    break;
                }
            }
            Err(e) => {
                counter!(PROTOCOL_VIOLATIONS_TOTAL).increment(1);
                warn!(%conn, error = %e, "dropping malformed envelope");
            }
        }
    }
}

async fn outbound_pump(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: OutboundReceiver,
    cancel: CancellationToken,
    conn: ConnectionId,
) {
    loop {
        let item = tokio::select! {
            () = cancel.cancelled() => break,
            item = rx.recv() => item,
        };
        let Some(item) = item else {
            debug!(%conn, "hub dropped the link");
            break;
        };
        let written = match item {
            Outgoing::Frame(frame) => write_frame(&mut ws_tx, &frame).await,
            Outgoing::Batch(frames) => {
                let mut ok = true;
                for frame in &frames {
                    if !write_frame(&mut ws_tx, frame).await {
                        ok = false;
                        break;
                    }
                }
                ok
            }
        };
        if !written {
            debug!(%conn, "socket write failed");
            break;
        }
    }
    cancel.cancel();
    let _ = ws_tx.close().await;
}

async fn write_frame(ws_tx: &mut SplitSink<WebSocket, Message>, frame: &str) -> bool {
    ws_tx
        .send(Message::Text(Utf8Bytes::from(frame.to_owned())))
        .await
        .is_ok()
}

async fn reject(ws: &mut WebSocket, reason: &'static str) {
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: Utf8Bytes::from_static(reason),
    };
    let _ = ws.send(Message::Close(Some(frame))).await;
}
