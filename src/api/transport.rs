//! Listener transports
//!
//! Frame writers for the two live-listening connections: a WebSocket that
//! receives each frame as a JSON text message, and a chunked HTTP response
//! that receives newline-delimited JSON.

use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    extract::ws::{Message as WsMessage, WebSocket},
    http::header,
    response::{IntoResponse, Response},
};
use futures::{
    stream::{SplitSink, StreamExt as _},
    SinkExt as _,
};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bus::EventBus;
use crate::error::{PilosaError, Result};
use crate::hub::{relay, BroadcastFrame, FrameWriter};

/// Chunks buffered between the relay and a streaming response body
pub const STREAM_CHANNEL_CAPACITY: usize = 16;

/// Sends frames as JSON text messages on a WebSocket
pub struct SocketWriter {
    sink: SplitSink<WebSocket, WsMessage>,
}

#[async_trait]
impl FrameWriter for SocketWriter {
    async fn write_frame(&mut self, frame: &BroadcastFrame) -> Result<()> {
        let text = serde_json::to_string(frame)?;
        self.sink
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| PilosaError::Other(format!("websocket send failed: {}", e)))
    }
}

/// Relay bus traffic onto an upgraded WebSocket until either side goes away
pub async fn serve_socket(socket: WebSocket, bus: Arc<dyn EventBus>, close: CancellationToken) {
    let (sink, mut stream) = socket.split();

    // Incoming messages are ignored; a close frame or a dead stream ends the relay
    let reader_close = close.clone();
    let reader = tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            match message {
                Ok(WsMessage::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
        reader_close.cancel();
    });

    info!("WebSocket listener connected");
    let mut writer = SocketWriter { sink };
    let report = relay(bus.as_ref(), &mut writer, close).await;
    reader.abort();

    if let Err(e) = writer.sink.close().await {
        debug!("WebSocket close failed: {}", e);
    }
    info!(
        "WebSocket listener disconnected ({:?}, {} frames)",
        report.outcome, report.frames_sent
    );
}

/// Feeds newline-delimited JSON frames into a response body
pub struct StreamWriter {
    tx: mpsc::Sender<Bytes>,
}

impl StreamWriter {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl FrameWriter for StreamWriter {
    async fn write_frame(&mut self, frame: &BroadcastFrame) -> Result<()> {
        let mut line = serde_json::to_vec(frame)?;
        line.push(b'\n');
        self.tx
            .send(Bytes::from(line))
            .await
            .map_err(|_| PilosaError::Other("stream listener disconnected".to_string()))
    }
}

/// Build a chunked NDJSON response relaying bus traffic.
///
/// The relay runs in its own task and stops once the body is dropped or
/// `close` is cancelled.
pub fn stream_response(bus: Arc<dyn EventBus>, close: CancellationToken) -> Response {
    let (tx, rx) = mpsc::channel::<Bytes>(STREAM_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let watcher_tx = tx.clone();
        let watcher_close = close.clone();
        let watcher = tokio::spawn(async move {
            watcher_tx.closed().await;
            watcher_close.cancel();
        });

        info!("Stream listener connected");
        let mut writer = StreamWriter::new(tx);
        let report = relay(bus.as_ref(), &mut writer, close).await;
        watcher.abort();
        info!(
            "Stream listener disconnected ({:?}, {} frames)",
            report.outcome, report.frames_sent
        );
    });

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    ([(header::CONTENT_TYPE, "application/x-ndjson")], body).into_response()
}
