//! Axum WebSocket handler for the realtime bridge.
//!
//! One browser connection maps to one upstream session. After the start
//! handshake two pumps run concurrently (browser→session audio and
//! session→browser audio/events), joined on whichever finishes first, then
//! the session is closed. All browser writes go through a single
//! mutex-guarded writer with a per-frame deadline.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::value::RawValue;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::core::audio::InputFormat;
use crate::core::session::{EventMsg, Session, SessionOutput};
use crate::state::AppState;

use super::error::BridgeError;
use super::messages::{IncomingMessage, OutgoingMessage, default_sample_rate};

const START_DEADLINE: Duration = Duration::from_secs(15);
const READ_DEADLINE: Duration = Duration::from_secs(30);
const WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// Upgrades the HTTP connection and hands it to the bridge.
pub async fn ws_realtime_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_realtime(socket, state))
}

async fn handle_realtime(socket: WebSocket, state: Arc<AppState>) {
    info!("realtime connection established");
    let (sender, mut receiver) = socket.split();
    let writer = WsWriter::new(sender);

    let format = match read_start(&mut receiver).await {
        Ok(format) => format,
        Err(err) => {
            warn!(error = %err, "start handshake failed");
            writer.write_error(&err.to_string()).await;
            return;
        }
    };

    let (session, output) =
        match Session::new(state.config.clone(), format, &state.shutdown).await {
            Ok(parts) => parts,
            Err(err) => {
                warn!(error = %err, "session setup failed");
                writer.write_error(&err.to_string()).await;
                return;
            }
        };

    let result = run_pumps(&writer, &mut receiver, &session, output).await;
    match &result {
        Ok(()) => info!("realtime connection finished"),
        Err(err) => warn!(error = %err, "realtime connection ended with error"),
    }
    session.close().await;
}

async fn run_pumps(
    writer: &WsWriter,
    receiver: &mut SplitStream<WebSocket>,
    session: &Session,
    output: SessionOutput,
) -> Result<(), BridgeError> {
    writer.write_json(&OutgoingMessage::Ready).await?;
    tokio::select! {
        result = frontend_pump(receiver, session) => result,
        result = backend_pump(writer, session, output) => result,
    }
}

/// Expect the `{"type":"start", ...}` text frame within the handshake
/// deadline. Unsupported formats are rejected here, before any upstream
/// resources are touched.
async fn read_start(receiver: &mut SplitStream<WebSocket>) -> Result<InputFormat, BridgeError> {
    let frame = match timeout(START_DEADLINE, receiver.next()).await {
        Err(_) => return Err(BridgeError::StartTimeout),
        Ok(None) => return Err(BridgeError::InvalidStart("connection closed".to_string())),
        Ok(Some(Err(err))) => return Err(BridgeError::Socket(err.to_string())),
        Ok(Some(Ok(frame))) => frame,
    };
    let Message::Text(text) = frame else {
        return Err(BridgeError::InvalidStart("expected a text frame".to_string()));
    };
    match serde_json::from_str::<IncomingMessage>(&text) {
        Ok(IncomingMessage::Start {
            sample_rate,
            encoding,
        }) => {
            let sample_rate = if sample_rate == 0 {
                default_sample_rate()
            } else {
                sample_rate
            };
            Ok(InputFormat {
                sample_rate,
                encoding,
            })
        }
        Ok(_) => Err(BridgeError::InvalidStart(
            "message type is not \"start\"".to_string(),
        )),
        Err(err) => Err(BridgeError::InvalidStart(err.to_string())),
    }
}

/// Browser → session. Binary frames carry PCM; `stop` ends the session
/// cleanly; other text frames are ignored. Backpressure toward the
/// browser comes from blocking this reader, never from a queue.
async fn frontend_pump(
    receiver: &mut SplitStream<WebSocket>,
    session: &Session,
) -> Result<(), BridgeError> {
    loop {
        let frame = match timeout(READ_DEADLINE, receiver.next()).await {
            Err(_) => return Err(BridgeError::ReadTimeout),
            Ok(None) => return Ok(()),
            Ok(Some(Err(err))) => return Err(BridgeError::Socket(err.to_string())),
            Ok(Some(Ok(frame))) => frame,
        };
        match frame {
            Message::Binary(data) => session.push_audio(&data).await?,
            Message::Text(text) => {
                if let Ok(IncomingMessage::Stop) = serde_json::from_str::<IncomingMessage>(&text) {
                    info!("stop requested by browser");
                    return Ok(());
                }
            }
            Message::Close(_) => return Ok(()),
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}

/// Session → browser. Races the audio and event channels; the first one
/// to close ends the pump with the session's sticky error, if any.
/// Relative ordering across the two categories is not guaranteed.
async fn backend_pump(
    writer: &WsWriter,
    session: &Session,
    mut output: SessionOutput,
) -> Result<(), BridgeError> {
    loop {
        tokio::select! {
            audio = output.audio.recv() => match audio {
                Some(data) => {
                    if data.is_empty() {
                        continue;
                    }
                    writer.write_binary(data).await?;
                }
                None => return finish(session),
            },
            event = output.events.recv() => match event {
                Some(event) => writer.write_json(&outgoing_event(event)?).await?,
                None => return finish(session),
            },
        }
    }
}

fn finish(session: &Session) -> Result<(), BridgeError> {
    match session.err() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn outgoing_event(event: EventMsg) -> Result<OutgoingMessage, BridgeError> {
    let payload = serde_json::from_slice::<Box<RawValue>>(&event.payload)?;
    Ok(OutgoingMessage::Event {
        event_id: event.event_id,
        payload,
    })
}

/// Serializes all browser-bound writes and applies the write deadline.
struct WsWriter {
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

impl WsWriter {
    fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    async fn write_json<T: Serialize>(&self, value: &T) -> Result<(), BridgeError> {
        let json = serde_json::to_string(value)?;
        self.send(Message::Text(json.into())).await
    }

    async fn write_binary(&self, data: bytes::Bytes) -> Result<(), BridgeError> {
        self.send(Message::Binary(data)).await
    }

    async fn write_error(&self, message: &str) {
        let frame = OutgoingMessage::Error {
            message: message.to_string(),
        };
        if let Err(err) = self.write_json(&frame).await {
            warn!(error = %err, "failed to report error to browser");
        }
    }

    async fn send(&self, frame: Message) -> Result<(), BridgeError> {
        let mut sink = self.sink.lock().await;
        timeout(WRITE_DEADLINE, sink.send(frame))
            .await
            .map_err(|_| BridgeError::WriteTimeout)?
            .map_err(|e| BridgeError::Socket(e.to_string()))
    }
}
