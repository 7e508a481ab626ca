//! WebSocket client for the upstream speech-dialog service.
//!
//! One client owns exactly one upstream connection; a failed or finished
//! client is never reopened, so each user session constructs a fresh one.
//! Writes are serialized by the sink mutex; reads happen from a single
//! task at a time (the opening handshake, then the session reader, then
//! the close handshake).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::core::protocol::{
    BinaryProtocol, Message, MsgFlags, MsgType, ProtocolError, Serialization,
    flags_contain_sequence, unmarshal,
};

use super::messages::{
    EVENT_CONNECTION_FINISHED, EVENT_CONNECTION_STARTED, EVENT_FINISH_CONNECTION,
    EVENT_FINISH_SESSION, EVENT_SAY_HELLO, EVENT_SESSION_STARTED, EVENT_START_CONNECTION,
    EVENT_START_SESSION, EVENT_USER_QUERY, SayHelloPayload, StartSessionPayload,
};

const DIAL_TIMEOUT: Duration = Duration::from_secs(15);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("client already opened")]
    AlreadyOpened,

    #[error("client not opened")]
    NotOpened,

    #[error("dial upstream: {0}")]
    Dial(String),

    #[error("unexpected {phase} response: type={kind} event={event} payload={payload}")]
    HandshakeRejected {
        phase: &'static str,
        kind: MsgType,
        event: i32,
        payload: String,
    },

    #[error("upstream transport: {0}")]
    Transport(String),

    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("encode payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("unsupported transport frame from upstream")]
    UnsupportedTransportFrame,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Connection {
    sink: Mutex<SplitSink<WsStream, WsMessage>>,
    stream: Mutex<SplitStream<WsStream>>,
}

pub struct UpstreamClient {
    cfg: Arc<Config>,
    session_id: String,
    json_proto: BinaryProtocol,
    raw_proto: BinaryProtocol,
    conn: Option<Connection>,
    closed: AtomicBool,
}

impl UpstreamClient {
    pub fn new(cfg: Arc<Config>) -> Self {
        let mut json_proto = BinaryProtocol::new();
        json_proto.set_serialization(Serialization::Json);
        let mut raw_proto = json_proto.clone();
        raw_proto.set_serialization(Serialization::Raw);

        Self {
            cfg,
            session_id: String::new(),
            json_proto,
            raw_proto,
            conn: None,
            closed: AtomicBool::new(false),
        }
    }

    /// Dial the upstream service and run the two-phase opening handshake:
    /// StartConnection, then StartSession with a fresh session id. Any
    /// failure closes the socket before returning.
    pub async fn open(&mut self) -> Result<(), UpstreamError> {
        if self.conn.is_some() {
            return Err(UpstreamError::AlreadyOpened);
        }

        let request = self.upgrade_request()?;
        let (ws, response) = timeout(DIAL_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| UpstreamError::Dial("dial timed out".to_string()))?
            .map_err(|e| UpstreamError::Dial(e.to_string()))?;
        if let Some(logid) = response
            .headers()
            .get("X-Tt-Logid")
            .and_then(|v| v.to_str().ok())
        {
            info!(logid, "upstream dial succeeded");
        }

        let (sink, stream) = ws.split();
        self.conn = Some(Connection {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        });
        self.session_id = Uuid::new_v4().to_string();

        if let Err(err) = self.start_connection().await {
            self.abort_socket().await;
            return Err(err);
        }
        if let Err(err) = self.start_session().await {
            self.abort_socket().await;
            return Err(err);
        }
        Ok(())
    }

    fn upgrade_request(
        &self,
    ) -> Result<tokio_tungstenite::tungstenite::http::Request<()>, UpstreamError> {
        let api = &self.cfg.api;
        let parsed = url::Url::parse(&api.url)
            .map_err(|e| UpstreamError::Dial(format!("invalid upstream url: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| UpstreamError::Dial("upstream url has no host".to_string()))?;
        let host_header = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        tokio_tungstenite::tungstenite::http::Request::builder()
            .method("GET")
            .uri(api.url.as_str())
            .header("Host", host_header)
            .header("Upgrade", "websocket")
            .header("Connection", "upgrade")
            .header("Sec-WebSocket-Key", generate_key())
            .header("Sec-WebSocket-Version", "13")
            .header("X-Api-Resource-Id", &api.resource_id)
            .header("X-Api-Access-Key", &api.access_key)
            .header("X-Api-App-Key", &api.app_key)
            .header("X-Api-App-ID", &api.app_id)
            .header("X-Api-Connect-Id", Uuid::new_v4().to_string())
            .body(())
            .map_err(|e| UpstreamError::Dial(format!("build upgrade request: {e}")))
    }

    async fn start_connection(&self) -> Result<(), UpstreamError> {
        let mut msg = Message::new(MsgType::FullClient, MsgFlags::WITH_EVENT);
        msg.event = EVENT_START_CONNECTION;
        msg.payload = b"{}".to_vec();
        self.write_message(&msg, Serialization::Json).await?;

        let resp = self.read_message().await?;
        if resp.msg_type != MsgType::FullServer || resp.event != EVENT_CONNECTION_STARTED {
            return Err(handshake_rejected("connection", &resp));
        }
        info!(connect_id = %resp.connect_id, "upstream connection established");
        Ok(())
    }

    async fn start_session(&self) -> Result<(), UpstreamError> {
        let payload = StartSessionPayload::from_settings(&self.cfg.session);
        let mut msg = Message::new(MsgType::FullClient, MsgFlags::WITH_EVENT);
        msg.event = EVENT_START_SESSION;
        msg.session_id = self.session_id.clone();
        msg.payload = serde_json::to_vec(&payload)?;
        self.write_message(&msg, Serialization::Json).await?;

        let resp = self.read_message().await?;
        if resp.msg_type != MsgType::FullServer || resp.event != EVENT_SESSION_STARTED {
            return Err(handshake_rejected("start session", &resp));
        }
        info!(session_id = %resp.session_id, "upstream session started");
        Ok(())
    }

    /// Deliver the opening greeting the service speaks to the user.
    pub async fn say_hello(&self, content: &str) -> Result<(), UpstreamError> {
        let mut msg = Message::new(MsgType::FullClient, MsgFlags::WITH_EVENT);
        msg.event = EVENT_SAY_HELLO;
        msg.session_id = self.session_id.clone();
        msg.payload = serde_json::to_vec(&SayHelloPayload { content })?;
        self.write_message(&msg, Serialization::Json).await
    }

    /// Send one chunk of 16 kHz mono s16le microphone audio.
    pub async fn send_audio(&self, pcm: &[u8]) -> Result<(), UpstreamError> {
        let mut msg = Message::new(MsgType::AudioOnlyClient, MsgFlags::WITH_EVENT);
        msg.event = EVENT_USER_QUERY;
        msg.session_id = self.session_id.clone();
        msg.payload = pcm.to_vec();
        self.write_message(&msg, Serialization::Raw).await
    }

    /// Read the next upstream frame, decoded but uninterpreted. Streaming
    /// reads carry no deadline; cancellation is the caller's concern.
    pub async fn read(&self) -> Result<Message, UpstreamError> {
        self.read_message().await
    }

    async fn read_message(&self) -> Result<Message, UpstreamError> {
        let conn = self.conn.as_ref().ok_or(UpstreamError::NotOpened)?;
        let mut stream = conn.stream.lock().await;
        loop {
            let frame = stream
                .next()
                .await
                .ok_or_else(|| UpstreamError::Transport("connection closed".to_string()))?
                .map_err(|e| UpstreamError::Transport(e.to_string()))?;
            let data = match frame {
                WsMessage::Binary(data) => data,
                WsMessage::Text(text) => text.into(),
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
                _ => return Err(UpstreamError::UnsupportedTransportFrame),
            };
            let (msg, _) = unmarshal(&data, flags_contain_sequence)?;
            return Ok(msg);
        }
    }

    async fn write_message(
        &self,
        msg: &Message,
        serialization: Serialization,
    ) -> Result<(), UpstreamError> {
        let conn = self.conn.as_ref().ok_or(UpstreamError::NotOpened)?;
        let proto = match serialization {
            Serialization::Raw => &self.raw_proto,
            _ => &self.json_proto,
        };
        let frame = proto.marshal(msg)?;
        let mut sink = conn.sink.lock().await;
        timeout(WRITE_TIMEOUT, sink.send(WsMessage::Binary(frame.into())))
            .await
            .map_err(|_| UpstreamError::Transport("write timed out".to_string()))?
            .map_err(|e| UpstreamError::Transport(e.to_string()))
    }

    /// Drive the closing handshake and release the socket. Idempotent; a
    /// no-op when the client was never opened. Handshake failures are
    /// logged and do not prevent the socket from closing.
    pub async fn close(&self) {
        if self.conn.is_none() || self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let result = timeout(CLOSE_TIMEOUT, async {
            if let Err(err) = self.finish_session().await {
                warn!(error = %err, "finish session failed");
            }
            if let Err(err) = self.finish_connection().await {
                warn!(error = %err, "finish connection failed");
            }
        })
        .await;
        if result.is_err() {
            warn!("upstream close handshake timed out");
        }

        if let Some(conn) = &self.conn {
            let _ = conn.sink.lock().await.close().await;
        }
    }

    async fn finish_session(&self) -> Result<(), UpstreamError> {
        let mut msg = Message::new(MsgType::FullClient, MsgFlags::WITH_EVENT);
        msg.event = EVENT_FINISH_SESSION;
        msg.session_id = self.session_id.clone();
        msg.payload = b"{}".to_vec();
        self.write_message(&msg, Serialization::Json).await
    }

    async fn finish_connection(&self) -> Result<(), UpstreamError> {
        let mut msg = Message::new(MsgType::FullClient, MsgFlags::WITH_EVENT);
        msg.event = EVENT_FINISH_CONNECTION;
        msg.payload = b"{}".to_vec();
        self.write_message(&msg, Serialization::Json).await?;

        let resp = self.read_message().await?;
        if resp.msg_type != MsgType::FullServer || resp.event != EVENT_CONNECTION_FINISHED {
            return Err(handshake_rejected("finish connection", &resp));
        }
        Ok(())
    }

    /// Best-effort socket teardown after a failed opening handshake.
    async fn abort_socket(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _ = conn.sink.lock().await.close().await;
        }
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn handshake_rejected(phase: &'static str, resp: &Message) -> UpstreamError {
    UpstreamError::HandshakeRejected {
        phase,
        kind: resp.msg_type,
        event: resp.event,
        payload: String::from_utf8_lossy(&resp.payload).into_owned(),
    }
}
