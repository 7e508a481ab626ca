//! Per-user session: one upstream client, one PCM pipeline, one reader
//! task, and the two bounded channels the bridge drains toward the
//! browser.
//!
//! The reader task owns the channel senders; when it returns for any
//! reason both channels close and their consumers observe end-of-stream.
//! Terminal failures land in a write-once error slot (first error wins)
//! and trigger the session's cancellation token.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::core::audio::{AudioError, InputFormat, PcmProcessor};
use crate::core::protocol::MsgType;
use crate::core::upstream::{EVENT_SESSION_FAILED, EVENT_SESSION_FINISHED, UpstreamClient};

/// Capacity of the outbound audio and event channels. Bounds per-session
/// memory; the audio side blocks the reader when full, the event side
/// drops.
const CHANNEL_CAPACITY: usize = 64;

/// Terminal session failures. Clonable so the sticky slot can hand the
/// first error to every later observer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("upstream error code={code} payload={payload}")]
    Upstream { code: u32, payload: String },

    #[error("read from upstream: {0}")]
    Read(String),

    #[error("audio pipeline: {0}")]
    Audio(#[from] AudioError),

    #[error("upstream client: {0}")]
    Client(String),
}

impl From<crate::core::upstream::UpstreamError> for SessionError {
    fn from(err: crate::core::upstream::UpstreamError) -> Self {
        Self::Client(err.to_string())
    }
}

/// One upstream dialog event, payload copied out of the codec buffer.
#[derive(Debug, Clone)]
pub struct EventMsg {
    pub event_id: i32,
    pub payload: Bytes,
}

/// Receive ends of the session's outbound streams. Handed to the caller
/// exactly once, at construction.
pub struct SessionOutput {
    pub audio: mpsc::Receiver<Bytes>,
    pub events: mpsc::Receiver<EventMsg>,
}

pub struct Session {
    client: Arc<UpstreamClient>,
    processor: Mutex<PcmProcessor>,
    cancel: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
    err: Arc<ErrorSlot>,
}

impl Session {
    /// Open the upstream connection, deliver the greeting, and launch the
    /// reader task. On failure every partially constructed resource is
    /// released before returning.
    pub async fn new(
        cfg: Arc<Config>,
        format: InputFormat,
        parent: &CancellationToken,
    ) -> Result<(Self, SessionOutput), SessionError> {
        let processor = PcmProcessor::new(format)?;
        let mut client = UpstreamClient::new(cfg.clone());
        if let Err(err) = client.open().await {
            return Err(SessionError::Client(format!("open upstream session: {err}")));
        }

        let greeting = format!(
            "你好，我是{}，有什么可以帮助你的吗？",
            cfg.session.dialog.bot_name
        );
        if let Err(err) = client.say_hello(&greeting).await {
            client.close().await;
            return Err(SessionError::Client(format!("send greeting: {err}")));
        }

        let client = Arc::new(client);
        let cancel = parent.child_token();
        let (audio_tx, audio_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let err = Arc::new(ErrorSlot::default());

        let reader = tokio::spawn(reader_task(
            client.clone(),
            audio_tx,
            event_tx,
            cancel.clone(),
            err.clone(),
        ));

        let session = Self {
            client,
            processor: Mutex::new(processor),
            cancel,
            reader: Mutex::new(Some(reader)),
            err,
        };
        let output = SessionOutput {
            audio: audio_rx,
            events: event_rx,
        };
        Ok((session, output))
    }

    /// Feed one browser audio frame through the pipeline and upstream.
    /// After cancellation this reports the sticky error, if any, and
    /// otherwise quietly discards the frame.
    pub async fn push_audio(&self, frame: &[u8]) -> Result<(), SessionError> {
        if frame.is_empty() {
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            return match self.err() {
                Some(err) => Err(err),
                None => Ok(()),
            };
        }
        let pcm = self.processor.lock().process(frame)?;
        if pcm.is_empty() {
            return Ok(());
        }
        self.client.send_audio(&pcm).await.map_err(Into::into)
    }

    /// The first terminal error, if any.
    pub fn err(&self) -> Option<SessionError> {
        self.err.get()
    }

    /// Cancel, join the reader task, then close the upstream client.
    pub async fn close(&self) {
        self.cancel.cancel();
        let handle = self.reader.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "session reader task failed to join");
            }
        }
        self.client.close().await;
    }
}

/// Write-once slot for the session's first terminal error.
#[derive(Default)]
struct ErrorSlot(Mutex<Option<SessionError>>);

impl ErrorSlot {
    /// Record `err` if the slot is empty. Returns whether this call won.
    fn set(&self, err: SessionError) -> bool {
        let mut slot = self.0.lock();
        if slot.is_none() {
            *slot = Some(err);
            true
        } else {
            false
        }
    }

    fn get(&self) -> Option<SessionError> {
        self.0.lock().clone()
    }
}

fn fail(slot: &ErrorSlot, cancel: &CancellationToken, err: SessionError) {
    if slot.set(err) {
        cancel.cancel();
    }
}

/// Drains the upstream socket until cancellation, a close sentinel, or a
/// terminal error. Dropping the senders on return closes both channels.
async fn reader_task(
    client: Arc<UpstreamClient>,
    audio_tx: mpsc::Sender<Bytes>,
    event_tx: mpsc::Sender<EventMsg>,
    cancel: CancellationToken,
    err: Arc<ErrorSlot>,
) {
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => return,
            result = client.read() => match result {
                Ok(msg) => msg,
                Err(read_err) => {
                    fail(&err, &cancel, SessionError::Read(read_err.to_string()));
                    return;
                }
            },
        };

        match msg.msg_type {
            MsgType::AudioOnlyServer => {
                // The decode buffer is reused; the payload must not escape
                // to consumers without a copy.
                let payload = Bytes::copy_from_slice(&msg.payload);
                tokio::select! {
                    result = audio_tx.send(payload) => {
                        if result.is_err() {
                            return;
                        }
                    }
                    _ = cancel.cancelled() => return,
                }
            }
            MsgType::FullServer
                if msg.event == EVENT_SESSION_FINISHED || msg.event == EVENT_SESSION_FAILED =>
            {
                info!(event = msg.event, "upstream session closed");
                return;
            }
            MsgType::FullServer => {
                let event = EventMsg {
                    event_id: msg.event,
                    payload: Bytes::copy_from_slice(&msg.payload),
                };
                if let Err(mpsc::error::TrySendError::Full(_)) = event_tx.try_send(event) {
                    warn!(event = msg.event, "event channel full, dropping event");
                }
            }
            MsgType::Error => {
                fail(
                    &err,
                    &cancel,
                    SessionError::Upstream {
                        code: msg.error_code,
                        payload: String::from_utf8_lossy(&msg.payload).into_owned(),
                    },
                );
                return;
            }
            other => {
                info!(kind = %other, event = msg.event, "ignoring upstream message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_slot_keeps_the_first_error() {
        let slot = ErrorSlot::default();
        assert!(slot.get().is_none());

        assert!(slot.set(SessionError::Read("socket reset".to_string())));
        assert!(!slot.set(SessionError::Upstream {
            code: 1,
            payload: "late".to_string(),
        }));

        assert_eq!(
            slot.get(),
            Some(SessionError::Read("socket reset".to_string()))
        );
    }

    #[test]
    fn fail_cancels_only_on_first_error() {
        let slot = ErrorSlot::default();
        let cancel = CancellationToken::new();

        fail(&slot, &cancel, SessionError::Read("boom".to_string()));
        assert!(cancel.is_cancelled());

        let second = CancellationToken::new();
        fail(&slot, &second, SessionError::Read("later".to_string()));
        assert!(!second.is_cancelled());
    }

    #[test]
    fn upstream_error_message_includes_code_and_payload() {
        let err = SessionError::Upstream {
            code: 55_000_001,
            payload: r#"{"error":"quota exceeded"}"#.to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("55000001"));
        assert!(text.contains("quota exceeded"));
    }
}
