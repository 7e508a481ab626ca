//! Client for the upstream end-to-end speech-dialog service.

mod client;
pub mod messages;

pub use client::{UpstreamClient, UpstreamError};
pub use messages::{
    EVENT_CONNECTION_FINISHED, EVENT_CONNECTION_STARTED, EVENT_FINISH_CONNECTION,
    EVENT_FINISH_SESSION, EVENT_SAY_HELLO, EVENT_SESSION_FAILED, EVENT_SESSION_FINISHED,
    EVENT_SESSION_STARTED, EVENT_START_CONNECTION, EVENT_START_SESSION, EVENT_USER_QUERY,
};
