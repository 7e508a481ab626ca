//! The bridging engine: wire codec, PCM pipeline, upstream client, and
//! the per-user session that ties them together.

pub mod audio;
pub mod protocol;
pub mod session;
pub mod upstream;
