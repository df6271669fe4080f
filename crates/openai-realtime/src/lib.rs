//! Realtime voice session client.
//!
//! - `transport`: the socket seam and its WebSocket implementation.
//! - `session`: connection lifecycle, reconnects and the single outbound writer.
//! - `dispatch`: routes decoded server events to the conversation, playback
//!   and transcript sink.
//! - `pipeline`: moves audio between the device and the session, suppressing
//!   capture while the agent is speaking.

pub mod config;
mod dispatch;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::{IdleCapture, RealtimeConfig, VadSettings};
pub use error::{SessionError, TransportError};
pub use session::{SessionController, SessionHandle};
pub use transport::{Connector, FrameSink, FrameStream, Inbound, WsConnector};
