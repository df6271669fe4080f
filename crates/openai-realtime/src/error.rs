use parley_core::audio::AudioDeviceError;

/// Failures of the realtime socket. Each one ends the current connection and
/// feeds the reconnect budget.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("failed to send frame: {0}")]
    Send(String),
    #[error("failed to receive frame: {0}")]
    Receive(String),
    #[error("connection is not active")]
    NotConnected,
    #[error("session has shut down")]
    Closed,
}

/// Conditions that end a session for good.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("gave up after {attempts} reconnect attempts")]
    Exhausted { attempts: u32 },
    #[error(transparent)]
    Audio(#[from] AudioDeviceError),
}
