use thiserror::Error;

/// Errors surfaced by the bus transport layer.
#[derive(Debug, Error)]
pub enum BusError {
    /// Connection could not be established (network, auth, bad address).
    #[error("broker connection error: {0}")]
    Connection(String),

    /// Protocol-level failure on an established connection.
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),

    /// `send`/`consume`/`declare_queue` called outside the
    /// connect–close window.
    #[error("transport is not connected")]
    NotConnected,

    /// Publish or consume against a queue nobody declared.
    #[error("queue '{0}' has not been declared")]
    UnknownQueue(String),

    /// Backend-agnostic transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}
