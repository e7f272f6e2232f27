//! Crate-wide error taxonomy.

use crate::transport::StatusCode;

pub type Result<T> = std::result::Result<T, SessionError>;

/// All ways a connect/auth/stream operation can fail.
///
/// `Transport` wraps any negative status the native library returns; its
/// `Display` embeds the symbolic name so logs and error chains never
/// surface a bare integer.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(StatusCode),

    #[error("malformed control-plane response: {0}")]
    Protocol(String),

    #[error("camera rejected authentication")]
    AuthRejected,

    #[error("camera rejected the derived key or hello nonce; enr is wrong")]
    AuthBadEnr,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("session channel closed before a pending request completed")]
    ChannelClosed,

    #[error("runtime not initialized; call Runtime::open first")]
    RuntimeNotInitialized,

    #[error("invalid camera descriptor: {0}")]
    InvalidDescriptor(#[from] crate::account::CameraDescriptorError),
}

impl From<StatusCode> for SessionError {
    fn from(code: StatusCode) -> Self {
        SessionError::Transport(code)
    }
}

impl From<crate::frame::UnknownFrameInfoLen> for SessionError {
    fn from(e: crate::frame::UnknownFrameInfoLen) -> Self {
        SessionError::Protocol(e.to_string())
    }
}
