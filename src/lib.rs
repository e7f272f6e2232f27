//! Session and control-plane engine for authenticated peer-to-peer camera
//! audio/video streams.
//!
//! A caller supplies an [`account::Account`] identity and an
//! [`account::Camera`] descriptor to [`session::Session::connect_and_auth`]
//! and gets back an open, authenticated session from which decoded video
//! frames can be read via [`session::Session::frames`] until closed.
//!
//! Everything here sits atop an opaque [`transport::Transport`] — the
//! native P2P transport library itself is an external collaborator this
//! crate never links against directly, which is what makes the session,
//! multiplexer, and authentication logic testable against the in-memory
//! fake in [`testutil`].

pub mod account;
pub mod auth;
pub mod codec;
pub mod error;
pub mod frame;
pub mod mux;
pub mod runtime;
pub mod session;
pub mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod testutil;

pub use account::{Account, Camera};
pub use error::{Result, SessionError};
pub use frame::{FrameInfo, StreamStats};
pub use runtime::Runtime;
pub use session::{Session, SessionState};
pub use transport::{StatusCode, Transport, TransportConfig};
