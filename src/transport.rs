//! Transport Capability
//!
//! Thin abstract surface over the native P2P transport library. All
//! operations are blocking-safe and thread-safe unless noted; negative
//! status codes are errors. The core never links against the vendor SDK
//! directly — it consumes this trait, which keeps the session/auth/mux
//! logic portable and testable against an in-memory fake (see
//! [`crate::testutil`]).

use async_trait::async_trait;
use std::fmt;

/// A raw status code as returned by the native transport. Negative values
/// are errors; the well-known families are named so error messages don't
/// surface a bare integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StatusCode(pub i32);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(0);

    pub const AV_ER_TIMEOUT: StatusCode = StatusCode(-20011);
    pub const AV_ER_DATA_NOREADY: StatusCode = StatusCode(-20012);
    pub const AV_ER_INCOMPLETE_FRAME: StatusCode = StatusCode(-20013);
    pub const AV_ER_LOSED_THIS_FRAME: StatusCode = StatusCode(-20014);
    pub const AV_ER_SESSION_CLOSE_BY_REMOTE: StatusCode = StatusCode(-20015);
    pub const IOTC_ER_FAIL_SETUP_RELAY: StatusCode = StatusCode(-42);

    pub fn is_ok(self) -> bool {
        self.0 >= 0
    }

    /// Symbolic name for the well-known codes in the vendor SDK's error
    /// taxonomy, falling back to the raw integer for anything else.
    pub fn name(self) -> &'static str {
        match self.0 {
            -1 => "IOTC_ER_SERVER_NOT_RESPONSE",
            -2 => "IOTC_ER_FAIL_RESOLVE_HOSTNAME",
            -3 => "IOTC_ER_ALREADY_INITIALIZED",
            -4 => "IOTC_ER_FAIL_CREATE_MUTEX",
            -5 => "IOTC_ER_FAIL_CREATE_THREAD",
            -6 => "IOTC_ER_FAIL_CREATE_SOCKET",
            -12 => "IOTC_ER_NOT_INITIALIZED",
            -13 => "IOTC_ER_TIMEOUT",
            -14 => "IOTC_ER_INVALID_SID",
            -15 => "IOTC_ER_UNKNOWN_DEVICE",
            -18 => "IOTC_ER_EXCEED_MAX_SESSION",
            -19 => "IOTC_ER_CAN_NOT_FIND_DEVICE",
            -22 => "IOTC_ER_SESSION_CLOSE_BY_REMOTE",
            -23 => "IOTC_ER_REMOTE_TIMEOUT_DISCONNECT",
            -42 => "IOTC_ER_FAIL_SETUP_RELAY",
            -43 => "IOTC_ER_NOT_SUPPORT_RELAY",
            -46 => "IOTC_ER_INVALID_ARG",
            -20000 => "AV_ER_INVALID_ARG",
            -20003 => "AV_ER_MEM_INSUFF",
            -20008 => "AV_ER_CLIENT_NO_AVLOGIN",
            -20009 => "AV_ER_WRONG_VIEWACCorPWD",
            -20010 => "AV_ER_INVALID_SID",
            -20011 => "AV_ER_TIMEOUT",
            -20012 => "AV_ER_DATA_NOREADY",
            -20013 => "AV_ER_INCOMPLETE_FRAME",
            -20014 => "AV_ER_LOSED_THIS_FRAME",
            -20015 => "AV_ER_SESSION_CLOSE_BY_REMOTE",
            -20016 => "AV_ER_REMOTE_TIMEOUT_DISCONNECT",
            -20019 => "AV_ER_NOT_INITIALIZED",
            -20023 => "AV_ER_NO_PERMISSION",
            _ => "UNKNOWN_STATUS",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

/// Result of [`Transport::session_check`]: a read-only snapshot of the
/// connection the transport negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SessionInfo {
    pub mode: ConnectionMode,
    /// Raw client-or-device byte as reported by the transport; 0 = client.
    pub c_or_d: u8,
    pub nat_type: u8,
    pub is_secure: bool,
    pub tx_packet_count: u32,
    pub rx_packet_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ConnectionMode {
    P2p,
    Relay,
    Lan,
}

impl ConnectionMode {
    pub fn from_raw(v: u8) -> Self {
        match v {
            1 => ConnectionMode::Relay,
            2 => ConnectionMode::Lan,
            _ => ConnectionMode::P2p,
        }
    }
}

/// A transport-issued session id, reserved by [`Transport::get_session_id`]
/// and bound by [`Transport::connect_by_uid_parallel`].
pub type SessionId = i32;
/// A transport-issued AV channel id, returned by [`Transport::av_client_start`].
pub type AvChanId = i32;

/// Raw IOCtrl frame as handed back by `av_recv_io_ctrl`: the numeric
/// control-type tag the transport reports alongside the bytes. This is
/// distinct from the wire header's `code` field decoded in [`crate::codec`]
/// — the transport's `ctrl_type` and the codec's header `code` carry the
/// same value in practice, but the trait keeps them separately typed so a
/// fake transport can't accidentally bypass decoding.
#[derive(Debug, Clone)]
pub struct RawIoCtrl {
    pub ctrl_type: u32,
    pub bytes: Vec<u8>,
}

/// Outcome of [`Transport::av_recv_frame_data`].
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub payload: Vec<u8>,
    pub info: crate::frame::FrameInfo,
    pub frame_index: u32,
}

/// Abstract surface over the native P2P transport library.
///
/// Implementors are `Send + Sync`: the multiplexer's listener task and a
/// caller's streaming loop hold references to the same transport
/// concurrently.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn init(&self, udp_port: u16) -> Result<(), StatusCode>;
    async fn deinit(&self);

    async fn get_version(&self) -> u32;

    async fn get_session_id(&self) -> Result<SessionId, StatusCode>;
    async fn connect_by_uid_parallel(
        &self,
        uid: &str,
        session_id: SessionId,
    ) -> Result<SessionId, StatusCode>;
    async fn session_check(&self, session_id: SessionId) -> Result<SessionInfo, StatusCode>;
    async fn session_close(&self, session_id: SessionId);

    async fn av_init(&self, max_channels: u32) -> Result<u32, StatusCode>;
    async fn av_deinit(&self);
    async fn av_client_start(
        &self,
        session_id: SessionId,
        username: &str,
        password: &str,
        timeout_s: u32,
        channel: u8,
    ) -> Result<(AvChanId, u32), StatusCode>;
    async fn av_client_set_max_buf_size(&self, bytes: u32);
    async fn av_client_stop(&self, av_chan_id: AvChanId);

    async fn av_send_io_ctrl(
        &self,
        av_chan_id: AvChanId,
        ctrl_type: u32,
        bytes: &[u8],
    ) -> Result<(), StatusCode>;
    async fn av_recv_io_ctrl(
        &self,
        av_chan_id: AvChanId,
        timeout_ms: u32,
    ) -> Result<RawIoCtrl, StatusCode>;

    async fn av_recv_frame_data(&self, av_chan_id: AvChanId) -> Result<RawFrame, StatusCode>;
}

/// Credentials the transport expects for `av_client_start` on this device
/// family — fixed, not derived from the account.
pub const AV_USERNAME: &str = "admin";
pub const AV_PASSWORD: &str = "888888";

/// Library search order for the native transport, used only by the
/// out-of-core loader the caller supplies; kept here so `Runtime::open`
/// can document the default without owning the loading itself.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub udp_port: u16,
    pub library_search_paths: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            udp_port: 0,
            library_search_paths: vec![
                "/usr/local/lib/libIOTCAPIs_ALL.dylib".to_string(),
                "/usr/local/lib/libIOTCAPIs_ALL.so".to_string(),
            ],
        }
    }
}
