//! In-memory fake [`Transport`], for this crate's own tests and for
//! downstream consumers who want to exercise their code against this
//! library without real hardware (feature `test-util`).
//!
//! Mirrors the behavior of a real camera closely enough to drive the
//! authentication sequence and a short frame stream: it tracks which
//! handshake step it has seen and replies with the same codes/payload
//! shapes the protocol documents, rather than a generic echo.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::codec;
use crate::frame::FrameInfo;
use crate::transport::{AvChanId, RawFrame, RawIoCtrl, SessionId, SessionInfo, StatusCode, Transport};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Step {
    #[default]
    Initial,
    GotHello,
    GotAuth,
    GotResolvingBit,
}

/// Configures what [`FakeTransport`] does once the handshake completes.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Status to fail `connect_by_uid_parallel` with; `None` succeeds.
    pub connect_fails_with: Option<StatusCode>,
    /// Status to fail the auth IOCtrl exchange with (simulates no reply).
    pub auth_times_out: bool,
    /// Camera rejects the auth response (`connectionRes == "0"`).
    pub reject_auth: bool,
    /// Camera reports it doesn't recognize this device's ENR at the hello
    /// step (`camera_status == 2`).
    pub bad_enr_at_hello: bool,
    /// Camera rejects the derived key at the auth step
    /// (`connectionRes == "2"`).
    pub bad_enr_at_auth: bool,
    /// Frames to hand back from `av_recv_frame_data`, in order, once
    /// streaming starts.
    pub frames: Vec<FakeFrame>,
}

#[derive(Debug, Clone)]
pub enum FakeFrame {
    Ok { payload: Vec<u8>, info: FrameInfo },
    Status(StatusCode),
}

#[derive(Debug)]
pub struct FakeTransport {
    inner: Mutex<Inner>,
    next_session_id: AtomicI32,
    session_close_count: AtomicU32,
    av_client_stop_count: AtomicU32,
}

#[derive(Debug)]
struct Inner {
    step: Step,
    script: Script,
    frame_queue: VecDeque<FakeFrame>,
    pending_responses: VecDeque<Vec<u8>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::with_script(Script::default())
    }

    pub fn with_script(script: Script) -> Self {
        let frame_queue = script.frames.clone().into();
        Self {
            inner: Mutex::new(Inner {
                step: Step::Initial,
                script,
                frame_queue,
                pending_responses: VecDeque::new(),
            }),
            next_session_id: AtomicI32::new(1),
            session_close_count: AtomicU32::new(0),
            av_client_stop_count: AtomicU32::new(0),
        }
    }

    /// Number of times `session_close` has been called.
    pub fn session_close_count(&self) -> u32 {
        self.session_close_count.load(Ordering::SeqCst)
    }

    /// Number of times `av_client_stop` has been called.
    pub fn av_client_stop_count(&self) -> u32 {
        self.av_client_stop_count.load(Ordering::SeqCst)
    }
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn init(&self, _udp_port: u16) -> Result<(), StatusCode> {
        Ok(())
    }

    async fn deinit(&self) {}

    async fn get_version(&self) -> u32 {
        1
    }

    async fn get_session_id(&self) -> Result<SessionId, StatusCode> {
        Ok(self.next_session_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn connect_by_uid_parallel(
        &self,
        _uid: &str,
        session_id: SessionId,
    ) -> Result<SessionId, StatusCode> {
        let inner = self.inner.lock().unwrap();
        match inner.script.connect_fails_with {
            Some(status) => Err(status),
            None => Ok(session_id),
        }
    }

    async fn session_check(&self, _session_id: SessionId) -> Result<SessionInfo, StatusCode> {
        Ok(SessionInfo {
            mode: crate::transport::ConnectionMode::P2p,
            c_or_d: 0,
            nat_type: 0,
            is_secure: true,
            tx_packet_count: 0,
            rx_packet_count: 0,
        })
    }

    async fn session_close(&self, _session_id: SessionId) {
        self.session_close_count.fetch_add(1, Ordering::SeqCst);
    }

    async fn av_init(&self, _max_channels: u32) -> Result<u32, StatusCode> {
        Ok(1)
    }

    async fn av_deinit(&self) {}

    async fn av_client_start(
        &self,
        _session_id: SessionId,
        _username: &str,
        _password: &str,
        _timeout_s: u32,
        _channel: u8,
    ) -> Result<(AvChanId, u32), StatusCode> {
        Ok((1, 0))
    }

    async fn av_client_set_max_buf_size(&self, _bytes: u32) {}

    async fn av_client_stop(&self, _av_chan_id: AvChanId) {
        self.av_client_stop_count.fetch_add(1, Ordering::SeqCst);
    }

    async fn av_send_io_ctrl(
        &self,
        _av_chan_id: AvChanId,
        _ctrl_type: u32,
        bytes: &[u8],
    ) -> Result<(), StatusCode> {
        let msg = codec::decode(bytes).map_err(|_| StatusCode(-46))?;
        let mut inner = self.inner.lock().unwrap();
        if let Some(bytes) = respond(&mut inner, msg.code, &msg.payload) {
            inner.pending_responses.push_back(bytes);
        }
        Ok(())
    }

    async fn av_recv_io_ctrl(
        &self,
        _av_chan_id: AvChanId,
        timeout_ms: u32,
    ) -> Result<RawIoCtrl, StatusCode> {
        let popped = {
            let mut inner = self.inner.lock().unwrap();
            inner.pending_responses.pop_front()
        };
        match popped {
            Some(bytes) => {
                let msg = codec::decode(&bytes).expect("fake transport encodes valid frames");
                Ok(RawIoCtrl {
                    ctrl_type: msg.code as u32,
                    bytes,
                })
            }
            None => {
                tokio::time::sleep(std::time::Duration::from_millis((timeout_ms / 10) as u64))
                    .await;
                Err(StatusCode::AV_ER_TIMEOUT)
            }
        }
    }

    async fn av_recv_frame_data(&self, _av_chan_id: AvChanId) -> Result<RawFrame, StatusCode> {
        let mut inner = self.inner.lock().unwrap();
        match inner.frame_queue.pop_front() {
            Some(FakeFrame::Ok { payload, info }) => Ok(RawFrame {
                frame_index: info.frame_no,
                payload,
                info,
            }),
            Some(FakeFrame::Status(status)) => Err(status),
            None => Err(StatusCode::AV_ER_DATA_NOREADY),
        }
    }
}

/// Dispatches one decoded request to the matching mock responder, mirroring
/// the handshake step tracking a real camera's control firmware performs.
fn respond(inner: &mut Inner, code: u16, _payload: &[u8]) -> Option<Vec<u8>> {
    let counter = codec::VersionCounter::new();
    match code {
        codec::CODE_HELLO_REQ | codec::CODE_DOORBELL_HELLO_REQ => {
            inner.step = Step::GotHello;
            let resp_code = if code == codec::CODE_DOORBELL_HELLO_REQ {
                codec::CODE_DOORBELL_HELLO_RESP
            } else {
                codec::CODE_HELLO_RESP
            };
            let status: u8 = if inner.script.bad_enr_at_hello { 2 } else { 3 };
            let mut payload = vec![status];
            payload.extend_from_slice(b"0123456789abcdef");
            Some(codec::encode(&counter, resp_code, &payload).unwrap())
        }
        codec::CODE_AUTH_REQ => {
            if inner.step != Step::GotHello || inner.script.auth_times_out {
                return None;
            }
            inner.step = Step::GotAuth;
            let connection_res = if inner.script.bad_enr_at_auth {
                "2"
            } else if inner.script.reject_auth {
                "0"
            } else {
                "1"
            };
            let body = serde_json::json!({
                "connectionRes": connection_res,
                "cameraInfo": {},
            });
            let bytes = serde_json::to_vec(&body).unwrap();
            Some(codec::encode(&counter, codec::CODE_AUTH_RESP, &bytes).unwrap())
        }
        codec::CODE_RESOLVING_REQ | codec::CODE_DOORBELL_RESOLVING_REQ => {
            if inner.step != Step::GotAuth {
                return None;
            }
            inner.step = Step::GotResolvingBit;
            let resp_code = if code == codec::CODE_DOORBELL_RESOLVING_REQ {
                codec::CODE_DOORBELL_RESOLVING_RESP
            } else {
                codec::CODE_RESOLVING_RESP
            };
            Some(codec::encode(&counter, resp_code, &[1u8]).unwrap())
        }
        _ => None,
    }
}
