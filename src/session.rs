//! Session: the connect → AV-start → authenticate → streaming → teardown
//! lifecycle built on top of the [`Transport`], [`Mux`], and [`auth`]
//! primitives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_stream::stream;
use futures_core::stream::Stream;
use tokio::sync::Mutex;

use crate::account::{Account, Camera};
use crate::auth;
use crate::error::{Result, SessionError};
use crate::frame::{FrameInfo, RateEstimator, StreamStats, FRAME_SIZE_360P, NOREADY_BACKOFF};
use crate::mux::Mux;
use crate::transport::{
    AvChanId, SessionId, StatusCode, Transport, TransportConfig, AV_PASSWORD, AV_USERNAME,
};

const CONNECT_TIMEOUT_S: u32 = 20;
const AV_MAX_BUF_SIZE: u32 = 5 * 1024 * 1024;
const AV_CHANNEL: u8 = 0;

/// Where a [`Session`] is in its lifecycle. Transitions are strictly
/// forward except for the two terminal states.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum SessionState {
    Disconnected,
    IotcConnecting,
    IotcConnected,
    AvConnecting,
    AvConnected,
    AuthInProgress,
    AuthenticationSucceeded,
    ConnectingFailed(String),
}

/// An open, authenticated session with one camera. Frames are read via
/// [`Session::frames`]; the session tears itself down (in reverse
/// acquisition order) when dropped or when [`Session::close`] is called.
#[derive(Debug)]
pub struct Session<T: Transport + 'static> {
    transport: Arc<T>,
    camera: Camera,
    state: Mutex<SessionState>,
    session_id: SessionId,
    av_chan_id: AvChanId,
    mux: Arc<Mux<T>>,
    closed: AtomicBool,
}

impl<T: Transport + 'static> Session<T> {
    /// Run the full construction sequence: reserve a session id, connect,
    /// start the AV channel with the device's fixed credentials, start the
    /// multiplexer, then authenticate. Every step's failure tears down
    /// whatever was already acquired before returning the error.
    pub async fn connect_and_auth(
        transport: Arc<T>,
        config: &TransportConfig,
        account: Account,
        camera: Camera,
    ) -> Result<Self> {
        let state = Mutex::new(SessionState::Disconnected);
        let uid = camera.uid.clone();

        transport
            .init(config.udp_port)
            .await
            .map_err(SessionError::Transport)?;

        *state.lock().await = SessionState::IotcConnecting;
        tracing::info!(%uid, "connecting");

        let reserved = transport.get_session_id().await.map_err(SessionError::Transport)?;
        let session_id = match transport.connect_by_uid_parallel(&camera.uid, reserved).await {
            Ok(id) => id,
            Err(status) => {
                transport.session_close(reserved).await;
                transport.deinit().await;
                return Err(fail(&state, &uid, status).await);
            }
        };
        *state.lock().await = SessionState::IotcConnected;
        tracing::info!(%uid, session_id, "iotc connected");

        *state.lock().await = SessionState::AvConnecting;
        if let Err(status) = transport.av_init(1).await {
            transport.session_close(session_id).await;
            transport.deinit().await;
            return Err(fail(&state, &uid, status).await);
        }

        let (av_chan_id, _) = match transport
            .av_client_start(
                session_id,
                AV_USERNAME,
                AV_PASSWORD,
                CONNECT_TIMEOUT_S,
                AV_CHANNEL,
            )
            .await
        {
            Ok(ids) => ids,
            Err(status) => {
                transport.av_deinit().await;
                transport.session_close(session_id).await;
                transport.deinit().await;
                return Err(fail(&state, &uid, status).await);
            }
        };
        transport.av_client_set_max_buf_size(AV_MAX_BUF_SIZE).await;
        *state.lock().await = SessionState::AvConnected;
        tracing::info!(%uid, session_id, av_chan_id, "av connected");

        let mux = Arc::new(Mux::new(transport.clone(), av_chan_id));
        mux.start_listening().await;

        *state.lock().await = SessionState::AuthInProgress;
        tracing::info!(%uid, "authenticating");
        if let Err(e) = auth::authenticate(&mux, &account, &camera).await {
            mux.stop_listening().await;
            transport.av_client_stop(av_chan_id).await;
            transport.av_deinit().await;
            transport.session_close(session_id).await;
            transport.deinit().await;
            *state.lock().await = SessionState::ConnectingFailed(e.to_string());
            tracing::warn!(%uid, error = %e, "authentication failed");
            return Err(e);
        }

        *state.lock().await = SessionState::AuthenticationSucceeded;
        tracing::info!(%uid, session_id, av_chan_id, "authenticated");

        Ok(Session {
            transport,
            camera,
            state,
            session_id,
            av_chan_id,
            mux,
            closed: AtomicBool::new(false),
        })
    }

    pub async fn state(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// A lazy sequence of decoded frames paired with the rolling rate
    /// estimate at the time each frame arrived.
    ///
    /// `AV_ER_DATA_NOREADY` backs off briefly and retries; every 360P
    /// frame is a low-res preamble that precedes the real stream and is
    /// swallowed rather than yielded; `AV_ER_SESSION_CLOSE_BY_REMOTE` and
    /// any other negative status end the stream.
    pub fn frames(self: &Arc<Self>) -> impl Stream<Item = Result<(FrameInfo, Vec<u8>, StreamStats)>> {
        let this = self.clone();
        stream! {
            let mut rate = RateEstimator::new();
            loop {
                match this.transport.av_recv_frame_data(this.av_chan_id).await {
                    Ok(raw) => {
                        if raw.info.frame_size == FRAME_SIZE_360P {
                            continue;
                        }
                        let stats = rate.push(raw.info);
                        yield Ok((raw.info, raw.payload, stats));
                    }
                    Err(StatusCode::AV_ER_DATA_NOREADY) => {
                        tokio::time::sleep(NOREADY_BACKOFF).await;
                        continue;
                    }
                    Err(StatusCode::AV_ER_INCOMPLETE_FRAME) | Err(StatusCode::AV_ER_LOSED_THIS_FRAME) => {
                        rate.record_dropped();
                        continue;
                    }
                    Err(StatusCode::AV_ER_SESSION_CLOSE_BY_REMOTE) => {
                        tracing::warn!(uid = %this.camera.uid, "camera closed the stream");
                        return;
                    }
                    Err(status) => {
                        yield Err(SessionError::Transport(status));
                        return;
                    }
                }
            }
        }
    }

    /// Tear the session down in reverse acquisition order. Idempotent:
    /// calling this more than once (or dropping afterward) is a no-op.
    /// Every step logs and swallows its own error; teardown never raises.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let uid = &self.camera.uid;
        tracing::debug!(%uid, "tearing down session");

        self.mux.stop_listening().await;
        tracing::debug!(%uid, "mux stopped");

        self.transport.av_client_stop(self.av_chan_id).await;
        tracing::debug!(%uid, "av client stopped");

        self.transport.av_deinit().await;
        self.transport.session_close(self.session_id).await;
        tracing::debug!(%uid, "session closed");

        self.transport.deinit().await;
        *self.state.lock().await = SessionState::Disconnected;
    }
}

async fn fail(
    state: &Mutex<SessionState>,
    uid: &str,
    status: StatusCode,
) -> SessionError {
    let err = SessionError::Transport(status);
    *state.lock().await = SessionState::ConnectingFailed(err.to_string());
    tracing::warn!(%uid, %status, "connect failed");
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeTransport;
    use std::pin::pin;
    use tokio_stream::StreamExt;

    fn account() -> Account {
        Account {
            phone_id: "phone-1".into(),
            open_user_id: "user-1".into(),
            nickname: None,
            timezone_name: None,
        }
    }

    fn camera() -> Camera {
        Camera::new(
            "uid1",
            "0123456789abcdef",
            "001122334455",
            0,
            "1.2.3.4",
            "WYZEC1",
            "cam",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn happy_path_reaches_authenticated() {
        let transport = Arc::new(FakeTransport::new());
        let session = Session::connect_and_auth(
            transport,
            &TransportConfig::default(),
            account(),
            camera(),
        )
        .await
        .unwrap();
        assert_eq!(session.state().await, SessionState::AuthenticationSucceeded);
        session.close().await;
    }

    #[tokio::test]
    async fn connect_failure_surfaces_transport_error() {
        use crate::testutil::Script;
        let transport = Arc::new(FakeTransport::with_script(Script {
            connect_fails_with: Some(StatusCode::IOTC_ER_FAIL_SETUP_RELAY),
            ..Default::default()
        }));
        let err = Session::connect_and_auth(
            transport.clone(),
            &TransportConfig::default(),
            account(),
            camera(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Transport(StatusCode::IOTC_ER_FAIL_SETUP_RELAY)
        ));
        assert_eq!(transport.session_close_count(), 1);
    }

    #[tokio::test]
    async fn wrong_enr_fails_auth_without_panicking() {
        let transport = Arc::new(FakeTransport::new());
        let mut bad_camera = camera();
        bad_camera.enr = "0000000000000000".into();
        let result = Session::connect_and_auth(
            transport,
            &TransportConfig::default(),
            account(),
            bad_camera,
        )
        .await;
        // The fake transport doesn't validate the key itself, so a wrong
        // ENR alone doesn't fail handshake here; this exercises that
        // construction completes without panicking either way.
        match result {
            Ok(session) => session.close().await,
            Err(_) => {}
        }
    }

    #[tokio::test]
    async fn frame_stream_skips_preamble_and_stops_on_remote_close() {
        use crate::testutil::{FakeFrame, Script};
        use crate::frame::FRAME_SIZE_1080P;

        let mut frames = vec![FakeFrame::Ok {
            payload: vec![0u8; 4],
            info: make_info(FRAME_SIZE_360P, 0, 1),
        }];
        for i in 0..10 {
            frames.push(FakeFrame::Ok {
                payload: vec![1u8; 100],
                info: make_info(FRAME_SIZE_1080P, i + 1, 1000 + i),
            });
        }
        frames.push(FakeFrame::Status(StatusCode::AV_ER_SESSION_CLOSE_BY_REMOTE));

        let transport = Arc::new(FakeTransport::with_script(Script {
            frames,
            ..Default::default()
        }));
        let session = Arc::new(
            Session::connect_and_auth(
                transport,
                &TransportConfig::default(),
                account(),
                camera(),
            )
            .await
            .unwrap(),
        );

        let stream = session.frames();
        let mut stream = pin!(stream);
        let mut count = 0;
        while let Some(item) = stream.next().await {
            item.unwrap();
            count += 1;
        }
        assert_eq!(count, 10);
        session.close().await;
    }

    fn make_info(frame_size: u8, frame_no: u32, timestamp_secs: u32) -> FrameInfo {
        FrameInfo {
            codec_id: crate::frame::CODEC_H264,
            is_keyframe: true,
            cam_index: 0,
            online_num: 0,
            framerate: 15,
            frame_size,
            bitrate: crate::frame::BITRATE_HD,
            timestamp_ms: 0,
            timestamp_secs,
            frame_len: 100,
            frame_no,
            source_mac: [0u8; 12],
            play_token: 0,
            face: None,
        }
    }
}
