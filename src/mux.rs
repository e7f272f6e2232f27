//! Pipelines many request/response control exchanges over one
//! `av_send_io_ctrl`/`av_recv_io_ctrl` channel, matching responses to
//! pending requests concurrently with frame reception.
//!
//! A single background task owns the only `av_recv_io_ctrl` call in the
//! process for a given channel — no lock is ever held across that call,
//! so a slow or hanging camera can't block unrelated submitters.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::codec::{self, Message, VersionCounter};
use crate::error::{Result, SessionError};
use crate::transport::{AvChanId, StatusCode, Transport};

type PendingTable = Arc<Mutex<HashMap<u16, VecDeque<oneshot::Sender<Message>>>>>;

/// Request/response multiplexer for one AV channel.
#[derive(Debug)]
pub struct Mux<T: Transport> {
    transport: Arc<T>,
    av_chan_id: AvChanId,
    counter: VersionCounter,
    pending: PendingTable,
    closed: Arc<AtomicBool>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport + 'static> Mux<T> {
    pub fn new(transport: Arc<T>, av_chan_id: AvChanId) -> Self {
        Self {
            transport,
            av_chan_id,
            counter: VersionCounter::new(),
            pending: Arc::new(Mutex::new(HashMap::new())),
            closed: Arc::new(AtomicBool::new(false)),
            listener: Mutex::new(None),
        }
    }

    /// Spawn the background listener task. Idempotent: a second call is a
    /// no-op while a listener is already running.
    pub async fn start_listening(&self) {
        let mut slot = self.listener.lock().await;
        if slot.is_some() {
            return;
        }
        let transport = self.transport.clone();
        let av_chan_id = self.av_chan_id;
        let pending = self.pending.clone();
        let closed = self.closed.clone();
        *slot = Some(tokio::spawn(listen_loop(transport, av_chan_id, pending, closed)));
    }

    /// Stop the listener task and wake any still-pending requests with
    /// [`SessionError::ChannelClosed`].
    pub async fn stop_listening(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
        }
        wake_all_closed(&self.pending).await;
    }

    /// Send a control request and await the matching response, up to
    /// `timeout`. Responses are matched to waiters FIFO within the same
    /// expected response code.
    pub async fn send_and_await(
        &self,
        req_code: u16,
        payload: &[u8],
        resp_code: u16,
        timeout: Duration,
    ) -> Result<Message> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::ChannelClosed);
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.entry(resp_code).or_default().push_back(tx);
        }

        let wire = codec::encode(&self.counter, req_code, payload)?;
        self.transport
            .av_send_io_ctrl(self.av_chan_id, req_code as u32, &wire)
            .await
            .map_err(SessionError::Transport)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(msg)) => Ok(msg),
            Ok(Err(_)) => Err(SessionError::ChannelClosed),
            Err(_) => Err(SessionError::Timeout("ioctrl response")),
        }
    }
}

async fn listen_loop(
    transport: Arc<impl Transport>,
    av_chan_id: AvChanId,
    pending: PendingTable,
    closed: Arc<AtomicBool>,
) {
    const POLL_TIMEOUT_MS: u32 = 500;

    loop {
        if closed.load(Ordering::SeqCst) {
            return;
        }
        match transport.av_recv_io_ctrl(av_chan_id, POLL_TIMEOUT_MS).await {
            Ok(raw) => match codec::decode(&raw.bytes) {
                Ok(msg) => dispatch(&pending, msg).await,
                Err(e) => tracing::warn!(error = %e, "discarding malformed ioctrl frame"),
            },
            Err(StatusCode::AV_ER_TIMEOUT) => continue,
            Err(StatusCode::AV_ER_SESSION_CLOSE_BY_REMOTE) => {
                tracing::warn!("camera closed the session; waking all pending requests");
                closed.store(true, Ordering::SeqCst);
                wake_all_closed(&pending).await;
                return;
            }
            Err(status) => {
                tracing::warn!(%status, "ioctrl receive failed; stopping listener");
                closed.store(true, Ordering::SeqCst);
                wake_all_closed(&pending).await;
                return;
            }
        }
    }
}

async fn dispatch(pending: &PendingTable, msg: Message) {
    let mut table = pending.lock().await;
    match table.get_mut(&msg.code).and_then(VecDeque::pop_front) {
        Some(waiter) => {
            tracing::debug!(code = msg.code, "dispatched ioctrl response");
            let _ = waiter.send(msg);
        }
        None => {
            tracing::warn!(code = msg.code, "discarding unmatched ioctrl response");
        }
    }
}

async fn wake_all_closed(pending: &PendingTable) {
    let mut table = pending.lock().await;
    for (_, mut waiters) in table.drain() {
        while let Some(waiter) = waiters.pop_front() {
            drop(waiter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeTransport;

    #[tokio::test]
    async fn send_and_await_matches_hello_response() {
        let transport = Arc::new(FakeTransport::new());
        let mux = Mux::new(transport.clone(), 1);
        mux.start_listening().await;

        let resp = mux
            .send_and_await(
                codec::CODE_HELLO_REQ,
                b"",
                codec::CODE_HELLO_RESP,
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(resp.code, codec::CODE_HELLO_RESP);

        mux.stop_listening().await;
    }

    #[tokio::test]
    async fn stop_listening_wakes_pending_with_channel_closed() {
        let transport = Arc::new(FakeTransport::new());
        let mux = Arc::new(Mux::new(transport, 1));
        // Don't start the listener: the request will never resolve until
        // stop_listening wakes it.
        let mux2 = mux.clone();
        let handle = tokio::spawn(async move {
            mux2.send_and_await(
                codec::CODE_HELLO_REQ,
                b"",
                codec::CODE_HELLO_RESP,
                Duration::from_secs(5),
            )
            .await
        });
        tokio::task::yield_now().await;
        mux.stop_listening().await;
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(SessionError::ChannelClosed)));
    }
}
