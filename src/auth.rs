//! Authentication Protocol: the challenge/response handshake keyed on
//! camera identity, run once the AV channel is open and before any frame
//! is read.

use std::time::Duration;

use md5::{Digest, Md5};

use crate::account::{Account, Camera};
use crate::codec::{self, ConnectUserAuthResp, HelloResp};
use crate::error::{Result, SessionError};
use crate::mux::Mux;
use crate::transport::Transport;

const IOCTRL_TIMEOUT: Duration = Duration::from_secs(5);
/// The camera is ready to authenticate once its hello response reports
/// this status.
const CAMERA_STATUS_READY: u8 = 3;
/// Hello status meaning the camera doesn't recognize this device's ENR.
const CAMERA_STATUS_BAD_ENR: u8 = 2;
/// Auth response meaning the camera rejected the key derived from this
/// device's ENR, distinct from a generic rejection.
const AUTH_RES_BAD_ENR: &str = "2";

/// Run the full sequence: hello, derive the key from the returned nonce,
/// send the auth request, and (for non-doorbell cameras) the trailing
/// "resolving bit" exchange. Returns once the camera has accepted.
pub async fn authenticate<T: Transport + 'static>(
    mux: &Mux<T>,
    account: &Account,
    camera: &Camera,
) -> Result<()> {
    let nonce = send_hello(mux, camera).await?;
    let key = derive_key(camera, &nonce)?;
    send_auth(mux, account, camera, &key).await?;
    send_resolving_bit(mux, camera).await?;
    Ok(())
}

async fn send_hello<T: Transport + 'static>(mux: &Mux<T>, camera: &Camera) -> Result<String> {
    let (req, resp) = if camera.is_doorbell() {
        (codec::CODE_DOORBELL_HELLO_REQ, codec::CODE_DOORBELL_HELLO_RESP)
    } else {
        (codec::CODE_HELLO_REQ, codec::CODE_HELLO_RESP)
    };

    let msg = mux.send_and_await(req, b"", resp, IOCTRL_TIMEOUT).await?;
    let hello = HelloResp::decode(&msg.payload)?;
    if hello.camera_status == CAMERA_STATUS_BAD_ENR {
        return Err(SessionError::AuthBadEnr);
    }
    if hello.camera_status != CAMERA_STATUS_READY {
        return Err(SessionError::Protocol(format!(
            "camera not ready to authenticate (status {})",
            hello.camera_status
        )));
    }

    // The nonce is the remainder of the hello payload after the status
    // byte: a 16-character ASCII string.
    let nonce = String::from_utf8(msg.payload[1..].to_vec())
        .map_err(|_| SessionError::Protocol("hello nonce is not valid UTF-8".into()))?;
    if nonce.len() != 16 {
        return Err(SessionError::Protocol(format!(
            "hello nonce has unexpected length {}",
            nonce.len()
        )));
    }
    Ok(nonce)
}

/// `md5(enr)[:16] XOR nonce`.
fn derive_key(camera: &Camera, nonce: &str) -> Result<[u8; 16]> {
    if camera.enr.len() != 16 {
        return Err(SessionError::AuthBadEnr);
    }
    let digest = Md5::digest(camera.enr.as_bytes());
    let mut key = [0u8; 16];
    for (i, b) in nonce.as_bytes().iter().enumerate().take(16) {
        key[i] = digest[i] ^ b;
    }
    Ok(key)
}

async fn send_auth<T: Transport + 'static>(
    mux: &Mux<T>,
    account: &Account,
    camera: &Camera,
    key: &[u8; 16],
) -> Result<()> {
    // TODO: the exact wire layout of phone_id/open_user_id/key beyond the
    // key-derivation step is not documented anywhere reachable; this
    // assembles a JSON body mirroring the response shape the camera sends
    // back, which is sufficient for the fake transport and matches the
    // control-plane's JSON convention elsewhere, but the true native
    // encoding of this request may differ and needs verification against
    // a real device capture.
    let body = serde_json::json!({
        "phoneId": account.phone_id,
        "openUserId": account.open_user_id,
        "key": hex::encode(key),
    });
    let payload = serde_json::to_vec(&body).map_err(|e| SessionError::Protocol(e.to_string()))?;

    let msg = mux
        .send_and_await(
            codec::CODE_AUTH_REQ,
            &payload,
            codec::CODE_AUTH_RESP,
            IOCTRL_TIMEOUT,
        )
        .await?;

    let resp: ConnectUserAuthResp =
        serde_json::from_slice(&msg.payload).map_err(|e| SessionError::Protocol(e.to_string()))?;
    if resp.connection_res == AUTH_RES_BAD_ENR {
        return Err(SessionError::AuthBadEnr);
    }
    if !resp.accepted() {
        return Err(SessionError::AuthRejected);
    }
    Ok(())
}

async fn send_resolving_bit<T: Transport + 'static>(mux: &Mux<T>, camera: &Camera) -> Result<()> {
    let (req, resp) = if camera.is_doorbell() {
        (
            codec::CODE_DOORBELL_RESOLVING_REQ,
            codec::CODE_DOORBELL_RESOLVING_RESP,
        )
    } else {
        (codec::CODE_RESOLVING_REQ, codec::CODE_RESOLVING_RESP)
    };
    mux.send_and_await(req, b"", resp, IOCTRL_TIMEOUT).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::testutil::FakeTransport;

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
    async fn authenticates_against_fake_transport() {
        let transport = Arc::new(FakeTransport::new());
        let mux = Mux::new(transport.clone(), 1);
        mux.start_listening().await;

        authenticate(&mux, &account(), &camera()).await.unwrap();

        mux.stop_listening().await;
    }

    #[tokio::test]
    async fn rejects_bad_enr() {
        let mut cam = camera();
        cam.enr = "short".into();
        let key_err = derive_key(&cam, "0123456789abcdef").unwrap_err();
        assert!(matches!(key_err, SessionError::AuthBadEnr));
    }

    #[tokio::test]
    async fn wrong_enr_at_hello_is_distinct_from_not_ready() {
        use crate::testutil::Script;

        let transport = Arc::new(FakeTransport::with_script(Script {
            bad_enr_at_hello: true,
            ..Default::default()
        }));
        let mux = Mux::new(transport.clone(), 1);
        mux.start_listening().await;

        let err = authenticate(&mux, &account(), &camera()).await.unwrap_err();
        assert!(matches!(err, SessionError::AuthBadEnr));

        mux.stop_listening().await;
    }

    #[tokio::test]
    async fn wrong_enr_at_auth_is_distinct_from_generic_rejection() {
        use crate::testutil::Script;

        let transport = Arc::new(FakeTransport::with_script(Script {
            bad_enr_at_auth: true,
            ..Default::default()
        }));
        let mux = Mux::new(transport.clone(), 1);
        mux.start_listening().await;

        let err = authenticate(&mux, &account(), &camera()).await.unwrap_err();
        assert!(matches!(err, SessionError::AuthBadEnr));

        mux.stop_listening().await;
    }

    #[tokio::test]
    async fn doorbell_uses_distinct_codes() {
        let transport = Arc::new(FakeTransport::new());
        let mux = Mux::new(transport.clone(), 1);
        mux.start_listening().await;

        let mut cam = camera();
        cam.product_model = "WYZEDB3".into();
        authenticate(&mux, &account(), &cam).await.unwrap();

        mux.stop_listening().await;
    }
}
