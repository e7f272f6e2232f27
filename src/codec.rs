//! The 16-byte header framing every IOCtrl exchange, plus the JSON
//! control-plane payload types carried inside it.

use crate::error::{Result, SessionError};

pub const HEADER_LEN: usize = 16;
const MAGIC: u8 = 0x0A;

/// Hello / camera status handshake.
pub const CODE_HELLO_REQ: u16 = 10000;
pub const CODE_HELLO_RESP: u16 = 10001;
/// Auth challenge/response.
pub const CODE_AUTH_REQ: u16 = 10002;
pub const CODE_AUTH_RESP: u16 = 10003;
/// Doorbell hello / status.
pub const CODE_DOORBELL_HELLO_REQ: u16 = 10008;
pub const CODE_DOORBELL_HELLO_RESP: u16 = 10009;
/// Start streaming.
pub const CODE_START_REQ: u16 = 10020;
/// Doorbell "resolving bit" exchange.
pub const CODE_DOORBELL_RESOLVING_REQ: u16 = 10052;
pub const CODE_DOORBELL_RESOLVING_RESP: u16 = 10053;
/// Non-doorbell "resolving bit" exchange.
pub const CODE_RESOLVING_REQ: u16 = 10056;
pub const CODE_RESOLVING_RESP: u16 = 10057;

/// The fixed-size header in front of every control-plane payload: a magic
/// byte, a per-connection protocol-version counter, a reserved u16, the
/// message code, the payload length, and 8 reserved bytes, all
/// little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub code: u16,
    pub payload_len: u16,
}

impl Header {
    fn encode(self, out: &mut Vec<u8>) {
        out.push(MAGIC);
        out.push(self.version);
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&self.code.to_le_bytes());
        out.extend_from_slice(&self.payload_len.to_le_bytes());
        out.extend_from_slice(&[0u8; 8]);
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(SessionError::Protocol(format!(
                "header too short: {} bytes",
                bytes.len()
            )));
        }
        if bytes[0] != MAGIC {
            return Err(SessionError::Protocol(format!(
                "bad magic byte: {:#x}",
                bytes[0]
            )));
        }
        Ok(Header {
            version: bytes[1],
            code: u16::from_le_bytes([bytes[4], bytes[5]]),
            payload_len: u16::from_le_bytes([bytes[6], bytes[7]]),
        })
    }
}

/// A decoded IOCtrl message: header plus raw payload bytes.
#[derive(Debug, Clone)]
pub struct Message {
    pub code: u16,
    pub payload: Vec<u8>,
}

/// Per-connection counter the header's `version` byte carries; bumped on
/// every message this side sends.
#[derive(Debug, Default)]
pub struct VersionCounter(std::sync::atomic::AtomicU8);

impl VersionCounter {
    pub fn new() -> Self {
        Self(std::sync::atomic::AtomicU8::new(0))
    }

    fn next(&self) -> u8 {
        self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}

/// Frame `code` and `payload` into the wire representation.
pub fn encode(counter: &VersionCounter, code: u16, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > u16::MAX as usize {
        return Err(SessionError::Protocol(format!(
            "payload too large: {} bytes",
            payload.len()
        )));
    }
    let header = Header {
        version: counter.next(),
        code,
        payload_len: payload.len() as u16,
    };
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    header.encode(&mut out);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decode one framed message from `bytes`, which must contain exactly the
/// header plus its declared payload (the multiplexer is responsible for
/// buffering partial reads up to that point; this function never reads
/// past `bytes`'s end).
pub fn decode(bytes: &[u8]) -> Result<Message> {
    let header = Header::decode(bytes)?;
    let payload_end = HEADER_LEN + header.payload_len as usize;
    if bytes.len() < payload_end {
        return Err(SessionError::Protocol(format!(
            "truncated payload: declared {} bytes, got {}",
            header.payload_len,
            bytes.len() - HEADER_LEN
        )));
    }
    Ok(Message {
        code: header.code,
        payload: bytes[HEADER_LEN..payload_end].to_vec(),
    })
}

/// Response body of [`CODE_AUTH_RESP`]. `connection_res == "1"` signals
/// the camera accepted the challenge response; `"2"` signals it rejected
/// the derived key outright (bad ENR).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConnectUserAuthResp {
    #[serde(rename = "connectionRes")]
    pub connection_res: String,
    #[serde(rename = "cameraInfo", default)]
    pub camera_info: serde_json::Value,
}

impl ConnectUserAuthResp {
    pub fn accepted(&self) -> bool {
        self.connection_res == "1"
    }
}

/// Body of [`CODE_HELLO_RESP`]: `camera_status == 3` means ready to
/// authenticate; `2` means the camera doesn't recognize this device's ENR.
#[derive(Debug, Clone, Copy)]
pub struct HelloResp {
    pub camera_status: u8,
}

impl HelloResp {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        payload
            .first()
            .copied()
            .map(|camera_status| HelloResp { camera_status })
            .ok_or_else(|| SessionError::Protocol("empty hello response".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_small_payload() {
        let counter = VersionCounter::new();
        let wire = encode(&counter, CODE_HELLO_REQ, b"hi").unwrap();
        let msg = decode(&wire).unwrap();
        assert_eq!(msg.code, CODE_HELLO_REQ);
        assert_eq!(msg.payload, b"hi");
    }

    #[test]
    fn version_counter_increments() {
        let counter = VersionCounter::new();
        let a = encode(&counter, CODE_HELLO_REQ, b"").unwrap();
        let b = encode(&counter, CODE_HELLO_REQ, b"").unwrap();
        assert_eq!(a[1], 0);
        assert_eq!(b[1], 1);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut wire = encode(&VersionCounter::new(), CODE_HELLO_REQ, b"").unwrap();
        wire[0] = 0xFF;
        assert!(decode(&wire).is_err());
    }

    #[test]
    fn auth_resp_accepted() {
        let body: ConnectUserAuthResp =
            serde_json::from_str(r#"{"connectionRes":"1","cameraInfo":{}}"#).unwrap();
        assert!(body.accepted());
    }
}
