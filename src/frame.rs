//! Frame metadata and streaming-rate estimation.
//!
//! [`FrameInfo`] mirrors the struct the transport hands back alongside
//! every video frame; two wire variants exist, distinguished by their
//! exact byte length, and are folded into one Rust type with an optional
//! face-detection box rather than exposed as a tagged union, since the
//! extra fields are purely additive.

use std::collections::VecDeque;
use std::time::Duration;

pub const CODEC_H264: u16 = 78;
pub const CODEC_H265: u16 = 80;

pub const FRAME_SIZE_1080P: u8 = 0;
pub const FRAME_SIZE_360P: u8 = 1;
pub const FRAME_SIZE_DOORBELL_HD: u8 = 3;
pub const FRAME_SIZE_DOORBELL_SD: u8 = 4;

pub const BITRATE_360P: u8 = 0x1E;
pub const BITRATE_SD: u8 = 0x3C;
pub const BITRATE_HD: u8 = 0x78;
pub const BITRATE_SUPER_HD: u8 = 0x96;
pub const BITRATE_SUPER_SUPER_HD: u8 = 0xF0;

/// Size, in bytes, of the wire struct without the face-detection
/// extension: codec_id(2) is_keyframe(1) cam_index(1) online_num(1)
/// framerate(1) frame_size(1) bitrate(1) timestamp_ms(4) timestamp(4)
/// frame_len(4) frame_no(4) ac_mac_addr(12) n_play_token(4) = 40.
pub const FRAME_INFO_LEN: usize = 40;
/// [`FRAME_INFO_LEN`] plus a trailing `{x, y, width, height}` face box,
/// four `u16`s = 48.
pub const FRAME_INFO3_LEN: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct FaceBox {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct FrameInfo {
    pub codec_id: u16,
    pub is_keyframe: bool,
    pub cam_index: u8,
    /// Undocumented by the vendor SDK beyond its name; passed through
    /// unchanged for callers that want to log it.
    pub online_num: u8,
    pub framerate: u8,
    pub frame_size: u8,
    pub bitrate: u8,
    pub timestamp_ms: u32,
    pub timestamp_secs: u32,
    pub frame_len: u32,
    pub frame_no: u32,
    pub source_mac: [u8; 12],
    pub play_token: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face: Option<FaceBox>,
}

/// Error decoding a `FrameInfo` struct of unrecognized length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized frame-info struct length: {0} bytes")]
pub struct UnknownFrameInfoLen(pub usize);

impl FrameInfo {
    /// Decode the struct the transport returns alongside a frame,
    /// selecting the variant by exact length match.
    pub fn decode(bytes: &[u8]) -> Result<Self, UnknownFrameInfoLen> {
        match bytes.len() {
            FRAME_INFO_LEN => Ok(Self::decode_base(bytes, None)),
            FRAME_INFO3_LEN => {
                let face = FaceBox {
                    x: u16::from_le_bytes([bytes[40], bytes[41]]),
                    y: u16::from_le_bytes([bytes[42], bytes[43]]),
                    width: u16::from_le_bytes([bytes[44], bytes[45]]),
                    height: u16::from_le_bytes([bytes[46], bytes[47]]),
                };
                Ok(Self::decode_base(bytes, Some(face)))
            }
            other => Err(UnknownFrameInfoLen(other)),
        }
    }

    fn decode_base(b: &[u8], face: Option<FaceBox>) -> Self {
        let mut source_mac = [0u8; 12];
        source_mac.copy_from_slice(&b[24..36]);
        FrameInfo {
            codec_id: u16::from_le_bytes([b[0], b[1]]),
            is_keyframe: b[2] != 0,
            cam_index: b[3],
            online_num: b[4],
            framerate: b[5],
            frame_size: b[6],
            bitrate: b[7],
            timestamp_ms: u32::from_le_bytes([b[8], b[9], b[10], b[11]]),
            timestamp_secs: u32::from_le_bytes([b[12], b[13], b[14], b[15]]),
            frame_len: u32::from_le_bytes([b[16], b[17], b[18], b[19]]),
            frame_no: u32::from_le_bytes([b[20], b[21], b[22], b[23]]),
            source_mac,
            play_token: i32::from_le_bytes([b[36], b[37], b[38], b[39]]),
            face,
        }
    }
}

/// Rate estimate computed over a rolling window of recent [`FrameInfo`]:
/// bytes/s and fps derived from the window's timestamp span. Zeroed when
/// the window can't support an estimate (fewer than two samples, or
/// non-positive elapsed time).
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct StreamStats {
    pub bytes_per_sec: f64,
    pub frames_per_sec: f64,
    pub dropped_frames: u64,
}

const STATS_WINDOW: usize = 210;

#[derive(Debug)]
pub struct RateEstimator {
    window: VecDeque<FrameInfo>,
    dropped: u64,
}

impl RateEstimator {
    pub fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(STATS_WINDOW),
            dropped: 0,
        }
    }

    pub fn record_dropped(&mut self) {
        self.dropped += 1;
    }

    /// Push a newly received frame and recompute the rolling estimate.
    pub fn push(&mut self, info: FrameInfo) -> StreamStats {
        if self.window.len() >= STATS_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(info);
        self.estimate()
    }

    fn estimate(&self) -> StreamStats {
        if self.window.len() < 2 {
            return StreamStats {
                dropped_frames: self.dropped,
                ..Default::default()
            };
        }
        let first = self.window.front().unwrap();
        let last = self.window.back().unwrap();

        let t_first = first.timestamp_secs as f64 + first.timestamp_ms as f64 / 1_000.0;
        let t_last = last.timestamp_secs as f64 + last.timestamp_ms as f64 / 1_000.0;
        let dt = t_last - t_first;

        if dt <= 0.0 {
            return StreamStats {
                dropped_frames: self.dropped,
                ..Default::default()
            };
        }

        let total_bytes: u64 = self.window.iter().map(|f| f.frame_len as u64).sum();
        StreamStats {
            bytes_per_sec: total_bytes as f64 / dt,
            frames_per_sec: (self.window.len() - 1) as f64 / dt,
            dropped_frames: self.dropped,
        }
    }
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// Sleep used by the streaming loop on `AV_ER_DATA_NOREADY`.
pub const NOREADY_BACKOFF: Duration = Duration::from_millis(25);

#[cfg(test)]
mod tests {
    use super::*;

    fn base_buf() -> Vec<u8> {
        let mut b = vec![0u8; FRAME_INFO_LEN];
        b[0..2].copy_from_slice(&CODEC_H264.to_le_bytes());
        b[2] = 1; // is_keyframe
        b[3] = 7; // cam_index
        b[4] = 2; // online_num
        b[5] = 20; // framerate
        b[6] = FRAME_SIZE_1080P;
        b[7] = BITRATE_HD;
        b[8..12].copy_from_slice(&500u32.to_le_bytes()); // timestamp_ms
        b[12..16].copy_from_slice(&1_700_000_000u32.to_le_bytes()); // timestamp_secs
        b[16..20].copy_from_slice(&65536u32.to_le_bytes()); // frame_len
        b[20..24].copy_from_slice(&42u32.to_le_bytes()); // frame_no
        b[24..36].copy_from_slice(b"\xaa\xbb\xcc\xdd\xee\xff\x00\x11\x22\x33\x44\x55");
        b[36..40].copy_from_slice(&(-1i32).to_le_bytes()); // play_token
        b
    }

    #[test]
    fn decodes_base_struct() {
        let buf = base_buf();
        let info = FrameInfo::decode(&buf).unwrap();
        assert_eq!(info.codec_id, CODEC_H264);
        assert!(info.is_keyframe);
        assert_eq!(info.cam_index, 7);
        assert_eq!(info.online_num, 2);
        assert_eq!(info.framerate, 20);
        assert_eq!(info.frame_size, FRAME_SIZE_1080P);
        assert_eq!(info.bitrate, BITRATE_HD);
        assert_eq!(info.timestamp_ms, 500);
        assert_eq!(info.timestamp_secs, 1_700_000_000);
        assert_eq!(info.frame_len, 65536);
        assert_eq!(info.frame_no, 42);
        assert_eq!(
            info.source_mac,
            [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55]
        );
        assert_eq!(info.play_token, -1);
        assert_eq!(info.face, None);
    }

    #[test]
    fn decodes_face_variant() {
        let mut buf = base_buf();
        buf.extend_from_slice(&100u16.to_le_bytes());
        buf.extend_from_slice(&200u16.to_le_bytes());
        buf.extend_from_slice(&50u16.to_le_bytes());
        buf.extend_from_slice(&60u16.to_le_bytes());
        assert_eq!(buf.len(), FRAME_INFO3_LEN);

        let info = FrameInfo::decode(&buf).unwrap();
        assert_eq!(
            info.face,
            Some(FaceBox {
                x: 100,
                y: 200,
                width: 50,
                height: 60,
            })
        );
    }

    #[test]
    fn rejects_unknown_length() {
        let err = FrameInfo::decode(&[0u8; 10]).unwrap_err();
        assert_eq!(err, UnknownFrameInfoLen(10));
    }

    #[test]
    fn rate_estimator_zeroes_below_two_samples() {
        let mut est = RateEstimator::new();
        let stats = est.push(base_buf_info());
        assert_eq!(stats, StreamStats::default());
    }

    fn base_buf_info() -> FrameInfo {
        FrameInfo::decode(&base_buf()).unwrap()
    }
}
