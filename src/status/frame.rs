//! Decoding of the status stream's wire frames.
//!
//! The backend pushes newline-delimited `data: <json>` frames; each payload is
//! either a full [`StatusSnapshot`] or an explicit `{"error": "..."}` object.
//! One malformed frame must never kill the stream, so decoding yields a
//! per-frame `Result` and leaves the connection alone.

use serde::Deserialize;

use crate::error::{Result, SyncError};
use crate::status::StatusSnapshot;

#[derive(Debug, Clone)]
pub enum StreamFrame {
    Snapshot(StatusSnapshot),
    /// The backend reported a problem in-band without closing the stream.
    Error(String),
}

#[derive(Deserialize)]
struct ErrorFrame {
    error: String,
}

/// Decode one `data:` payload.
pub fn decode_frame(payload: &str) -> Result<StreamFrame> {
    if let Ok(frame) = serde_json::from_str::<ErrorFrame>(payload) {
        return Ok(StreamFrame::Error(frame.error));
    }
    match serde_json::from_str::<StatusSnapshot>(payload) {
        Ok(snapshot) => Ok(StreamFrame::Snapshot(snapshot)),
        Err(e) => Err(SyncError::Decode(format!("{e}: {payload}"))),
    }
}

/// Reassembles `data:` lines from a byte stream.
///
/// Transport chunks can split a frame anywhere, including inside a UTF-8
/// sequence, so bytes are buffered until a full line is available. Comment
/// (`:`) and `event:` lines, and the blank separators between events, are
/// skipped.
#[derive(Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns a decode result per completed `data:` line.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<StreamFrame>> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = match std::str::from_utf8(&line) {
                Ok(text) => text.trim_end_matches(['\n', '\r']),
                Err(e) => {
                    frames.push(Err(SyncError::Decode(format!("invalid utf-8: {e}"))));
                    continue;
                }
            };

            if let Some(payload) = line.strip_prefix("data:") {
                let payload = payload.trim_start();
                if payload.is_empty() || payload == "[DONE]" {
                    continue;
                }
                frames.push(decode_frame(payload));
            }
        }

        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_json() -> String {
        serde_json::json!({
            "vehicle_id": "veh-1",
            "battery_percent": 80.0,
            "range_km": 340.0,
            "speed_kmh": 52.0,
            "odometer_km": 1000.0,
            "interior_temp_c": 20.0,
            "exterior_temp_c": 11.0,
            "tire_pressure_kpa": {
                "front_left": 230.0,
                "front_right": 230.0,
                "rear_left": 228.0,
                "rear_right": 228.0
            },
            "doors_locked": true,
            "charging": false,
            "recorded_at": "2025-06-01T12:00:00Z"
        })
        .to_string()
    }

    #[test]
    fn test_decode_snapshot_frame() {
        let frame = decode_frame(&snapshot_json()).unwrap();
        assert!(matches!(frame, StreamFrame::Snapshot(s) if s.vehicle_id == "veh-1"));
    }

    #[test]
    fn test_decode_error_frame() {
        let frame = decode_frame(r#"{"error":"telemetry offline"}"#).unwrap();
        assert!(matches!(frame, StreamFrame::Error(msg) if msg == "telemetry offline"));
    }

    #[test]
    fn test_decode_malformed_frame() {
        let err = decode_frame("{not json").unwrap_err();
        assert!(matches!(err, SyncError::Decode(_)));
    }

    #[test]
    fn test_buffer_reassembles_split_frames() {
        let wire = format!("data: {}\n\n", snapshot_json());
        let (head, tail) = wire.as_bytes().split_at(wire.len() / 2);

        let mut buffer = FrameBuffer::new();
        assert!(buffer.push(head).is_empty());
        let frames = buffer.push(tail);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_ok());
    }

    #[test]
    fn test_buffer_skips_comments_and_event_lines() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(b": keepalive\nevent: status\ndata: {\"error\":\"x\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Ok(StreamFrame::Error(_))));
    }

    #[test]
    fn test_buffer_bad_frame_does_not_poison_later_frames() {
        let mut buffer = FrameBuffer::new();
        let wire = format!("data: {{broken\ndata: {}\n", snapshot_json());
        let frames = buffer.push(wire.as_bytes());
        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_err());
        assert!(frames[1].is_ok());
    }
}
