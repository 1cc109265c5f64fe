//! Turn an arbitrarily chunked byte stream into validated readings.
//!
//! The serial line delivers bytes in whatever pieces the OS hands back, with
//! no guarantee that a frame arrives whole. The decoder buffers until a
//! start marker and its matching end marker are both present, parses the
//! span, and resynchronises on the next start marker whenever something is
//! off. Every discarded span is reported as a [`FrameError`] so the caller
//! can log it; none of them stop decoding.

use crate::config::Config;
use crate::sensor::frame::SensorReading;
use crate::sensor::protocol::ProtocolVariant;
use thiserror::Error;

/// Why a span of the byte stream was discarded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("end marker without a start marker, discarded {discarded} bytes")]
    UnmatchedEnd { discarded: usize },

    #[error("frame interrupted by a new start marker, discarded {discarded} bytes")]
    Interrupted { discarded: usize },

    #[error("frame exceeds {limit} bytes, discarded {discarded} bytes")]
    Oversized { limit: usize, discarded: usize },

    #[error("malformed payload {payload:?}: {reason}")]
    Malformed { payload: String, reason: String },

    #[error("invalid frame {payload:?}: {reason}")]
    Schema { payload: String, reason: String },
}

/// One outcome of [`FrameDecoder::push`], in stream order.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Reading(SensorReading),
    Rejected(FrameError),
}

impl Decoded {
    pub fn reading(self) -> Option<SensorReading> {
        match self {
            Decoded::Reading(r) => Some(r),
            Decoded::Rejected(_) => None,
        }
    }
}

/// Incremental frame decoder for one sensor stream.
#[derive(Debug)]
pub struct FrameDecoder {
    protocol: ProtocolVariant,
    max_distance: f64,
    max_frame_bytes: usize,
    buffer: Vec<u8>,
    next_sequence: u64,
}

impl FrameDecoder {
    pub fn new(protocol: ProtocolVariant, max_distance: f64, max_frame_bytes: usize) -> Self {
        Self {
            protocol,
            max_distance,
            max_frame_bytes,
            buffer: Vec::with_capacity(max_frame_bytes * 2),
            next_sequence: 1,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.sensor.protocol,
            config.room.max_distance,
            config.sensor.max_frame_bytes,
        )
    }

    pub fn protocol(&self) -> ProtocolVariant {
        self.protocol
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial frame, e.g. after a reconnect.
    ///
    /// Sequence numbers keep counting so readings stay ordered across links.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Feed a chunk of bytes and collect everything it completes.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Decoded> {
        self.buffer.extend_from_slice(bytes);

        let open = self.protocol.start_marker();
        let close = self.protocol.end_marker();
        let mut out = Vec::new();
        let mut cursor = 0;

        loop {
            let rest = &self.buffer[cursor..];
            let start = rest.iter().position(|&b| b == open);
            let stray_end = rest.iter().position(|&b| b == close);

            let start = match (start, stray_end) {
                (None, None) => {
                    // Only noise left.
                    cursor = self.buffer.len();
                    break;
                }
                (None, Some(end)) => {
                    out.push(Decoded::Rejected(FrameError::UnmatchedEnd {
                        discarded: end + 1,
                    }));
                    cursor += end + 1;
                    continue;
                }
                (Some(start), Some(end)) if end < start => {
                    out.push(Decoded::Rejected(FrameError::UnmatchedEnd {
                        discarded: end + 1,
                    }));
                    cursor += end + 1;
                    continue;
                }
                (Some(start), _) => cursor + start,
            };

            let body = &self.buffer[start + 1..];
            let end = body.iter().position(|&b| b == close);
            let restart = body.iter().position(|&b| b == open);

            let interrupted = match (end, restart) {
                (Some(end), Some(restart)) => (restart < end).then_some(restart),
                (None, restart) => restart,
                (Some(_), None) => None,
            };
            if let Some(restart) = interrupted {
                out.push(Decoded::Rejected(FrameError::Interrupted {
                    discarded: restart + 1,
                }));
                cursor = start + 1 + restart;
                continue;
            }

            let Some(end) = end else {
                let pending = self.buffer.len() - start;
                if pending > self.max_frame_bytes {
                    out.push(Decoded::Rejected(FrameError::Oversized {
                        limit: self.max_frame_bytes,
                        discarded: pending,
                    }));
                    cursor = self.buffer.len();
                } else {
                    cursor = start;
                }
                break;
            };

            let frame_end = start + 1 + end;
            let span = frame_end + 1 - start;
            if span > self.max_frame_bytes {
                out.push(Decoded::Rejected(FrameError::Oversized {
                    limit: self.max_frame_bytes,
                    discarded: span,
                }));
            } else {
                let payload = String::from_utf8_lossy(&self.buffer[start..=frame_end]);
                out.push(parse_frame(
                    self.protocol,
                    self.max_distance,
                    &mut self.next_sequence,
                    &payload,
                ));
            }
            cursor = frame_end + 1;
        }

        self.buffer.drain(..cursor);
        out
    }
}

/// Parse one delimited payload, numbering it when it is valid.
fn parse_frame(
    protocol: ProtocolVariant,
    max_distance: f64,
    next_sequence: &mut u64,
    payload: &str,
) -> Decoded {
    match protocol.parse(payload, max_distance) {
        Ok(mut reading) => {
            reading.sequence = *next_sequence;
            *next_sequence += 1;
            Decoded::Reading(reading)
        }
        Err(err) => Decoded::Rejected(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array_decoder() -> FrameDecoder {
        FrameDecoder::new(ProtocolVariant::Array, 400.0, 1024)
    }

    fn readings(decoded: Vec<Decoded>) -> Vec<[Option<f64>; 4]> {
        decoded
            .into_iter()
            .filter_map(Decoded::reading)
            .map(|r| r.distances)
            .collect()
    }

    fn rejections(decoded: &[Decoded]) -> Vec<FrameError> {
        decoded
            .iter()
            .filter_map(|d| match d {
                Decoded::Rejected(e) => Some(e.clone()),
                Decoded::Reading(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_single_complete_frame() {
        let mut decoder = array_decoder();
        let out = readings(decoder.push(b"[50,400,400,400]"));
        assert_eq!(out, vec![[Some(50.0), Some(400.0), Some(400.0), Some(400.0)]]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_frame_without_following_start_marker() {
        let mut decoder = array_decoder();
        let out = decoder.push(b"[1,2,3,4]\r\nnoise");
        assert!(rejections(&out).is_empty());
        assert_eq!(readings(out), vec![[Some(1.0), Some(2.0), Some(3.0), Some(4.0)]]);
        assert_eq!(decoder.buffered(), 0);

        // A frame followed by the start of the next one keeps the tail.
        let out = readings(decoder.push(b"[5,6,7,8][9,1"));
        assert_eq!(out, vec![[Some(5.0), Some(6.0), Some(7.0), Some(8.0)]]);
        assert_eq!(decoder.buffered(), 5);
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut decoder = array_decoder();
        assert!(decoder.push(b"[120,35").is_empty());
        assert!(decoder.buffered() > 0);
        let out = readings(decoder.push(b"0,80,-1]"));
        assert_eq!(out, vec![[Some(120.0), Some(350.0), Some(80.0), None]]);
    }

    #[test]
    fn test_byte_by_byte_delivery_matches_whole_delivery() {
        let stream = b"[1,2,3,4]\r\n[5.5,6,7,8]\n[9,10,11,12]";

        let mut whole = array_decoder();
        let expected = readings(whole.push(stream));
        assert_eq!(expected.len(), 3);

        let mut trickle = array_decoder();
        let mut got = Vec::new();
        for byte in stream.iter() {
            got.extend(readings(trickle.push(std::slice::from_ref(byte))));
        }
        assert_eq!(got, expected);
    }

    #[test]
    fn test_every_split_point_yields_same_frames() {
        let stream = b"xx[1,2,3,4]]junk[5,6,[7,8,9,10]{}[11,12,13,14]";
        let mut reference = array_decoder();
        let expected = readings(reference.push(stream));
        assert_eq!(
            expected,
            vec![
                [Some(1.0), Some(2.0), Some(3.0), Some(4.0)],
                [Some(7.0), Some(8.0), Some(9.0), Some(10.0)],
                [Some(11.0), Some(12.0), Some(13.0), Some(14.0)],
            ]
        );

        for split in 0..=stream.len() {
            let mut decoder = array_decoder();
            let mut got = readings(decoder.push(&stream[..split]));
            got.extend(readings(decoder.push(&stream[split..])));
            assert_eq!(got, expected, "split at {}", split);
        }
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let mut decoder = array_decoder();
        let out: Vec<u64> = decoder
            .push(b"[1,2,3,4][oops][5,6,7,8]")
            .into_iter()
            .filter_map(Decoded::reading)
            .map(|r| r.sequence)
            .collect();
        assert_eq!(out, vec![1, 2]);

        decoder.reset();
        let next = decoder.push(b"[1,1,1,1]").pop().and_then(Decoded::reading);
        assert_eq!(next.map(|r| r.sequence), Some(3));
    }

    #[test]
    fn test_unmatched_end_is_reported_and_skipped() {
        let mut decoder = array_decoder();
        let out = decoder.push(b"3,4]\n[1,2,3,4]");
        assert_eq!(
            rejections(&out),
            vec![FrameError::UnmatchedEnd { discarded: 4 }]
        );
        assert_eq!(readings(out).len(), 1);
    }

    #[test]
    fn test_interrupted_frame_resyncs_at_new_start() {
        let mut decoder = array_decoder();
        let out = decoder.push(b"[1,2,[5,6,7,8]");
        assert_eq!(
            rejections(&out),
            vec![FrameError::Interrupted { discarded: 5 }]
        );
        assert_eq!(
            readings(out),
            vec![[Some(5.0), Some(6.0), Some(7.0), Some(8.0)]]
        );
    }

    #[test]
    fn test_malformed_payload_is_reported() {
        let mut decoder = array_decoder();
        let out = decoder.push(b"[1,2,abc,4][1,2,3,4]");
        let errors = rejections(&out);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], FrameError::Malformed { .. }));
        assert_eq!(readings(out).len(), 1);
    }

    #[test]
    fn test_schema_error_is_reported() {
        let mut decoder = array_decoder();
        let out = decoder.push(b"[1,2,3]");
        assert!(matches!(rejections(&out)[0], FrameError::Schema { .. }));
    }

    #[test]
    fn test_oversized_incomplete_frame_is_dropped() {
        let mut decoder = FrameDecoder::new(ProtocolVariant::Array, 400.0, 16);
        let out = decoder.push(b"[1,1,1,1,1,1,1,1,1,1");
        assert!(matches!(
            rejections(&out)[0],
            FrameError::Oversized { limit: 16, .. }
        ));
        assert_eq!(decoder.buffered(), 0);

        let out = readings(decoder.push(b"[1,2,3,4]"));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_oversized_complete_frame_is_dropped() {
        let mut decoder = FrameDecoder::new(ProtocolVariant::Array, 400.0, 12);
        let out = decoder.push(b"[100,200,300,400]");
        assert!(matches!(rejections(&out)[0], FrameError::Oversized { .. }));
        assert!(readings(out).is_empty());
    }

    #[test]
    fn test_invalid_utf8_is_decoded_lossily() {
        let mut decoder = array_decoder();
        let out = decoder.push(b"\xff\xfe[1,2,3,4]");
        assert_eq!(readings(out).len(), 1);

        let out = decoder.push(b"[1,\xff,3,4]");
        assert!(matches!(rejections(&out)[0], FrameError::Malformed { .. }));
    }

    #[test]
    fn test_object_framing_ignores_inner_brackets() {
        let mut decoder = FrameDecoder::new(ProtocolVariant::Object, 400.0, 1024);
        let out = decoder.push(br#"noise{"d":[10,20,30,40],"p":[1,2],"t":7}{"d":[1,"#);
        let got: Vec<SensorReading> = out.into_iter().filter_map(Decoded::reading).collect();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].positions.len(), 1);
        assert_eq!(got[0].device_time, Some(7));

        let got = readings(decoder.push(br#"2,3,4]}"#));
        assert_eq!(got, vec![[Some(1.0), Some(2.0), Some(3.0), Some(4.0)]]);
    }

    #[test]
    fn test_noise_without_markers_is_dropped() {
        let mut decoder = array_decoder();
        assert!(decoder.push(b"hello sensor\r\n").is_empty());
        assert_eq!(decoder.buffered(), 0);
    }
}
