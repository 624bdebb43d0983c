use std::time::{Duration, Instant};

use base64::Engine;
use serde::Deserialize;
use serde_json::Value as Json;
use signalhub_core::config::{AUDIO_MAX_DATA_SIZE, AUDIO_MAX_STRING_LENGTH, AUDIO_RATE_LIMIT_PER_SECOND};
use signalhub_core::Error;

const HEADER_LEN: usize = 28;

/// Parsed header of the `/ws/audio/` binary frame (§6): a 28-byte
/// little-endian header followed by two UTF-8 strings and the raw samples.
#[derive(Debug, PartialEq)]
pub struct AudioChunkHeader {
    pub timestamp_ns: u64,
    pub sample_rate: u32,
    pub channels: u32,
    pub bit_depth: u32,
    pub source_id: String,
    pub source_name: String,
}

#[derive(Debug, PartialEq)]
pub struct AudioChunk {
    pub header: AudioChunkHeader,
    pub samples: Vec<u8>,
}

/// Parses and validates one binary audio frame. Any violation — bad
/// sample rate, oversized strings, oversized payload — is reported as
/// `ProtocolBroken` so the caller can drop the frame with a WARN per §7,
/// rather than tearing down the connection.
pub fn parse_chunk(frame: &[u8]) -> signalhub_core::Result<AudioChunk> {
    if frame.len() < HEADER_LEN {
        return Err(Error::ProtocolBroken("audio frame shorter than header".into()));
    }

    let timestamp_ns = u64::from_le_bytes(frame[0..8].try_into().unwrap());
    let sample_rate = u32::from_le_bytes(frame[8..12].try_into().unwrap());
    let channels = u32::from_le_bytes(frame[12..16].try_into().unwrap());
    let bit_depth = u32::from_le_bytes(frame[16..20].try_into().unwrap());
    let source_id_len = u32::from_le_bytes(frame[20..24].try_into().unwrap()) as usize;
    let source_name_len = u32::from_le_bytes(frame[24..28].try_into().unwrap()) as usize;

    if !(8000..=192_000).contains(&sample_rate) {
        return Err(Error::ProtocolBroken(format!("invalid sample_rate {sample_rate}")));
    }
    if !(1..=8).contains(&channels) {
        return Err(Error::ProtocolBroken(format!("invalid channels {channels}")));
    }
    if ![8, 16, 24, 32].contains(&bit_depth) {
        return Err(Error::ProtocolBroken(format!("invalid bit_depth {bit_depth}")));
    }
    if source_id_len > AUDIO_MAX_STRING_LENGTH || source_name_len > AUDIO_MAX_STRING_LENGTH {
        return Err(Error::ProtocolBroken("audio source string too long".into()));
    }

    let strings_end = HEADER_LEN + source_id_len + source_name_len;
    if strings_end > frame.len() {
        return Err(Error::ProtocolBroken("audio frame truncated before strings".into()));
    }

    let source_id =
        String::from_utf8(frame[HEADER_LEN..HEADER_LEN + source_id_len].to_vec())
            .map_err(|e| Error::ProtocolBroken(format!("source_id not utf8: {e}")))?;
    let source_name = String::from_utf8(
        frame[HEADER_LEN + source_id_len..strings_end].to_vec(),
    )
    .map_err(|e| Error::ProtocolBroken(format!("source_name not utf8: {e}")))?;

    let samples = frame[strings_end..].to_vec();

    validate_and_build(
        AudioChunkHeader {
            timestamp_ns,
            sample_rate,
            channels,
            bit_depth,
            source_id,
            source_name,
        },
        samples,
    )
}

/// The JSON alternate form of `/ws/audio/` (§6): same fields as the binary
/// header, with `samples` base64-encoded instead of appended raw.
#[derive(Debug, Deserialize)]
struct JsonChunk {
    timestamp_ns: u64,
    sample_rate: u32,
    channels: u32,
    bit_depth: u32,
    source_id: String,
    source_name: String,
    samples: String,
}

/// Parses and validates the JSON alternate form of an audio chunk, applying
/// the same range/size checks as the binary framing.
pub fn parse_json_chunk(value: &Json) -> signalhub_core::Result<AudioChunk> {
    let parsed: JsonChunk = serde_json::from_value(value.clone())
        .map_err(|e| Error::ProtocolBroken(format!("invalid json audio chunk: {e}")))?;
    let samples = base64::engine::general_purpose::STANDARD
        .decode(&parsed.samples)
        .map_err(|e| Error::ProtocolBroken(format!("audio samples not valid base64: {e}")))?;

    if parsed.source_id.len() > AUDIO_MAX_STRING_LENGTH
        || parsed.source_name.len() > AUDIO_MAX_STRING_LENGTH
    {
        return Err(Error::ProtocolBroken("audio source string too long".into()));
    }

    validate_and_build(
        AudioChunkHeader {
            timestamp_ns: parsed.timestamp_ns,
            sample_rate: parsed.sample_rate,
            channels: parsed.channels,
            bit_depth: parsed.bit_depth,
            source_id: parsed.source_id,
            source_name: parsed.source_name,
        },
        samples,
    )
}

fn validate_and_build(header: AudioChunkHeader, samples: Vec<u8>) -> signalhub_core::Result<AudioChunk> {
    if !(8000..=192_000).contains(&header.sample_rate) {
        return Err(Error::ProtocolBroken(format!(
            "invalid sample_rate {}",
            header.sample_rate
        )));
    }
    if !(1..=8).contains(&header.channels) {
        return Err(Error::ProtocolBroken(format!("invalid channels {}", header.channels)));
    }
    if ![8, 16, 24, 32].contains(&header.bit_depth) {
        return Err(Error::ProtocolBroken(format!("invalid bit_depth {}", header.bit_depth)));
    }
    if samples.len() > AUDIO_MAX_DATA_SIZE {
        return Err(Error::ProtocolBroken("audio payload exceeds max data size".into()));
    }

    Ok(AudioChunk { header, samples })
}

/// Per-connection sliding-window chunk counter gating `/ws/audio/` at
/// `AUDIO_RATE_LIMIT_PER_SECOND` chunks/second (§6). One instance per socket.
pub struct AudioRateLimiter {
    window_start: Instant,
    count: u32,
    limit: u32,
}

impl AudioRateLimiter {
    pub fn new() -> Self {
        Self::with_limit(AUDIO_RATE_LIMIT_PER_SECOND)
    }

    fn with_limit(limit: u32) -> Self {
        Self {
            window_start: Instant::now(),
            count: 0,
            limit,
        }
    }

    /// Returns `true` if this chunk is within the current 1-second window's
    /// budget, `false` if it should be dropped.
    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    fn allow_at(&mut self, now: Instant) -> bool {
        if now.duration_since(self.window_start) >= Duration::from_secs(1) {
            self.window_start = now;
            self.count = 0;
        }
        self.count += 1;
        self.count <= self.limit
    }
}

impl Default for AudioRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_frame(sample_rate: u32, channels: u32, bit_depth: u32, source_id: &str, source_name: &str, samples: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&42u64.to_le_bytes());
        buf.extend_from_slice(&sample_rate.to_le_bytes());
        buf.extend_from_slice(&channels.to_le_bytes());
        buf.extend_from_slice(&bit_depth.to_le_bytes());
        buf.extend_from_slice(&(source_id.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(source_name.len() as u32).to_le_bytes());
        buf.extend_from_slice(source_id.as_bytes());
        buf.extend_from_slice(source_name.as_bytes());
        buf.extend_from_slice(samples);
        buf
    }

    #[test]
    fn parses_valid_frame() {
        let frame = build_frame(48000, 2, 16, "mic-1", "Main Mic", &[1, 2, 3, 4]);
        let chunk = parse_chunk(&frame).unwrap();
        assert_eq!(chunk.header.sample_rate, 48000);
        assert_eq!(chunk.header.source_id, "mic-1");
        assert_eq!(chunk.samples, vec![1, 2, 3, 4]);
    }

    #[test]
    fn rejects_out_of_range_sample_rate() {
        let frame = build_frame(4000, 2, 16, "a", "b", &[]);
        assert!(matches!(parse_chunk(&frame), Err(Error::ProtocolBroken(_))));
    }

    #[test]
    fn rejects_invalid_bit_depth() {
        let frame = build_frame(48000, 2, 12, "a", "b", &[]);
        assert!(matches!(parse_chunk(&frame), Err(Error::ProtocolBroken(_))));
    }

    #[test]
    fn rejects_truncated_frame() {
        assert!(matches!(parse_chunk(&[0u8; 10]), Err(Error::ProtocolBroken(_))));
    }

    #[test]
    fn parses_valid_json_chunk() {
        let samples_b64 = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3, 4]);
        let value = serde_json::json!({
            "timestamp_ns": 42,
            "sample_rate": 48000,
            "channels": 2,
            "bit_depth": 16,
            "source_id": "mic-1",
            "source_name": "Main Mic",
            "samples": samples_b64,
        });
        let chunk = parse_json_chunk(&value).unwrap();
        assert_eq!(chunk.header.sample_rate, 48000);
        assert_eq!(chunk.samples, vec![1, 2, 3, 4]);
    }

    #[test]
    fn json_chunk_rejects_out_of_range_sample_rate() {
        let value = serde_json::json!({
            "timestamp_ns": 0,
            "sample_rate": 4000,
            "channels": 2,
            "bit_depth": 16,
            "source_id": "a",
            "source_name": "b",
            "samples": "",
        });
        assert!(matches!(parse_json_chunk(&value), Err(Error::ProtocolBroken(_))));
    }

    #[test]
    fn json_chunk_rejects_invalid_base64_samples() {
        let value = serde_json::json!({
            "timestamp_ns": 0,
            "sample_rate": 48000,
            "channels": 2,
            "bit_depth": 16,
            "source_id": "a",
            "source_name": "b",
            "samples": "not base64!!",
        });
        assert!(matches!(parse_json_chunk(&value), Err(Error::ProtocolBroken(_))));
    }

    #[test]
    fn rate_limiter_allows_up_to_limit_per_window() {
        let mut limiter = AudioRateLimiter::with_limit(3);
        let now = Instant::now();
        assert!(limiter.allow_at(now));
        assert!(limiter.allow_at(now));
        assert!(limiter.allow_at(now));
        assert!(!limiter.allow_at(now));
    }

    #[test]
    fn rate_limiter_resets_after_window_elapses() {
        let mut limiter = AudioRateLimiter::with_limit(1);
        let now = Instant::now();
        assert!(limiter.allow_at(now));
        assert!(!limiter.allow_at(now));
        assert!(limiter.allow_at(now + Duration::from_millis(1100)));
    }
}
