use std::sync::Arc;

use serde_json::json;
use signalhub_bus::{channels, Bus};
use signalhub_core::{Envelope, Error, Result};
use tokio::net::UdpSocket;
use tracing::warn;

/// Binds a UDP port and maps `/1/muteN` and `/1/volumeN` OSC addresses into
/// `audio.mic.mute` / `audio.mic.level` envelopes (§4.8). Only the address
/// pattern and a single float/int argument are parsed — this is not a
/// general OSC stack.
pub struct OscListener {
    bus: Arc<dyn Bus>,
}

impl OscListener {
    pub fn new(bus: Arc<dyn Bus>) -> Arc<Self> {
        Arc::new(Self { bus })
    }

    pub async fn run(self: Arc<Self>, bind_addr: &str) -> Result<()> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| Error::Configuration(format!("osc udp bind failed: {e}")))?;
        let mut buf = [0u8; 2048];
        loop {
            let (len, _peer) = match socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "osc recv error");
                    continue;
                }
            };
            if let Err(e) = self.handle_packet(&buf[..len]).await {
                warn!(error = %e, "dropping malformed osc packet");
            }
        }
    }

    async fn handle_packet(&self, packet: &[u8]) -> Result<()> {
        let (address, args) = parse_osc_message(packet)
            .ok_or_else(|| Error::ProtocolBroken("malformed osc message".into()))?;

        if let Some(channel) = strip_prefix_digits(&address, "/1/mute") {
            let muted = args.first().copied().unwrap_or(0.0) != 0.0;
            let envelope = Envelope::new(
                "audio.mic.mute",
                "osc",
                json!({ "channel": channel, "muted": muted }),
            );
            return self.bus.publish(channels::AUDIO, &envelope).await;
        }
        if let Some(channel) = strip_prefix_digits(&address, "/1/volume") {
            let level = args.first().copied().unwrap_or(0.0);
            let envelope = Envelope::new(
                "audio.mic.level",
                "osc",
                json!({ "channel": channel, "level": level }),
            );
            return self.bus.publish(channels::AUDIO, &envelope).await;
        }
        Ok(())
    }
}

/// `/1/mute3` → `Some(3)`. Returns `None` if `address` doesn't start with
/// `prefix` or the remainder isn't a plain integer.
fn strip_prefix_digits(address: &str, prefix: &str) -> Option<u32> {
    address.strip_prefix(prefix)?.parse().ok()
}

/// Minimal OSC 1.0 message parser: `/address\0...` padded to 4 bytes, then
/// a type tag string `,f` / `,i` padded to 4 bytes, then big-endian args.
fn parse_osc_message(packet: &[u8]) -> Option<(String, Vec<f32>)> {
    let (address, rest) = read_osc_string(packet)?;
    let (type_tags, rest) = read_osc_string(rest)?;
    if !type_tags.starts_with(',') {
        return None;
    }

    let mut args = Vec::new();
    let mut cursor = rest;
    for tag in type_tags[1..].chars() {
        match tag {
            'f' => {
                let bytes: [u8; 4] = cursor.get(0..4)?.try_into().ok()?;
                args.push(f32::from_be_bytes(bytes));
                cursor = &cursor[4..];
            }
            'i' => {
                let bytes: [u8; 4] = cursor.get(0..4)?.try_into().ok()?;
                args.push(i32::from_be_bytes(bytes) as f32);
                cursor = &cursor[4..];
            }
            _ => return None,
        }
    }
    Some((address, args))
}

fn read_osc_string(buf: &[u8]) -> Option<(String, &[u8])> {
    let nul = buf.iter().position(|&b| b == 0)?;
    let s = std::str::from_utf8(&buf[..nul]).ok()?.to_string();
    let padded_len = (nul + 1 + 3) / 4 * 4;
    if padded_len > buf.len() {
        return None;
    }
    Some((s, &buf[padded_len..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_osc_message(address: &str, tag: char, value: f32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(address.as_bytes());
        pad4(&mut buf);
        buf.push(b',');
        buf.push(tag as u8);
        pad4(&mut buf);
        buf.extend_from_slice(&value.to_be_bytes());
        buf
    }

    fn pad4(buf: &mut Vec<u8>) {
        buf.push(0);
        while buf.len() % 4 != 0 {
            buf.push(0);
        }
    }

    #[test]
    fn parses_mute_message() {
        let packet = build_osc_message("/1/mute3", 'f', 1.0);
        let (address, args) = parse_osc_message(&packet).unwrap();
        assert_eq!(address, "/1/mute3");
        assert_eq!(strip_prefix_digits(&address, "/1/mute"), Some(3));
        assert_eq!(args[0], 1.0);
    }

    #[test]
    fn rejects_truncated_packet() {
        assert!(parse_osc_message(b"/1/mute3").is_none());
    }
}
