use std::sync::Arc;

use serde_json::Value as Json;
use signalhub_bus::{channels, Bus};
use signalhub_core::{Envelope, Error, Result};
use tokio::io::{AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

/// Frame types the game-plugin TCP stream is expected to send (§6). Unknown
/// types are logged and ignored rather than closing the connection.
const KNOWN_TYPES: &[&str] = &[
    "init",
    "seed",
    "checkpoint",
    "location",
    "battle_started",
    "battle_ended",
    "team_update",
    "item_usage",
    "healing_summary",
    "error",
    "heartbeat",
];

pub struct GameTcpServer {
    bus: Arc<dyn Bus>,
}

impl GameTcpServer {
    pub fn new(bus: Arc<dyn Bus>) -> Arc<Self> {
        Arc::new(Self { bus })
    }

    pub async fn run(self: Arc<Self>, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| Error::Configuration(format!("game tcp bind failed: {e}")))?;
        info!(%bind_addr, "game tcp server listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    info!(%peer, "game tcp client connected");
                    let this = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = this.handle_connection(stream).await {
                            warn!(error = %e, "game tcp connection ended with error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "game tcp accept failed"),
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> Result<()> {
        let mut reader = BufReader::new(stream);
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(frame)) => {
                    if let Err(e) = self.handle_frame(frame).await {
                        warn!(error = %e, "dropping malformed game tcp frame");
                    }
                }
                Ok(None) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    async fn handle_frame(&self, frame: Json) -> Result<()> {
        let frame_type = frame
            .get("type")
            .and_then(Json::as_str)
            .ok_or_else(|| Error::ProtocolBroken("game tcp frame missing type".into()))?
            .to_string();

        if !KNOWN_TYPES.contains(&frame_type.as_str()) {
            warn!(%frame_type, "unknown game tcp frame type, ignoring");
            return Ok(());
        }

        let data = frame
            .get("data")
            .or_else(|| frame.get("metadata"))
            .cloned()
            .unwrap_or(Json::Null);

        if matches!(frame_type.as_str(), "checkpoint" | "location" | "team_update") {
            let cached = serde_json::to_string(&data).unwrap_or_default();
            let _ = self
                .bus
                .kv_set(channels::keys::IRONMON_CURRENT_STATE, &cached)
                .await;
        }

        let envelope = Envelope::new(format!("ironmon.{frame_type}"), "ironmon", data);
        self.bus.publish(channels::GAMES_IRONMON, &envelope).await
    }
}

/// Reads one `<ascii decimal length> <utf8 json body>` frame. Returns
/// `Ok(None)` on clean EOF between frames.
async fn read_frame(reader: &mut BufReader<TcpStream>) -> Result<Option<Json>> {
    let mut length_buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = reader
            .read_exact(&mut byte)
            .await
            .map(|_| 1)
            .or_else(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof && length_buf.is_empty() {
                    Ok(0)
                } else {
                    Err(e)
                }
            })
            .map_err(Error::Io)?;
        if n == 0 {
            return Ok(None);
        }
        if byte[0] == b' ' {
            break;
        }
        if !byte[0].is_ascii_digit() {
            return Err(Error::ProtocolBroken("non-digit in game tcp length prefix".into()));
        }
        length_buf.push(byte[0]);
    }

    let length = parse_length_prefix(&length_buf)?;

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.map_err(Error::Io)?;
    let json: Json = serde_json::from_slice(&body)?;
    Ok(Some(json))
}

fn parse_length_prefix(digits: &[u8]) -> Result<usize> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::ProtocolBroken("invalid game tcp length prefix".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[test]
    fn parse_length_prefix_accepts_digits() {
        assert_eq!(parse_length_prefix(b"123").unwrap(), 123);
    }

    #[test]
    fn parse_length_prefix_rejects_non_digits() {
        assert!(matches!(
            parse_length_prefix(b"12x"),
            Err(Error::ProtocolBroken(_))
        ));
    }

    #[tokio::test]
    async fn read_frame_parses_length_prefixed_json() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let body = br#"{"type":"heartbeat"}"#;
            stream
                .write_all(format!("{} ", body.len()).as_bytes())
                .await
                .unwrap();
            stream.write_all(body).await.unwrap();
        });
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        let frame = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(frame["type"], "heartbeat");
        client.await.unwrap();
    }

    #[tokio::test]
    async fn read_frame_returns_none_on_clean_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = TcpStream::connect(addr).await.unwrap();
        });
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }
}
