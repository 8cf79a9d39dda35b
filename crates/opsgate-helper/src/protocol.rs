//! Wire format for the helper socket.
//!
//! One JSON object per line, one request and one response per connection.
//! Both sides enforce the configured body limit while reading, so a peer
//! can never make the other buffer an unbounded line.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use opsgate_core::{ActionVerb, TargetType};

use crate::error::{HelperError, HelperResult};

/// One privileged-action request. `actor` and `reason` ride along for the
/// helper's own log line; authorization uses only the first three fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelperRequest {
    pub target_type: TargetType,
    pub action: ActionVerb,
    pub target: String,
    #[serde(default)]
    pub actor: String,
    #[serde(default)]
    pub reason: String,
}

/// The helper's verdict on one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelperResponse {
    pub ok: bool,
    /// Short machine-readable failure class: `not_allowed`, `timeout`,
    /// `bad_request`, `spawn_failed`, or `command_failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

impl HelperResponse {
    pub fn success(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            ok: true,
            detail: None,
            exit_code,
            stdout,
            stderr,
        }
    }

    pub fn failure(detail: &str, stderr: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: Some(detail.to_string()),
            exit_code: -1,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Read one newline-terminated JSON value, refusing lines past `max_body`.
///
/// Reads byte-by-byte through the buffer so an oversized line is detected
/// at the limit instead of after buffering it whole.
pub async fn read_frame<T, R>(reader: &mut BufReader<R>, max_body: usize) -> HelperResult<T>
where
    T: serde::de::DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut line = Vec::with_capacity(256);
    loop {
        let mut byte = [0u8; 1];
        let n = tokio::io::AsyncReadExt::read(reader, &mut byte).await?;
        if n == 0 {
            if line.is_empty() {
                return Err(HelperError::EmptyResponse);
            }
            break;
        }
        if byte[0] == b'\n' {
            break;
        }
        if line.len() >= max_body {
            // Drain nothing further; the connection is abandoned by the caller.
            return Err(HelperError::BodyTooLarge { limit: max_body });
        }
        line.push(byte[0]);
    }
    Ok(serde_json::from_slice(&line)?)
}

/// Write one JSON value followed by a newline and flush.
pub async fn write_frame<T, W>(writer: &mut W, value: &T) -> HelperResult<()>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let mut blob = serde_json::to_vec(value)?;
    blob.push(b'\n');
    writer.write_all(&blob).await?;
    writer.flush().await?;
    Ok(())
}

/// Consume the rest of the current line after a reject, so a response can
/// still be written on the same connection.
///
/// Discards at most `budget` bytes; a peer that keeps streaming past that
/// without a newline is cut off when the connection closes. Memory stays
/// bounded by the chunk buffer either way.
pub async fn drain_line<R>(reader: &mut BufReader<R>, budget: usize) -> HelperResult<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 512];
    let mut remaining = budget;
    while remaining > 0 {
        let want = chunk.len().min(remaining);
        let n = tokio::io::AsyncReadExt::read(reader, &mut chunk[..want]).await?;
        if n == 0 || chunk[..n].contains(&b'\n') {
            break;
        }
        remaining -= n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn request() -> HelperRequest {
        HelperRequest {
            target_type: TargetType::Service,
            action: ActionVerb::Restart,
            target: "nginx".to_string(),
            actor: "admin".to_string(),
            reason: "deploy".to_string(),
        }
    }

    #[tokio::test]
    async fn frame_round_trip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &request()).await.unwrap();
        assert!(buf.ends_with(b"\n"));

        let mut reader = BufReader::new(Cursor::new(buf));
        let decoded: HelperRequest = read_frame(&mut reader, 16384).await.unwrap();
        assert_eq!(decoded, request());
    }

    #[tokio::test]
    async fn oversized_line_is_refused_at_the_limit() {
        let mut blob = serde_json::to_vec(&request()).unwrap();
        blob.push(b'\n');
        let limit = blob.len() - 10;

        let mut reader = BufReader::new(Cursor::new(blob));
        let result: HelperResult<HelperRequest> = read_frame(&mut reader, limit).await;
        assert!(matches!(result, Err(HelperError::BodyTooLarge { .. })));
    }

    #[tokio::test]
    async fn eof_before_any_byte_is_empty_response() {
        let mut reader = BufReader::new(Cursor::new(Vec::new()));
        let result: HelperResult<HelperRequest> = read_frame(&mut reader, 16384).await;
        assert!(matches!(result, Err(HelperError::EmptyResponse)));
    }

    #[tokio::test]
    async fn missing_trailing_newline_still_parses() {
        let blob = serde_json::to_vec(&request()).unwrap();
        let mut reader = BufReader::new(Cursor::new(blob));
        let decoded: HelperRequest = read_frame(&mut reader, 16384).await.unwrap();
        assert_eq!(decoded.target, "nginx");
    }

    #[tokio::test]
    async fn garbage_is_invalid_payload() {
        let mut reader = BufReader::new(Cursor::new(b"not json\n".to_vec()));
        let result: HelperResult<HelperRequest> = read_frame(&mut reader, 16384).await;
        assert!(matches!(result, Err(HelperError::InvalidPayload(_))));
    }

    #[tokio::test]
    async fn drain_stops_at_its_budget_on_an_endless_line() {
        // 8 MiB with the newline at the very end; the drain must give up
        // long before reaching it.
        let mut blob = vec![b'x'; 8 * 1024 * 1024];
        blob.push(b'\n');
        let total = blob.len() as u64;

        let budget = 64 * 1024;
        let mut reader = BufReader::new(Cursor::new(blob));
        drain_line(&mut reader, budget).await.unwrap();

        // Consumption is the budget plus at most one BufReader fill.
        let consumed = reader.get_ref().position();
        assert!(consumed <= (budget + 16 * 1024) as u64, "consumed {consumed}");
        assert!(consumed < total);
    }

    #[tokio::test]
    async fn drain_returns_once_the_newline_appears() {
        let blob = b"leftover garbage\n".to_vec();
        let total = blob.len() as u64;
        let mut reader = BufReader::new(Cursor::new(blob));
        drain_line(&mut reader, 16384).await.unwrap();
        assert_eq!(reader.get_ref().position(), total);
    }

    #[test]
    fn response_serialization_omits_empty_detail() {
        let ok = HelperResponse::success(0, "done".to_string(), String::new());
        let json = serde_json::to_string(&ok).unwrap();
        assert!(!json.contains("detail"));

        let failed = HelperResponse::failure("timeout", "command timed out after 45s");
        let json = serde_json::to_string(&failed).unwrap();
        assert!(json.contains("\"detail\":\"timeout\""));
    }
}
