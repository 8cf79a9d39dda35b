//! Client side of the helper socket.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::UnixStream;
use tracing::{debug, warn};

use opsgate_core::HelperConfig;

use crate::protocol::{HelperRequest, HelperResponse, read_frame, write_frame};

/// What one helper round-trip produced, from the console's point of view.
///
/// `Completed` covers both successful and failed commands — the command
/// ran (or was refused by the helper's policy) and the helper said so.
/// `Unavailable` means the answer never arrived: connect failure, broken
/// socket, or the round-trip timeout. The two are never conflated.
#[derive(Debug, Clone, PartialEq)]
pub enum HelperOutcome {
    Completed(HelperResponse),
    Unavailable(String),
}

/// Connects per request; the helper serves one request per connection.
#[derive(Debug, Clone)]
pub struct HelperClient {
    socket_path: PathBuf,
    request_timeout: Duration,
    max_body: usize,
}

impl HelperClient {
    pub fn new(config: &HelperConfig) -> Self {
        Self {
            socket_path: config.socket_path.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_seconds),
            max_body: config.max_body_bytes,
        }
    }

    /// One request, one response, bounded by the request timeout. On
    /// timeout the connection is dropped and the helper finishes (or
    /// times out) on its own.
    pub async fn execute(&self, request: &HelperRequest) -> HelperOutcome {
        match tokio::time::timeout(self.request_timeout, self.round_trip(request)).await {
            Ok(Ok(response)) => {
                debug!(
                    target = %request.target,
                    ok = response.ok,
                    exit_code = response.exit_code,
                    "helper responded"
                );
                HelperOutcome::Completed(response)
            }
            Ok(Err(e)) => {
                warn!(socket = %self.socket_path.display(), error = %e, "helper unreachable");
                HelperOutcome::Unavailable(e.to_string())
            }
            Err(_) => {
                warn!(
                    socket = %self.socket_path.display(),
                    timeout_seconds = self.request_timeout.as_secs(),
                    "helper request timed out"
                );
                HelperOutcome::Unavailable(format!(
                    "helper did not respond within {}s",
                    self.request_timeout.as_secs()
                ))
            }
        }
    }

    async fn round_trip(
        &self,
        request: &HelperRequest,
    ) -> crate::error::HelperResult<HelperResponse> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(crate::error::HelperError::Connect)?;
        let (read_half, mut write_half) = stream.into_split();
        write_frame(&mut write_half, request).await?;

        let mut reader = BufReader::new(read_half);
        read_frame(&mut reader, self.max_body).await
    }
}
