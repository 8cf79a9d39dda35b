//! Service side of the helper socket — the only place commands run.
//!
//! The service re-validates every request against its own allowlist before
//! touching `systemctl` or `docker`; the console's validation is advisory
//! from this side of the boundary. One request per connection, one
//! response, then close.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use opsgate_core::{HelperConfig, TargetType};

use crate::allowlist::Allowlist;
use crate::error::{HelperError, HelperResult};
use crate::protocol::{HelperRequest, HelperResponse, drain_line, read_frame, write_frame};

/// The privileged helper daemon's accept loop and command executor.
pub struct HelperService {
    socket_path: PathBuf,
    socket_group: String,
    command_timeout: Duration,
    max_body: usize,
    allowlist: Allowlist,
}

impl HelperService {
    pub fn new(config: &HelperConfig, allowlist: Allowlist) -> Self {
        Self {
            socket_path: config.socket_path.clone(),
            socket_group: config.socket_group.clone(),
            command_timeout: Duration::from_secs(config.command_timeout_seconds),
            max_body: config.max_body_bytes,
            allowlist,
        }
    }

    /// Bind the socket, apply permissions, and serve until shutdown.
    /// Connections are served on their own tasks and may overlap.
    pub async fn serve(&self, mut shutdown: watch::Receiver<bool>) -> HelperResult<()> {
        let listener = self.bind()?;
        info!(socket = %self.socket_path.display(), "helper listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let conn = Connection {
                                allowlist: self.allowlist.clone(),
                                command_timeout: self.command_timeout,
                                max_body: self.max_body,
                            };
                            tokio::spawn(async move {
                                if let Err(e) = conn.handle(stream).await {
                                    warn!(error = %e, "helper connection failed");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "helper accept failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("helper shutting down");
                    break;
                }
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }

    /// Bind after clearing a stale socket. Refuses to unlink anything that
    /// is not a socket.
    fn bind(&self) -> HelperResult<UnixListener> {
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::symlink_metadata(&self.socket_path) {
            Ok(meta) => {
                use std::os::unix::fs::FileTypeExt;
                if !meta.file_type().is_socket() {
                    return Err(HelperError::NotASocket(self.socket_path.clone()));
                }
                std::fs::remove_file(&self.socket_path)?;
                debug!(socket = %self.socket_path.display(), "removed stale socket");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        apply_socket_permissions(&self.socket_path, &self.socket_group);
        Ok(listener)
    }
}

/// Per-connection state; cheap to clone into the spawned task.
struct Connection {
    allowlist: Allowlist,
    command_timeout: Duration,
    max_body: usize,
}

impl Connection {
    async fn handle(&self, stream: UnixStream) -> HelperResult<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let request: HelperRequest = match read_frame(&mut reader, self.max_body).await {
            Ok(req) => req,
            Err(HelperError::EmptyResponse) => return Ok(()),
            Err(HelperError::BodyTooLarge { limit }) => {
                // read_frame already consumed max_body bytes; allow a
                // little more before giving up on finding the newline.
                let _ = drain_line(&mut reader, self.max_body.saturating_mul(4)).await;
                let resp = HelperResponse::failure(
                    "bad_request",
                    format!("request body exceeds {limit} bytes"),
                );
                return write_frame(&mut write_half, &resp).await;
            }
            Err(HelperError::InvalidPayload(e)) => {
                let resp =
                    HelperResponse::failure("bad_request", format!("invalid JSON payload: {e}"));
                return write_frame(&mut write_half, &resp).await;
            }
            Err(e) => return Err(e),
        };

        let response = self.execute(&request).await;
        write_frame(&mut write_half, &response).await
    }

    /// Own-side policy check, then the command.
    async fn execute(&self, request: &HelperRequest) -> HelperResponse {
        let target = request.target.trim();
        if target.is_empty() {
            return HelperResponse::failure("bad_request", "target is required");
        }

        if let Err(denial) =
            self.allowlist
                .check(request.target_type, request.action, target)
        {
            warn!(
                target_type = %request.target_type,
                action = %request.action,
                target,
                actor = %request.actor,
                "helper refused request"
            );
            return HelperResponse::failure("not_allowed", denial.to_string());
        }

        let program = match request.target_type {
            TargetType::Service => "systemctl",
            TargetType::Container => "docker",
        };
        let action = request.action.to_string();
        info!(program, action = %action, target, actor = %request.actor, "executing action");

        run_command(program, &[&action, target], self.command_timeout).await
    }
}

/// Run one command under the timeout budget. Non-zero exit is reported in
/// the response; only the helper's own plumbing turns into `detail` codes.
async fn run_command(program: &str, args: &[&str], timeout: Duration) -> HelperResponse {
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return HelperResponse::failure("spawn_failed", format!("failed to run {program}: {e}"));
        }
        Err(_) => {
            return HelperResponse::failure(
                "timeout",
                format!("command timed out after {}s", timeout.as_secs()),
            );
        }
    };

    let exit_code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    if output.status.success() {
        HelperResponse::success(exit_code, stdout, stderr)
    } else {
        HelperResponse {
            ok: false,
            detail: Some("command_failed".to_string()),
            exit_code,
            stdout,
            stderr,
        }
    }
}

/// Best-effort 0660 + group ownership on the bound socket. Group chown
/// requires root; anything less logs a warning and keeps going.
fn apply_socket_permissions(socket_path: &Path, group_name: &str) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(e) =
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o660))
    {
        warn!(socket = %socket_path.display(), error = %e, "could not set socket mode");
    }

    let group_name = group_name.trim();
    if group_name.is_empty() {
        return;
    }
    let group = match nix::unistd::Group::from_name(group_name) {
        Ok(Some(group)) => group,
        Ok(None) => {
            warn!(group = group_name, "group not found; socket group unchanged");
            return;
        }
        Err(e) => {
            warn!(group = group_name, error = %e, "group lookup failed");
            return;
        }
    };

    if !nix::unistd::geteuid().is_root() {
        warn!("not running as root; cannot set socket group ownership");
        return;
    }
    if let Err(e) = nix::unistd::chown(socket_path, None, Some(group.gid)) {
        warn!(socket = %socket_path.display(), error = %e, "socket group chown failed");
    }
}
