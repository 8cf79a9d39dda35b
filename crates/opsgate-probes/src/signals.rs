//! Database-backed health signals.
//!
//! Read-only scalar queries evaluated through the `psql` client binary —
//! the database itself is an external collaborator, reached the same way
//! an operator would reach it. A missing client binary or unreachable
//! database is an error string, never a panic.

use std::time::Duration;

use tracing::debug;

/// Default backlog query: messages still waiting in the outbox.
pub const DEFAULT_OUTBOX_QUERY: &str =
    "SELECT COUNT(*) FROM cis_messaging.cis_sms WHERE status='Outbox';";

/// Default failure query: failed sends among the most recent results.
pub const DEFAULT_FAILED_RECENT_QUERY: &str = "\
SELECT COALESCE(SUM(CASE WHEN q.success = false THEN 1 ELSE 0 END), 0)
FROM (
  SELECT r.success
  FROM cis_messaging.cis_sms_result r
  JOIN cis_messaging.cis_sms s ON s.id = r.sms_id
  ORDER BY s.create_time DESC
  LIMIT 200
) q;";

/// Run a query expected to return a single integer scalar.
pub async fn psql_scalar(dsn: &str, query: &str, timeout: Duration) -> Result<i64, String> {
    let mut cmd = tokio::process::Command::new("psql");
    cmd.arg(dsn)
        .arg("-At")
        .arg("-v")
        .arg("ON_ERROR_STOP=1")
        .arg("-c")
        .arg(query)
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(format!("failed to run psql: {e}")),
        Err(_) => return Err(format!("psql timed out after {}s", timeout.as_secs())),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(code = ?output.status.code(), "psql query failed");
        return Err(stderr.trim().to_string());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.lines().next().unwrap_or("").trim();
    if first.is_empty() {
        return Err("no scalar result".to_string());
    }
    first
        .parse::<i64>()
        .map_err(|_| format!("non-integer scalar result: {first}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bogus_dsn_reports_error_not_panic() {
        // Either psql is missing or the DSN is unreachable — both are Err.
        let result = psql_scalar(
            "postgres://nobody@127.0.0.1:1/nothing",
            "SELECT 1;",
            Duration::from_secs(2),
        )
        .await;
        assert!(result.is_err());
    }
}
