//! Status collectors — host, disk, service, and container snapshots.
//!
//! Everything here degrades instead of failing: a missing `/proc` file, an
//! unreadable mount, or a broken `docker` binary turns into an error field
//! in the report, never an error response.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tracing::warn;

use opsgate_core::{DiskConfig, WatchedPath};

/// Budget for each external status command.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

// ── Host snapshot ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct MemorySnapshot {
    pub total_kb: u64,
    pub available_kb: u64,
    pub free_kb: u64,
    pub used_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostSnapshot {
    pub host: String,
    pub uptime_seconds: Option<u64>,
    /// 1, 5, and 15 minute load averages.
    pub load_avg: Option<[f64; 3]>,
    pub memory: Option<MemorySnapshot>,
}

pub fn host_snapshot() -> HostSnapshot {
    HostSnapshot {
        host: hostname(),
        uptime_seconds: uptime_seconds(),
        load_avg: load_avg(),
        memory: memory_snapshot(),
    }
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// `MemTotal`/`MemAvailable`/`MemFree` from `/proc/meminfo`, in kB.
fn memory_snapshot() -> Option<MemorySnapshot> {
    let content = std::fs::read_to_string("/proc/meminfo").ok()?;
    let mut fields: HashMap<&str, u64> = HashMap::new();
    for line in content.lines() {
        let Some((name, rest)) = line.split_once(':') else {
            continue;
        };
        if let Some(kb) = rest.trim().split_whitespace().next() {
            if let Ok(value) = kb.parse() {
                fields.insert(name, value);
            }
        }
    }

    let total_kb = *fields.get("MemTotal")?;
    let available_kb = fields.get("MemAvailable").copied().unwrap_or(0);
    let free_kb = fields.get("MemFree").copied().unwrap_or(0);
    let used_pct = if total_kb > 0 {
        ((total_kb.saturating_sub(available_kb)) as f64 / total_kb as f64 * 10000.0).round()
            / 100.0
    } else {
        0.0
    };
    Some(MemorySnapshot {
        total_kb,
        available_kb,
        free_kb,
        used_pct,
    })
}

fn uptime_seconds() -> Option<u64> {
    let content = std::fs::read_to_string("/proc/uptime").ok()?;
    let first = content.split_whitespace().next()?;
    Some(first.parse::<f64>().ok()? as u64)
}

fn load_avg() -> Option<[f64; 3]> {
    let content = std::fs::read_to_string("/proc/loadavg").ok()?;
    let mut parts = content.split_whitespace();
    let one = parts.next()?.parse().ok()?;
    let five = parts.next()?.parse().ok()?;
    let fifteen = parts.next()?.parse().ok()?;
    Some([one, five, fifteen])
}

// ── Disk report ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct MountReport {
    pub mount: String,
    pub device: String,
    pub fs_type: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub used_pct: f64,
    pub inodes_used_pct: f64,
    /// True when usage crossed the configured warn threshold.
    pub alert: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchedPathReport {
    pub path: String,
    /// Mount point of the filesystem holding the path.
    pub mount: String,
    pub size_bytes: u64,
    pub file_count: u64,
    /// True when the scan exceeded the configured `warn_bytes`.
    pub alert: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// One `/proc/self/mounts` row.
#[derive(Debug, Clone)]
struct MountEntry {
    device: String,
    mount_point: String,
    fs_type: String,
}

fn mount_table() -> Vec<MountEntry> {
    std::fs::read_to_string("/proc/self/mounts")
        .map(|raw| parse_mount_table(&raw))
        .unwrap_or_default()
}

/// `/proc` escapes whitespace in mount fields as octal (`\040` for space).
fn parse_mount_table(raw: &str) -> Vec<MountEntry> {
    raw.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            Some(MountEntry {
                device: unescape_mount_field(fields.next()?),
                mount_point: unescape_mount_field(fields.next()?),
                fs_type: fields.next()?.to_string(),
            })
        })
        .collect()
}

fn unescape_mount_field(field: &str) -> String {
    field.replace("\\040", " ").replace("\\011", "\t")
}

/// Longest mount point that is a path prefix of `path`.
fn owning_mount<'a>(table: &'a [MountEntry], path: &Path) -> Option<&'a MountEntry> {
    table
        .iter()
        .filter(|entry| path.starts_with(&entry.mount_point))
        .max_by_key(|entry| entry.mount_point.len())
}

#[derive(Debug, Clone, Serialize)]
pub struct DiskReport {
    pub mounts: Vec<MountReport>,
    pub watched_paths: Vec<WatchedPathReport>,
}

pub fn disk_report(config: &DiskConfig) -> DiskReport {
    let table = mount_table();
    let mut mounts: Vec<MountReport> = config
        .mounts
        .iter()
        .map(|m| mount_report(m, config.used_pct_warn, &table))
        .collect();
    if mounts.is_empty() {
        mounts.push(mount_report("/", config.used_pct_warn, &table));
    }

    let watched_paths = config
        .watch_paths
        .iter()
        .map(|watched| watched_path_report(watched, &table))
        .collect();
    DiskReport {
        mounts,
        watched_paths,
    }
}

fn mount_report(mount: &str, warn_pct: f64, table: &[MountEntry]) -> MountReport {
    let (device, fs_type) = match owning_mount(table, Path::new(mount)) {
        Some(entry) => (entry.device.clone(), entry.fs_type.clone()),
        None => (String::new(), String::new()),
    };
    match nix::sys::statvfs::statvfs(Path::new(mount)) {
        Ok(stat) => {
            let frsize = stat.fragment_size() as u64;
            let total_bytes = stat.blocks() as u64 * frsize;
            let free_bytes = stat.blocks_available() as u64 * frsize;
            let used_bytes = total_bytes.saturating_sub(stat.blocks_free() as u64 * frsize);
            let used_pct = pct(used_bytes, total_bytes);

            let inodes_total = stat.files() as u64;
            let inodes_used = inodes_total.saturating_sub(stat.files_free() as u64);
            let inodes_used_pct = pct(inodes_used, inodes_total);

            MountReport {
                mount: mount.to_string(),
                device,
                fs_type,
                total_bytes,
                used_bytes,
                free_bytes,
                used_pct,
                inodes_used_pct,
                alert: used_pct >= warn_pct || inodes_used_pct >= warn_pct,
                error: String::new(),
            }
        }
        Err(e) => {
            warn!(mount, error = %e, "statvfs failed");
            MountReport {
                mount: mount.to_string(),
                device,
                fs_type,
                total_bytes: 0,
                used_bytes: 0,
                free_bytes: 0,
                used_pct: 0.0,
                inodes_used_pct: 0.0,
                alert: false,
                error: e.to_string(),
            }
        }
    }
}

fn watched_path_report(watched: &WatchedPath, table: &[MountEntry]) -> WatchedPathReport {
    let mut size_bytes = 0u64;
    let mut file_count = 0u64;
    let error = match scan_dir(&watched.path, &mut size_bytes, &mut file_count) {
        Ok(()) => String::new(),
        Err(e) => e.to_string(),
    };
    WatchedPathReport {
        path: watched.path.display().to_string(),
        mount: owning_mount(table, &watched.path)
            .map(|entry| entry.mount_point.clone())
            .unwrap_or_default(),
        size_bytes,
        file_count,
        alert: watched.warn_bytes.is_some_and(|warn| size_bytes >= warn),
        error,
    }
}

/// Recursive size scan. Entries that vanish mid-scan are skipped; a
/// top-level failure is reported for the whole path.
fn scan_dir(dir: &Path, size: &mut u64, count: &mut u64) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let Ok(entry) = entry else { continue };
        let Ok(meta) = entry.metadata() else { continue };
        if meta.is_dir() {
            let _ = scan_dir(&entry.path(), size, count);
        } else {
            *size += meta.len();
            *count += 1;
        }
    }
    Ok(())
}

fn pct(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (used as f64 / total as f64 * 10000.0).round() / 100.0
}

// ── Service and container status ───────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ServiceReport {
    pub name: String,
    pub status: String,
    pub sub_status: String,
    pub enabled: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// One line of `docker ps -a` output for a known container.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerReport {
    pub name: String,
    pub status: String,
    pub image: String,
    pub ports: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// `systemctl show <unit> --property=... --value` emits one property per
/// line in the order requested.
pub async fn service_status(name: &str) -> ServiceReport {
    let output = run_status_command(
        "systemctl",
        &[
            "show",
            name,
            "--property=ActiveState,SubState,UnitFileState",
            "--value",
        ],
    )
    .await;

    match output {
        Ok(stdout) => {
            let mut lines = stdout.lines();
            ServiceReport {
                name: name.to_string(),
                status: lines.next().unwrap_or("unknown").to_string(),
                sub_status: lines.next().unwrap_or("").to_string(),
                enabled: lines.next().unwrap_or("").to_string(),
                error: String::new(),
            }
        }
        Err(e) => ServiceReport {
            name: name.to_string(),
            status: "unknown".to_string(),
            sub_status: String::new(),
            enabled: String::new(),
            error: e,
        },
    }
}

/// Inventory every container once, then match configured names against it.
pub async fn container_reports(names: &[String]) -> Vec<ContainerReport> {
    let inventory = match run_status_command(
        "docker",
        &[
            "ps",
            "-a",
            "--format",
            "{{.Names}}\t{{.Status}}\t{{.Image}}\t{{.Ports}}",
        ],
    )
    .await
    {
        Ok(stdout) => {
            let mut map = HashMap::new();
            for line in stdout.lines() {
                let parts: Vec<&str> = line.split('\t').collect();
                if parts.len() < 4 {
                    continue;
                }
                map.insert(
                    parts[0].to_string(),
                    (parts[1].to_string(), parts[2].to_string(), parts[3].to_string()),
                );
            }
            Ok(map)
        }
        Err(e) => Err(e),
    };

    names
        .iter()
        .map(|name| match &inventory {
            Ok(map) => match map.get(name) {
                Some((status, image, ports)) => ContainerReport {
                    name: name.clone(),
                    status: status.clone(),
                    image: image.clone(),
                    ports: ports.clone(),
                    error: String::new(),
                },
                None => ContainerReport {
                    name: name.clone(),
                    status: "not_found".to_string(),
                    image: String::new(),
                    ports: String::new(),
                    error: "container not found".to_string(),
                },
            },
            Err(e) => ContainerReport {
                name: name.clone(),
                status: "unknown".to_string(),
                image: String::new(),
                ports: String::new(),
                error: e.clone(),
            },
        })
        .collect()
}

async fn run_status_command(program: &str, args: &[&str]) -> Result<String, String> {
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);

    let output = tokio::time::timeout(COMMAND_TIMEOUT, command.output())
        .await
        .map_err(|_| format!("{program} timed out after {}s", COMMAND_TIMEOUT.as_secs()))?
        .map_err(|e| format!("failed to run {program}: {e}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(if stderr.is_empty() {
            format!("{program} exited with {}", output.status)
        } else {
            stderr
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_snapshot_reads_proc() {
        let snapshot = host_snapshot();
        assert!(!snapshot.host.is_empty());
        // On Linux these should all be present.
        assert!(snapshot.uptime_seconds.is_some());
        assert!(snapshot.load_avg.is_some());
        let memory = snapshot.memory.unwrap();
        assert!(memory.total_kb > 0);
        assert!(memory.used_pct >= 0.0 && memory.used_pct <= 100.0);
    }

    #[test]
    fn root_mount_report_carries_device_and_fs_type() {
        let report = mount_report("/", 90.0, &mount_table());
        assert!(report.error.is_empty());
        assert!(report.total_bytes > 0);
        assert!(report.used_pct >= 0.0 && report.used_pct <= 100.0);
        // "/" is always present in /proc/self/mounts.
        assert!(!report.device.is_empty());
        assert!(!report.fs_type.is_empty());
    }

    #[test]
    fn missing_mount_degrades() {
        let report = mount_report("/no/such/mount", 90.0, &mount_table());
        assert!(!report.error.is_empty());
        assert_eq!(report.total_bytes, 0);
        assert!(!report.alert);
    }

    #[test]
    fn mount_table_parses_fields_and_octal_escapes() {
        let raw = "/dev/sda1 / ext4 rw,relatime 0 0\n\
                   tmpfs /run tmpfs rw,nosuid 0 0\n\
                   /dev/sdb1 /mnt/usb\\040drive vfat rw 0 0\n\
                   broken-line\n";
        let table = parse_mount_table(raw);
        assert_eq!(table.len(), 3);
        assert_eq!(table[0].device, "/dev/sda1");
        assert_eq!(table[0].fs_type, "ext4");
        assert_eq!(table[2].mount_point, "/mnt/usb drive");
    }

    #[test]
    fn owning_mount_prefers_the_longest_prefix() {
        let table = parse_mount_table(
            "/dev/sda1 / ext4 rw 0 0\n\
             /dev/sdb1 /var ext4 rw 0 0\n\
             /dev/sdc1 /var/log xfs rw 0 0\n",
        );
        let owner = owning_mount(&table, Path::new("/var/log/nginx/access.log")).unwrap();
        assert_eq!(owner.mount_point, "/var/log");
        let owner = owning_mount(&table, Path::new("/var/lib/docker")).unwrap();
        assert_eq!(owner.mount_point, "/var");
        let owner = owning_mount(&table, Path::new("/etc/hosts")).unwrap();
        assert_eq!(owner.mount_point, "/");
    }

    #[test]
    fn watched_path_scan_counts_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.log"), b"12345").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.log"), b"123").unwrap();

        let report = watched_path_report(
            &WatchedPath {
                path: dir.path().to_path_buf(),
                warn_bytes: Some(4),
            },
            &mount_table(),
        );
        assert!(report.error.is_empty());
        assert_eq!(report.file_count, 2);
        assert_eq!(report.size_bytes, 8);
        assert!(report.alert);
        // Every absolute path belongs to some mount, "/" at worst.
        assert!(!report.mount.is_empty());
    }

    #[test]
    fn watched_path_missing_reports_error() {
        let report = watched_path_report(
            &WatchedPath {
                path: "/no/such/dir".into(),
                warn_bytes: None,
            },
            &mount_table(),
        );
        assert!(!report.error.is_empty());
        assert_eq!(report.size_bytes, 0);
        assert!(!report.alert);
    }

    #[tokio::test]
    async fn missing_status_program_degrades() {
        let report = container_reports(&["web".to_string()]).await;
        // Whether docker exists or not, the request itself never fails.
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].name, "web");
    }

    #[test]
    fn pct_handles_zero_total() {
        assert_eq!(pct(5, 0), 0.0);
        assert_eq!(pct(1, 4), 25.0);
    }
}
