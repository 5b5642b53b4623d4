//! Runs a [`ParseJob`] in a separate worker process.
//!
//! The child gets an address-space ceiling before exec, its resident memory
//! is sampled while it runs, and the whole run races a wall-clock timer. On
//! timeout or memory overrun the child is killed with SIGKILL, never asked
//! to stop. Only the single [`WorkerMessage`] on stdout crosses back.

use crate::core::job::{JobState, ParseJob};
use crate::core::parse::WorkerMessage;
use crate::utils::error::{Result, SiteGeoError};
use crate::utils::monitor::ProcessMonitor;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

pub const DEFAULT_PARSE_TIMEOUT: Duration = Duration::from_millis(30_000);
pub const DEFAULT_PARSE_MEMORY_BYTES: u64 = 524_288_000;

const STDERR_KEEP_BYTES: usize = 16 * 1024;
const MEMORY_SAMPLE_INTERVAL: Duration = Duration::from_millis(25);

/// Program and leading arguments used to start a parse worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-executes the running binary in worker mode.
    pub fn current_exe() -> Result<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
            args: vec!["parse-worker".to_string()],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseLimits {
    pub timeout: Duration,
    pub memory_bytes: u64,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PARSE_TIMEOUT,
            memory_bytes: DEFAULT_PARSE_MEMORY_BYTES,
        }
    }
}

enum Finished {
    Exited {
        status: ExitStatus,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    StdoutOverflow {
        bytes: usize,
    },
}

enum Race {
    Finished(std::io::Result<Finished>),
    TimedOut,
    MemoryExceeded(u64),
}

/// Executes `job` in an isolated worker and returns the raw feature
/// collection it produced. `job` is always terminal afterwards.
pub async fn run_isolated(
    job: &mut ParseJob,
    workdir: &Path,
    command: &WorkerCommand,
    limits: &ParseLimits,
) -> Result<serde_json::Value> {
    job.start()?;

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .arg("--format")
        .arg(job.format.to_string())
        .arg("--input")
        .arg(&job.input)
        .arg("--workdir")
        .arg(workdir)
        .arg("--max-unpacked-bytes")
        .arg(limits.memory_bytes.to_string())
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    apply_memory_ceiling(&mut cmd, limits.memory_bytes);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            job.finish(JobState::Crashed)?;
            return Err(SiteGeoError::WorkerCrashed {
                job_id: job.id,
                message: format!("failed to spawn {}: {}", command.program.display(), e),
            });
        }
    };

    let pid = child.id().unwrap_or_default();
    tracing::debug!("Parse job {} running in worker pid {}", job.id, pid);

    let monitor = ProcessMonitor::new(pid, MEMORY_SAMPLE_INTERVAL);
    let peak = monitor.peak_handle();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_cap = usize::try_from(limits.memory_bytes).unwrap_or(usize::MAX);

    let race = {
        let run = async {
            let (out, err) = tokio::join!(
                read_capped(stdout, stdout_cap),
                read_keeping_head(stderr, STDERR_KEEP_BYTES)
            );
            let (stdout, overflowed) = out?;
            if overflowed {
                return Ok(Finished::StdoutOverflow {
                    bytes: stdout.len(),
                });
            }
            let stderr = err?;
            let status = child.wait().await?;
            Ok(Finished::Exited {
                status,
                stdout,
                stderr,
            })
        };

        tokio::select! {
            finished = run => Race::Finished(finished),
            _ = tokio::time::sleep(limits.timeout) => Race::TimedOut,
            used = monitor.watch_ceiling(limits.memory_bytes) => Race::MemoryExceeded(used),
        }
    };

    let must_kill = !matches!(race, Race::Finished(Ok(Finished::Exited { .. })));
    if must_kill {
        if let Err(e) = child.start_kill() {
            tracing::debug!("Worker for job {} already gone: {}", job.id, e);
        }
        if let Err(e) = child.wait().await {
            tracing::warn!("Could not reap worker for job {}: {}", job.id, e);
        }
    }
    job.record_memory(peak.load(Ordering::Relaxed));

    match race {
        Race::TimedOut => {
            job.finish(JobState::TimedOut)?;
            tracing::error!(
                "Parse job {} killed after exceeding {:?} timeout",
                job.id,
                limits.timeout
            );
            Err(SiteGeoError::ParseTimeout {
                job_id: job.id,
                timeout_ms: limits.timeout.as_millis() as u64,
            })
        }
        Race::MemoryExceeded(used) => {
            job.record_memory(used);
            job.finish(JobState::MemoryExceeded)?;
            tracing::error!(
                "Parse job {} killed using {} bytes, ceiling {}",
                job.id,
                used,
                limits.memory_bytes
            );
            Err(SiteGeoError::MemoryLimitExceeded {
                job_id: job.id,
                limit: limits.memory_bytes,
            })
        }
        Race::Finished(Err(e)) => {
            job.finish(JobState::Crashed)?;
            Err(SiteGeoError::WorkerCrashed {
                job_id: job.id,
                message: format!("lost contact with worker: {}", e),
            })
        }
        Race::Finished(Ok(Finished::StdoutOverflow { bytes })) => {
            job.finish(JobState::MemoryExceeded)?;
            Err(SiteGeoError::PayloadTooLarge {
                size: bytes as u64,
                limit: limits.memory_bytes,
            })
        }
        Race::Finished(Ok(Finished::Exited {
            status,
            stdout,
            stderr,
        })) => interpret_exit(job, status, &stdout, &stderr, limits),
    }
}

fn interpret_exit(
    job: &mut ParseJob,
    status: ExitStatus,
    stdout: &[u8],
    stderr: &[u8],
    limits: &ParseLimits,
) -> Result<serde_json::Value> {
    let stderr_text = String::from_utf8_lossy(stderr);
    let message = serde_json::from_slice::<WorkerMessage>(stdout.trim_ascii());

    match message {
        Ok(WorkerMessage::Ok { feature_collection }) if status.success() => {
            job.finish(JobState::Succeeded)?;
            Ok(feature_collection)
        }
        Ok(WorkerMessage::Error { code, message }) => {
            job.finish(JobState::Failed(code))?;
            tracing::info!("Parse job {} rejected file: {} ({})", job.id, code, message);
            Err(SiteGeoError::ParseFailed { code, message })
        }
        _ if ran_out_of_memory(&status, &stderr_text) => {
            job.finish(JobState::MemoryExceeded)?;
            tracing::error!(
                "Parse job {} hit the {} byte address-space ceiling",
                job.id,
                limits.memory_bytes
            );
            Err(SiteGeoError::MemoryLimitExceeded {
                job_id: job.id,
                limit: limits.memory_bytes,
            })
        }
        other => {
            job.finish(JobState::Crashed)?;
            let detail = match other {
                Ok(WorkerMessage::Fault { message }) => message,
                _ => format!("worker exited with {}", status),
            };
            tracing::error!(
                "Parse job {} crashed after {:?}: {} | stderr: {}",
                job.id,
                job.elapsed(),
                detail,
                stderr_text.trim()
            );
            Err(SiteGeoError::WorkerCrashed {
                job_id: job.id,
                message: detail,
            })
        }
    }
}

const ALLOCATION_FAILURE_SIGNS: &[&str] = &[
    "memory allocation",
    "out of memory",
    "cannot allocate memory",
    "memory exhausted",
    "bad_alloc",
];

fn ran_out_of_memory(status: &ExitStatus, stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    let allocation_failure = ALLOCATION_FAILURE_SIGNS.iter().any(|sign| stderr.contains(sign));
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        let killed_by_abort = status.signal() == Some(nix::sys::signal::Signal::SIGABRT as i32);
        allocation_failure && (killed_by_abort || !status.success())
    }
    #[cfg(not(unix))]
    {
        allocation_failure && !status.success()
    }
}

#[cfg(unix)]
fn apply_memory_ceiling(cmd: &mut Command, bytes: u64) {
    use nix::sys::resource::{setrlimit, Resource};

    // SAFETY: the hook runs between fork and exec and only issues the
    // setrlimit syscall, which is async-signal-safe.
    unsafe {
        cmd.pre_exec(move || {
            setrlimit(Resource::RLIMIT_AS, bytes, bytes).map_err(std::io::Error::from)
        });
    }
}

#[cfg(not(unix))]
fn apply_memory_ceiling(_cmd: &mut Command, _bytes: u64) {}

/// Reads at most `cap` bytes; the flag reports whether more was available.
async fn read_capped<R: AsyncRead + Unpin>(
    reader: Option<R>,
    cap: usize,
) -> std::io::Result<(Vec<u8>, bool)> {
    let Some(reader) = reader else {
        return Ok((Vec::new(), false));
    };
    let mut buf = Vec::new();
    reader
        .take(cap as u64 + 1)
        .read_to_end(&mut buf)
        .await?;
    let overflowed = buf.len() > cap;
    Ok((buf, overflowed))
}

/// Drains the stream to EOF but keeps only the first `keep` bytes, so a
/// chatty worker can never block on a full pipe.
async fn read_keeping_head<R: AsyncRead + Unpin>(
    reader: Option<R>,
    keep: usize,
) -> std::io::Result<Vec<u8>> {
    let Some(mut reader) = reader else {
        return Ok(Vec::new());
    };
    let mut kept = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(kept);
        }
        let room = keep.saturating_sub(kept.len());
        kept.extend_from_slice(&chunk[..n.min(room)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::FileFormat;
    use std::time::Instant;

    fn shell(script: &str) -> WorkerCommand {
        // Extra worker flags land in $0.. and are ignored by the script.
        WorkerCommand::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    fn job() -> ParseJob {
        ParseJob::submit(PathBuf::from("input.kml"), FileFormat::Kml)
    }

    #[tokio::test]
    async fn test_stuck_worker_is_killed_on_timeout() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut job = job();
        let limits = ParseLimits {
            timeout: Duration::from_millis(200),
            memory_bytes: DEFAULT_PARSE_MEMORY_BYTES,
        };

        let started = Instant::now();
        let err = run_isolated(&mut job, dir.path(), &shell("sleep 30"), &limits)
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(err.code(), "PARSE_TIMEOUT");
        assert!(!err.is_client_error());
        assert_eq!(job.state(), JobState::TimedOut);
    }

    #[tokio::test]
    async fn test_success_message_is_returned() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut job = job();
        let script = r#"echo '{"status":"ok","featureCollection":{"type":"FeatureCollection","features":[]}}'"#;

        let value = run_isolated(&mut job, dir.path(), &shell(script), &ParseLimits::default())
            .await
            .unwrap();

        assert_eq!(value["type"], "FeatureCollection");
        assert_eq!(job.state(), JobState::Succeeded);
    }

    #[tokio::test]
    async fn test_rejection_becomes_client_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut job = job();
        let script = r#"echo '{"status":"error","code":"MISSING_CORE_FILES","message":"no .shx"}'"#;

        let err = run_isolated(&mut job, dir.path(), &shell(script), &ParseLimits::default())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "MISSING_CORE_FILES");
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_garbage_output_is_a_crash() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut job = job();

        let err = run_isolated(&mut job, dir.path(), &shell("echo oops; exit 3"), &ParseLimits::default())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "WORKER_CRASHED");
        assert_eq!(job.state(), JobState::Crashed);
    }

    #[tokio::test]
    async fn test_missing_program_is_a_crash() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut job = job();
        let command = WorkerCommand::new("/nonexistent/sitegeo-worker", vec![]);

        let err = run_isolated(&mut job, dir.path(), &command, &ParseLimits::default())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "WORKER_CRASHED");
        assert!(job.state().is_terminal());
    }

    #[tokio::test]
    async fn test_oversized_output_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut job = job();
        let limits = ParseLimits {
            timeout: Duration::from_secs(10),
            memory_bytes: 64 * 1024 * 1024,
        };
        // Cap stdout well below the address-space ceiling used for `sh`.
        let command = shell("head -c 70000000 /dev/zero");

        let err = run_isolated(&mut job, dir.path(), &command, &limits).await.unwrap_err();
        assert_eq!(err.code(), "PAYLOAD_TOO_LARGE");
        assert_eq!(job.state(), JobState::MemoryExceeded);
    }

    #[tokio::test]
    async fn test_allocation_failure_on_stderr_is_memory_limit() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut job = job();
        let script = "echo 'awk: Cannot allocate memory' >&2; exit 2";

        let err = run_isolated(&mut job, dir.path(), &shell(script), &ParseLimits::default())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "PARSE_MEMORY_LIMIT");
        assert_eq!(job.state(), JobState::MemoryExceeded);
    }

    #[tokio::test]
    async fn test_chatty_stderr_does_not_block() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut job = job();
        let script = r#"head -c 200000 /dev/zero >&2; echo '{"status":"ok","featureCollection":{"type":"FeatureCollection","features":[]}}'"#;

        let result = run_isolated(&mut job, dir.path(), &shell(script), &ParseLimits::default()).await;
        assert!(result.is_ok());
    }
}
