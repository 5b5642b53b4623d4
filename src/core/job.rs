use crate::domain::model::FileFormat;
use crate::utils::error::{ParseErrorCode, Result, SiteGeoError};
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Submitted,
    Running,
    Succeeded,
    Failed(ParseErrorCode),
    /// The worker died or misbehaved without reporting a parse code.
    Crashed,
    MemoryExceeded,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Submitted | JobState::Running)
    }

    fn can_transition_to(&self, next: &JobState) -> bool {
        match (self, next) {
            (JobState::Submitted, JobState::Running) => true,
            (JobState::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Submitted => f.write_str("submitted"),
            JobState::Running => f.write_str("running"),
            JobState::Succeeded => f.write_str("succeeded"),
            JobState::Failed(code) => write!(f, "failed({})", code),
            JobState::Crashed => f.write_str("crashed"),
            JobState::MemoryExceeded => f.write_str("memory-exceeded"),
            JobState::TimedOut => f.write_str("timed-out"),
        }
    }
}

/// One isolated attempt to turn an uploaded file into features.
///
/// Jobs are single-use: once terminal they accept no further transitions.
#[derive(Debug)]
pub struct ParseJob {
    pub id: u64,
    pub input: PathBuf,
    pub format: FileFormat,
    pub submitted_at: DateTime<Utc>,
    state: JobState,
    started: Option<Instant>,
    elapsed: Option<Duration>,
    peak_memory_bytes: u64,
}

impl ParseJob {
    pub fn submit(input: PathBuf, format: FileFormat) -> Self {
        let job = Self {
            id: NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed),
            input,
            format,
            submitted_at: Utc::now(),
            state: JobState::Submitted,
            started: None,
            elapsed: None,
            peak_memory_bytes: 0,
        };
        tracing::debug!("Parse job {} submitted for {} file", job.id, job.format);
        job
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Time spent running; live while running, frozen once terminal.
    pub fn elapsed(&self) -> Duration {
        match (self.elapsed, self.started) {
            (Some(elapsed), _) => elapsed,
            (None, Some(started)) => started.elapsed(),
            (None, None) => Duration::ZERO,
        }
    }

    pub fn peak_memory_bytes(&self) -> u64 {
        self.peak_memory_bytes
    }

    pub fn record_memory(&mut self, bytes: u64) {
        self.peak_memory_bytes = self.peak_memory_bytes.max(bytes);
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(JobState::Running)?;
        self.started = Some(Instant::now());
        Ok(())
    }

    pub fn finish(&mut self, outcome: JobState) -> Result<()> {
        self.transition(outcome)?;
        self.elapsed = Some(self.started.map(|s| s.elapsed()).unwrap_or_default());
        tracing::info!(
            "Parse job {} {} after {:?} (peak memory {} bytes)",
            self.id,
            self.state,
            self.elapsed(),
            self.peak_memory_bytes
        );
        Ok(())
    }

    fn transition(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_transition_to(&next) {
            return Err(SiteGeoError::InvalidJobTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }
}
