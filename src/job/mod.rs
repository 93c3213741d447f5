//! # Print Job Executor
//!
//! Turns a finished [`PrinterBitmap`] into the framed write sequence and
//! streams it over a [`Connection`]:
//!
//! ```text
//! INITIALIZE ─ settle ─ START_PRINT ─ settle ─ LF×before ─ raster chunks ─ LF×after ─ END_PRINT
//! ```
//!
//! ## Job States
//!
//! `Idle → Preparing → Printing → Completed | Failed → Idle`. `cancel()`
//! moves an active job to `Cancelling`; the job notices at its next phase
//! or chunk boundary and finishes as `Failed(Cancelled)`. A chunk already
//! being written always completes.
//!
//! ## Progress
//!
//! | Phase      | Percent          |
//! |------------|------------------|
//! | Initialize | 0                |
//! | Start      | 10               |
//! | Image      | 20 ... 90 by bytes sent |
//! | Finish     | 90               |
//! | Complete   | 100              |
//!
//! Callbacks run on the job's thread. A panicking callback is logged and
//! ignored.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::Connection;
use crate::error::{PrinterError, Result};
use crate::protocol::commands::line_feeds;
use crate::protocol::raster::{PrinterBitmap, build_raster_command};
use crate::sync::lock;

// ============================================================================
// CONSTANTS
// ============================================================================

pub const PROGRESS_INIT: u8 = 0;
pub const PROGRESS_START: u8 = 10;
pub const PROGRESS_IMAGE: u8 = 20;
/// Share of the bar covered by raster streaming
pub const PROGRESS_IMAGE_RANGE: u8 = 70;
pub const PROGRESS_FINISH: u8 = 90;
pub const PROGRESS_COMPLETE: u8 = 100;

/// Settle time after a control command is `command_delay` times this.
pub const COMMAND_DELAY_MULTIPLIER: f64 = 5.0;

const KB: usize = 1024;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Preparing,
    Printing,
    Cancelling,
    Completed,
    Failed,
}

impl JobState {
    /// Preparing or Printing.
    pub fn is_printing(self) -> bool {
        matches!(self, JobState::Preparing | JobState::Printing)
    }
}

/// Per-job settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintJobConfig {
    pub feed_lines_before: usize,
    pub feed_lines_after: usize,
    /// Base settle delay; the pause after INITIALIZE and START_PRINT is
    /// this times [`COMMAND_DELAY_MULTIPLIER`].
    #[serde(rename = "command_delay_seconds", with = "crate::printer::config::duration_secs")]
    pub command_delay: Duration,
    /// Raster bytes per write. Zero is treated as one.
    #[serde(rename = "chunk_size_bytes")]
    pub chunk_size: usize,
}

impl Default for PrintJobConfig {
    fn default() -> Self {
        Self {
            feed_lines_before: 0,
            feed_lines_after: 0,
            command_delay: Duration::from_millis(100),
            chunk_size: 1024,
        }
    }
}

/// One progress report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrintProgress {
    pub state: JobState,
    pub percentage: u8,
    pub message: String,
    pub bytes_sent: usize,
    pub total_bytes: usize,
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobFailure {
    /// The connection was gone when the job tried to write.
    /// Callers typically offer a reconnect.
    ConnectionLost,
    Cancelled,
    /// A write failed, possibly after a reconnect attempt.
    Print(String),
    Unexpected(String),
}

/// Terminal result of a job, handed to the completion callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(JobFailure),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Completed)
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(self, JobOutcome::Failed(JobFailure::ConnectionLost))
    }

    /// Human-readable summary for status bars and dialogs.
    pub fn message(&self) -> String {
        match self {
            JobOutcome::Completed => "Print completed successfully".to_string(),
            JobOutcome::Failed(JobFailure::ConnectionLost) => "Error: Connection lost".to_string(),
            JobOutcome::Failed(JobFailure::Cancelled) => "Print cancelled".to_string(),
            JobOutcome::Failed(JobFailure::Print(reason)) => format!("Print error: {}", reason),
            JobOutcome::Failed(JobFailure::Unexpected(reason)) => {
                format!("Unexpected error: {}", reason)
            }
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl From<PrinterError> for JobFailure {
    fn from(err: PrinterError) -> Self {
        match err {
            PrinterError::NotConnected => JobFailure::ConnectionLost,
            PrinterError::Print(reason) => JobFailure::Print(reason),
            other => JobFailure::Unexpected(other.to_string()),
        }
    }
}

pub type ProgressCallback = Arc<dyn Fn(&PrintProgress) + Send + Sync>;
pub type CompletionCallback = Arc<dyn Fn(&JobOutcome) + Send + Sync>;

// ============================================================================
// EXECUTOR
// ============================================================================

struct JobShared {
    connection: Arc<Connection>,
    state: Mutex<JobState>,
    /// Id of the job that owns `state`. Written only under the state lock.
    active_job: AtomicU64,
    cancel: Mutex<CancellationToken>,
    on_progress: Mutex<Option<ProgressCallback>>,
    on_complete: Mutex<Option<CompletionCallback>>,
}

/// Runs at most one print job at a time over a shared connection.
pub struct PrintJobManager {
    shared: Arc<JobShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PrintJobManager {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self {
            shared: Arc::new(JobShared {
                connection,
                state: Mutex::new(JobState::Idle),
                active_job: AtomicU64::new(0),
                cancel: Mutex::new(CancellationToken::new()),
                on_progress: Mutex::new(None),
                on_complete: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn state(&self) -> JobState {
        *lock(&self.shared.state)
    }

    pub fn is_printing(&self) -> bool {
        self.state().is_printing()
    }

    pub fn set_progress_callback<F>(&self, callback: F)
    where
        F: Fn(&PrintProgress) + Send + Sync + 'static,
    {
        *lock(&self.shared.on_progress) = Some(Arc::new(callback));
    }

    pub fn set_completion_callback<F>(&self, callback: F)
    where
        F: Fn(&JobOutcome) + Send + Sync + 'static,
    {
        *lock(&self.shared.on_complete) = Some(Arc::new(callback));
    }

    pub fn clear_callbacks(&self) {
        *lock(&self.shared.on_progress) = None;
        *lock(&self.shared.on_complete) = None;
    }

    /// Start a job.
    ///
    /// Returns `Ok(false)` without side effects if a job is still running
    /// (including one that is being cancelled), and `NotConnected` if the
    /// connection is down. With `blocking`, the job runs on this thread and
    /// the result says whether it succeeded; otherwise it runs on a worker
    /// thread and `Ok(true)` means it was accepted.
    pub fn print_image(&self, bitmap: PrinterBitmap, config: PrintJobConfig, blocking: bool) -> Result<bool> {
        let (job_id, token) = {
            let mut state = lock(&self.shared.state);
            if state.is_printing() || *state == JobState::Cancelling {
                debug!(state = ?*state, "print rejected, job already running");
                return Ok(false);
            }
            if !self.shared.connection.is_connected() {
                return Err(PrinterError::NotConnected);
            }
            *state = JobState::Preparing;
            let job_id = self.shared.active_job.fetch_add(1, Ordering::AcqRel) + 1;

            let token = CancellationToken::new();
            *lock(&self.shared.cancel) = token.clone();
            (job_id, token)
        };

        info!(
            width = bitmap.width(),
            height = bitmap.height(),
            chunk_size = config.chunk_size,
            job_id,
            blocking,
            "print job started"
        );

        if blocking {
            let outcome = execute(&self.shared, job_id, &bitmap, &config, &token);
            return Ok(outcome.is_success());
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("coreprint-job".to_string())
            .spawn(move || {
                execute(&shared, job_id, &bitmap, &config, &token);
            });

        match handle {
            Ok(handle) => {
                // A previous worker may still be inside its completion
                // callback; dropping its handle detaches it.
                *lock(&self.worker) = Some(handle);
                Ok(true)
            }
            Err(e) => {
                let mut state = lock(&self.shared.state);
                if self.shared.active_job.load(Ordering::Acquire) == job_id {
                    *state = JobState::Idle;
                }
                drop(state);
                Err(PrinterError::Io(e))
            }
        }
    }

    /// Ask the running job to stop at its next boundary.
    ///
    /// Returns false if nothing is printing.
    pub fn cancel(&self) -> bool {
        let mut state = lock(&self.shared.state);
        if !state.is_printing() {
            return false;
        }
        lock(&self.shared.cancel).cancel();
        *state = JobState::Cancelling;
        info!("print job cancellation requested");
        true
    }

    /// Block until the background job, if any, has finished.
    ///
    /// Must not be called from a progress or completion callback.
    pub fn wait(&self) {
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("print job worker panicked");
            }
        }
    }
}

impl fmt::Debug for PrintJobManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrintJobManager")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// EXECUTION ROUTINE
// ============================================================================

/// Run the job to a terminal state. Never panics out; ends in Idle unless a
/// newer job took over the state meanwhile.
fn execute(
    shared: &JobShared,
    job_id: u64,
    bitmap: &PrinterBitmap,
    config: &PrintJobConfig,
    token: &CancellationToken,
) -> JobOutcome {
    let run = panic::catch_unwind(AssertUnwindSafe(|| run_phases(shared, bitmap, config, token)));

    let outcome = match run {
        Ok(Ok(())) => JobOutcome::Completed,
        Ok(Err(failure)) => JobOutcome::Failed(failure),
        Err(_) => {
            error!("print job panicked");
            JobOutcome::Failed(JobFailure::Unexpected("print job panicked".to_string()))
        }
    };

    finalize(shared, job_id, &outcome);
    outcome
}

fn run_phases(
    shared: &JobShared,
    bitmap: &PrinterBitmap,
    config: &PrintJobConfig,
    token: &CancellationToken,
) -> std::result::Result<(), JobFailure> {
    let conn = &shared.connection;
    let settle = config.command_delay.mul_f64(COMMAND_DELAY_MULTIPLIER);

    checkpoint(token)?;
    report(shared, PROGRESS_INIT, "Initializing...", 0, 0);
    conn.initialize().map_err(send_failure)?;
    pause(settle);

    checkpoint(token)?;
    {
        let mut state = lock(&shared.state);
        if *state == JobState::Preparing {
            *state = JobState::Printing;
        }
    }
    report(shared, PROGRESS_START, "Starting print...", 0, 0);
    conn.start_print().map_err(send_failure)?;
    pause(settle);

    if config.feed_lines_before > 0 {
        conn.send_raw(&line_feeds(config.feed_lines_before), false)
            .map_err(send_failure)?;
    }

    checkpoint(token)?;
    report(shared, PROGRESS_IMAGE, "Processing image...", 0, 0);
    let raster = build_raster_command(bitmap);
    let total = raster.len();

    checkpoint(token)?;
    let mut sent = 0;
    for chunk in raster.chunks(config.chunk_size.max(1)) {
        checkpoint(token)?;
        conn.send_image(chunk).map_err(send_failure)?;
        sent += chunk.len();

        let streamed = (sent as u64 * u64::from(PROGRESS_IMAGE_RANGE) / total as u64) as u8;
        let message = format!("Sending: {}KB / {}KB", sent / KB, total / KB);
        report(shared, PROGRESS_IMAGE + streamed, &message, sent, total);
    }

    if config.feed_lines_after > 0 {
        conn.send_raw(&line_feeds(config.feed_lines_after), false)
            .map_err(send_failure)?;
    }

    checkpoint(token)?;
    report(shared, PROGRESS_FINISH, "Finishing...", sent, total);
    conn.end_print().map_err(send_failure)?;

    report(shared, PROGRESS_COMPLETE, "Complete", sent, total);
    Ok(())
}

fn checkpoint(token: &CancellationToken) -> std::result::Result<(), JobFailure> {
    if token.is_cancelled() {
        return Err(JobFailure::Cancelled);
    }
    Ok(())
}

fn send_failure(err: PrinterError) -> JobFailure {
    match &err {
        PrinterError::NotConnected | PrinterError::Print(_) => warn!(error = %err, "print job write failed"),
        _ => error!(error = %err, "unexpected error during print job"),
    }
    JobFailure::from(err)
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}

fn report(shared: &JobShared, percentage: u8, message: &str, bytes_sent: usize, total_bytes: usize) {
    let Some(callback) = lock(&shared.on_progress).clone() else {
        return;
    };
    let progress = PrintProgress {
        state: *lock(&shared.state),
        percentage,
        message: message.to_string(),
        bytes_sent,
        total_bytes,
    };
    if panic::catch_unwind(AssertUnwindSafe(|| callback(&progress))).is_err() {
        error!(percentage, "progress callback panicked");
    }
}

fn finalize(shared: &JobShared, job_id: u64, outcome: &JobOutcome) {
    let terminal = if outcome.is_success() {
        JobState::Completed
    } else {
        JobState::Failed
    };
    set_if_active(shared, job_id, terminal);

    match outcome {
        JobOutcome::Completed => info!("print job completed"),
        JobOutcome::Failed(JobFailure::Cancelled) => info!("print job cancelled"),
        JobOutcome::Failed(failure) => warn!(?failure, "print job failed"),
    }

    let callback = lock(&shared.on_complete).clone();
    if let Some(callback) = callback {
        if panic::catch_unwind(AssertUnwindSafe(|| callback(outcome))).is_err() {
            error!("completion callback panicked");
        }
    }

    // The callback may have started the next job.
    set_if_active(shared, job_id, JobState::Idle);
}

fn set_if_active(shared: &JobShared, job_id: u64, next: JobState) {
    let mut state = lock(&shared.state);
    if shared.active_job.load(Ordering::Acquire) == job_id {
        *state = next;
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_outcome_messages() {
        assert_eq!(JobOutcome::Completed.message(), "Print completed successfully");
        assert_eq!(
            JobOutcome::Failed(JobFailure::ConnectionLost).message(),
            "Error: Connection lost"
        );
        assert_eq!(JobOutcome::Failed(JobFailure::Cancelled).message(), "Print cancelled");
        assert_eq!(
            JobOutcome::Failed(JobFailure::Print("Failed to send data: broken pipe".into())).message(),
            "Print error: Failed to send data: broken pipe"
        );
        assert_eq!(
            JobOutcome::Failed(JobFailure::Unexpected("boom".into())).to_string(),
            "Unexpected error: boom"
        );
    }

    #[test]
    fn test_failure_from_printer_error() {
        assert_eq!(JobFailure::from(PrinterError::NotConnected), JobFailure::ConnectionLost);
        assert_eq!(
            JobFailure::from(PrinterError::Print("x".into())),
            JobFailure::Print("x".into())
        );
        assert!(matches!(
            JobFailure::from(PrinterError::Status("timed out".into())),
            JobFailure::Unexpected(_)
        ));
    }

    #[test]
    fn test_is_printing() {
        assert!(JobState::Preparing.is_printing());
        assert!(JobState::Printing.is_printing());
        assert!(!JobState::Cancelling.is_printing());
        assert!(!JobState::Idle.is_printing());
        assert!(!JobState::Completed.is_printing());
        assert!(!JobState::Failed.is_printing());
    }

    #[test]
    fn test_default_config() {
        let config = PrintJobConfig::default();
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.command_delay, Duration::from_millis(100));
        assert_eq!(config.feed_lines_before, 0);
    }

    #[test]
    fn test_config_from_json() {
        let config: PrintJobConfig =
            serde_json::from_str(r#"{"feed_lines_after": 3, "command_delay_seconds": 0.0}"#).unwrap();
        assert_eq!(config.feed_lines_after, 3);
        assert_eq!(config.command_delay, Duration::ZERO);
        assert_eq!(config.chunk_size, 1024);
    }
}
