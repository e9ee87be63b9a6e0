//! Tape Extraction Engine
//!
//! `TapeImager` owns one validated job, the tape device and the event sink
//! for the duration of a run. It walks the tape session by session (see
//! `walker`), probing the block size of each extracted session (`probe`)
//! and streaming it to disk (`extract`), then writes the checksum manifest.
//! `runner` hosts the engine on a background task.

pub mod extract;
pub mod probe;
pub mod runner;
pub mod walker;

pub use runner::{spawn, RunHandle};
pub use walker::WalkerState;

use crate::config::TapeImgrConfig;
use crate::events::EventSink;
use crate::job::Job;
use crate::tape::TapeDevice;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Engine limits and policies that are not part of the job itself
#[derive(Debug, Clone, PartialEq)]
pub struct ImagerSettings {
    pub block_size_step: usize,
    pub max_block_size: usize,
    pub session_limit: u32,
    pub max_consecutive_read_errors: u32,
    pub log_file_name: String,
}

impl Default for ImagerSettings {
    fn default() -> Self {
        Self::from_config(&TapeImgrConfig::default())
    }
}

impl ImagerSettings {
    pub fn from_config(config: &TapeImgrConfig) -> Self {
        Self {
            block_size_step: config.block_size_step,
            max_block_size: config.max_block_size,
            session_limit: config.session_limit,
            max_consecutive_read_errors: config.max_consecutive_read_errors,
            log_file_name: config.log_file_name.clone(),
        }
    }
}

/// Cooperative cancellation flag, checked between blocks and between sessions
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionDecision {
    Extract,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Being processed
    Pending,
    /// Extracted up to its filemark
    Completed,
    /// Fast-forwarded
    Skipped,
    /// Filemark found before any data
    Empty,
    Failed(String),
    Cancelled,
}

/// Per-session result, one for every session encountered on tape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub index: u32,
    pub decision: SessionDecision,
    pub block_size: Option<usize>,
    pub output_path: Option<PathBuf>,
    pub bytes_written: u64,
    pub read_errors: u64,
    pub end_of_tape: bool,
    pub status: SessionStatus,
    /// Status code of the read that ended the extraction
    pub terminating_status: Option<i32>,
}

impl SessionRecord {
    pub fn new(index: u32, decision: SessionDecision) -> Self {
        Self {
            index,
            decision,
            block_size: None,
            output_path: None,
            bytes_written: 0,
            read_errors: 0,
            end_of_tape: false,
            status: SessionStatus::Pending,
            terminating_status: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, SessionStatus::Failed(_))
    }
}

/// Why the walk stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// Forward step failed: no further session on tape
    EndOfTape,
    /// The configured session cap was reached before end of tape
    SessionLimitExceeded,
    Cancelled,
    /// A tape-control operation could not be issued mid-run
    DeviceLost(String),
    /// The drive could not be used at all; nothing was read
    DeviceUnavailable(String),
}

/// Final result of a run, handed to the caller exactly once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub success: bool,
    pub device_inaccessible: bool,
    pub termination: Termination,
    pub sessions: Vec<SessionRecord>,
    pub checksums_written: bool,
    pub manifest_path: Option<PathBuf>,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl RunOutcome {
    fn new(
        termination: Termination,
        sessions: Vec<SessionRecord>,
        manifest_path: Option<PathBuf>,
        started_at: DateTime<Local>,
    ) -> Self {
        let device_inaccessible = matches!(termination, Termination::DeviceUnavailable(_));
        let checksums_written = manifest_path.is_some();
        let success = termination == Termination::EndOfTape
            && checksums_written
            && !sessions.iter().any(SessionRecord::is_failed);

        Self {
            success,
            device_inaccessible,
            termination,
            sessions,
            checksums_written,
            manifest_path,
            started_at,
            finished_at: Local::now(),
        }
    }

    /// Sessions that produced an output file
    pub fn extracted(&self) -> impl Iterator<Item = &SessionRecord> {
        self.sessions.iter().filter(|s| s.output_path.is_some())
    }

    pub fn total_bytes(&self) -> u64 {
        self.sessions.iter().map(|s| s.bytes_written).sum()
    }
}

/// Tape extraction engine for one job
pub struct TapeImager<D: TapeDevice> {
    pub(crate) job: Job,
    pub(crate) settings: ImagerSettings,
    pub(crate) device: D,
    pub(crate) events: EventSink,
    pub(crate) cancel: CancelToken,
    pub(crate) state: WalkerState,
    pub(crate) current: Option<SessionRecord>,
    pub(crate) records: Vec<SessionRecord>,
}

impl<D: TapeDevice> TapeImager<D> {
    pub fn new(job: Job, settings: ImagerSettings, device: D, events: EventSink) -> Self {
        Self {
            job,
            settings,
            device,
            events,
            cancel: CancelToken::new(),
            state: WalkerState::AwaitingSession,
            current: None,
            records: Vec::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn state(&self) -> WalkerState {
        self.state
    }
}
