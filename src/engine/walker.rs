//! Tape Walker
//!
//! State machine driving a run:
//!
//! ```text
//! AwaitingSession -> ExtractingOrSkipping -> PositioningForward
//!     ^                                          |          |
//!     |                                   step ok|          |step failed
//!     +------------- Positioned <----------------+          v
//!                                                       EndOfTape -> Done
//! ```
//!
//! End of tape is detected by spacing one record forward after each
//! session: success means another session exists (step back to re-align),
//! failure means there is none. A refused step back leaves the head inside
//! the next session, so it ends the walk as a lost device. Cancellation and
//! the session cap leave `AwaitingSession` straight for `Done`. Every path
//! into `Done` runs the checksum pass and then rewinds and ejects the tape.

use super::extract::{extract_session, ExtractEnd, ExtractSettings};
use super::probe::{initial_candidate, probe_block_size, ProbeSettings};
use super::{
    RunOutcome, SessionDecision, SessionRecord, SessionStatus, TapeImager, Termination,
};
use crate::checksum;
use crate::error::{Result, TapeImgrError};
use crate::job::is_writable_dir;
use crate::tape::TapeDevice;
use chrono::Local;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkerState {
    AwaitingSession,
    ExtractingOrSkipping,
    PositioningForward,
    Positioned,
    EndOfTape,
    Done,
}

/// Result of processing the current session
enum SessionEnd {
    /// Tape sits at the start of the next session (or end of data)
    Aligned,
    /// Positioning proved there is no further session
    EndOfData,
    Cancelled,
}

impl<D: TapeDevice> TapeImager<D> {
    /// Run the job to completion.
    ///
    /// Returns `PreconditionFailed` (before touching the device) if the
    /// output directory is gone or unwritable. An unusable drive is not an
    /// `Err`: the outcome is flagged `device_inaccessible`.
    pub fn run(&mut self) -> Result<RunOutcome> {
        let started_at = Local::now();

        let dir_out = self.job.dir_out().to_path_buf();
        if !dir_out.is_dir() || !is_writable_dir(&dir_out) {
            return Err(TapeImgrError::precondition(format!(
                "output directory {:?} is missing or not writable",
                dir_out
            )));
        }

        self.log_job_header();

        self.events.info("# Tape status");
        match self.device.status() {
            Ok(status) => {
                for line in status.report.lines().filter(|l| !l.trim().is_empty()) {
                    self.events.info(line.trim_end().to_string());
                }
            }
            Err(e) if e.is_device_fatal() => {
                self.events.error(format!(
                    "Cannot access tape device {}: {}",
                    self.device.name(),
                    e
                ));
                self.state = WalkerState::Done;
                return Ok(RunOutcome::new(
                    Termination::DeviceUnavailable(e.to_string()),
                    Vec::new(),
                    None,
                    started_at,
                ));
            }
            Err(e) => return Err(e),
        }

        let termination = self.walk();
        let manifest_path = self.finish(&termination);
        self.state = WalkerState::Done;

        let outcome = RunOutcome::new(
            termination,
            std::mem::take(&mut self.records),
            manifest_path,
            started_at,
        );

        self.events.info(format!(
            "# Run finished: {:?}, {} session(s), {} extracted, success = {}",
            outcome.termination,
            outcome.sessions.len(),
            outcome.extracted().count(),
            outcome.success
        ));
        self.events.info(format!("# End date/time {}", outcome.finished_at.format("%c")));

        Ok(outcome)
    }

    fn log_job_header(&self) {
        let job = &self.job;
        let sessions: Vec<String> = job.sessions().iter().map(|s| s.to_string()).collect();

        self.events.info("*** Tape extraction log ***");
        self.events.info(format!("# Start date/time {}", Local::now().format("%c")));
        self.events.info("# User input");
        self.events.info(format!("dirOut = {}", job.dir_out().display()));
        self.events.info(format!("tapeDevice = {}", job.tape_device()));
        self.events.info(format!("initial blockSize = {}", job.init_block_size()));
        self.events.info(format!("sessions = {}", sessions.join(",")));
        self.events.info(format!("prefix = {}", job.prefix()));
        self.events.info(format!("extension = {}", job.extension()));
        self.events.info(format!("fill blocks = {}", job.fill_blocks()));

        if job.fill_blocks() && job.init_block_size() != initial_candidate(job) {
            self.events.info(format!(
                "Reset initial block size to {} because fill blocks is used",
                initial_candidate(job)
            ));
        }
    }

    /// Drive the state machine until a terminal state; returns why it stopped
    fn walk(&mut self) -> Termination {
        let mut session: u32 = 1;
        self.state = WalkerState::AwaitingSession;

        loop {
            debug!("Walker state {:?} (session {})", self.state, session);

            self.state = match self.state {
                WalkerState::AwaitingSession => {
                    if self.cancel.is_cancelled() {
                        self.events
                            .warning(format!("# Cancelled before session {}", session));
                        return Termination::Cancelled;
                    }
                    if session > self.settings.session_limit {
                        self.events.error(format!(
                            "# Session limit of {} exceeded without reaching end of tape",
                            self.settings.session_limit
                        ));
                        return Termination::SessionLimitExceeded;
                    }

                    let decision = if self.job.wants_session(session) {
                        SessionDecision::Extract
                    } else {
                        SessionDecision::Skip
                    };
                    self.current = Some(SessionRecord::new(session, decision));
                    WalkerState::ExtractingOrSkipping
                }

                WalkerState::ExtractingOrSkipping => {
                    let result = match self.current.as_ref().map(|r| r.decision) {
                        Some(SessionDecision::Extract) => self.extract_current(session),
                        _ => self.skip_current(session),
                    };

                    match result {
                        Ok(SessionEnd::Aligned) => WalkerState::PositioningForward,
                        Ok(SessionEnd::EndOfData) => {
                            self.mark_end_of_tape();
                            WalkerState::EndOfTape
                        }
                        Ok(SessionEnd::Cancelled) => {
                            self.close_current();
                            return Termination::Cancelled;
                        }
                        Err(e) => return self.device_lost(e),
                    }
                }

                WalkerState::PositioningForward => {
                    // Try to position the tape one record forward; if this
                    // fails the end of the tape was reached
                    match self.device.step_forward(1) {
                        Ok(code) => {
                            self.events.info(format!("mt exit code = {}", code));
                            if code.is_ok() {
                                WalkerState::Positioned
                            } else {
                                self.mark_end_of_tape();
                                WalkerState::EndOfTape
                            }
                        }
                        Err(e) => return self.device_lost(e),
                    }
                }

                WalkerState::Positioned => {
                    // Another session exists: step back over the record we spaced past.
                    // If that is refused the head sits inside the next session.
                    match self.device.step_backward(1) {
                        Ok(code) if !code.is_ok() => {
                            return self.device_lost(TapeImgrError::device_io(format!(
                                "cannot step back to start of session {} (status {})",
                                session + 1,
                                code
                            )));
                        }
                        Ok(_) => {}
                        Err(e) => return self.device_lost(e),
                    }
                    self.close_current();
                    session += 1;
                    WalkerState::AwaitingSession
                }

                WalkerState::EndOfTape => {
                    self.events.info("# Reached end of tape");
                    return Termination::EndOfTape;
                }

                WalkerState::Done => return Termination::EndOfTape,
            };
        }
    }

    fn skip_current(&mut self, session: u32) -> Result<SessionEnd> {
        self.events.info(format!(
            "# Skipping session # {}, fast-forward to next session",
            session
        ));

        let code = self.device.fast_forward(1)?;
        self.events.info(format!("mt exit code = {}", code));

        if let Some(record) = self.current.as_mut() {
            record.status = SessionStatus::Skipped;
        }

        if code.is_ok() {
            Ok(SessionEnd::Aligned)
        } else {
            Ok(SessionEnd::EndOfData)
        }
    }

    fn extract_current(&mut self, session: u32) -> Result<SessionEnd> {
        let path = self.job.session_path(session);
        self.events.info(format!(
            "# Extracting session # {} to file {}",
            session,
            path.display()
        ));

        let probe_settings = ProbeSettings {
            step: self.settings.block_size_step,
            ceiling: self.settings.max_block_size,
            max_unreadable: if self.job.fill_blocks() {
                self.settings.max_consecutive_read_errors
            } else {
                0
            },
        };
        let initial = initial_candidate(&self.job);

        let probe = match probe_block_size(&mut self.device, initial, &probe_settings) {
            Ok(probe) => probe,
            Err(e @ TapeImgrError::BlockSizeOverflow { .. })
            | Err(e @ TapeImgrError::SessionRead(_)) => {
                self.events.error(format!("Session {}: {}", session, e));
                self.fail_current(e.to_string());
                return self.skip_rest_of_session();
            }
            Err(e) => return Err(e),
        };

        self.events.info(format!(
            "Block size = {} ({} probe retries)",
            probe.block_size, probe.retries
        ));
        if let Some(record) = self.current.as_mut() {
            record.block_size = Some(probe.block_size);
            record.output_path = Some(path.clone());
        }

        let settings = ExtractSettings {
            fill_blocks: self.job.fill_blocks(),
            max_consecutive_errors: self.settings.max_consecutive_read_errors,
        };

        let extraction = match extract_session(
            &mut self.device,
            probe,
            &path,
            &settings,
            &self.cancel,
            &self.events,
        ) {
            Ok(extraction) => extraction,
            Err(e) => {
                // Output side failure (disk full, permissions): give up on this session only
                self.events.error(format!(
                    "Session {}: cannot write {}: {}",
                    session,
                    path.display(),
                    e
                ));
                self.fail_current(format!("output write failed: {}", e));
                return self.skip_rest_of_session();
            }
        };

        if let Some(record) = self.current.as_mut() {
            record.bytes_written = extraction.bytes_written;
            record.read_errors = extraction.read_errors;
            record.terminating_status = Some(extraction.terminating_status().0);
        }

        match extraction.end {
            ExtractEnd::EndOfSession => {
                let status = if extraction.blocks == 0 {
                    SessionStatus::Empty
                } else {
                    SessionStatus::Completed
                };
                if let Some(record) = self.current.as_mut() {
                    record.status = status;
                }
                Ok(SessionEnd::Aligned)
            }
            ExtractEnd::Aborted(err) => {
                self.events.error(format!(
                    "Session {} extraction aborted after {} bytes: {}",
                    session, extraction.bytes_written, err
                ));
                self.fail_current(err.to_string());
                self.skip_rest_of_session()
            }
            ExtractEnd::Cancelled => {
                if let Some(record) = self.current.as_mut() {
                    record.status = SessionStatus::Cancelled;
                }
                self.events.warning(format!(
                    "Session {} cancelled after {} bytes",
                    session, extraction.bytes_written
                ));
                Ok(SessionEnd::Cancelled)
            }
        }
    }

    /// After a failed extraction the head is inside the session; space past its filemark
    fn skip_rest_of_session(&mut self) -> Result<SessionEnd> {
        let code = self.device.fast_forward(1)?;
        self.events.info(format!(
            "# Fast-forward past remainder of session, mt exit code = {}",
            code
        ));
        if code.is_ok() {
            Ok(SessionEnd::Aligned)
        } else {
            Ok(SessionEnd::EndOfData)
        }
    }

    fn fail_current(&mut self, reason: String) {
        if let Some(record) = self.current.as_mut() {
            record.status = SessionStatus::Failed(reason);
        }
    }

    fn mark_end_of_tape(&mut self) {
        if let Some(record) = self.current.as_mut() {
            record.end_of_tape = true;
        }
        self.close_current();
    }

    fn close_current(&mut self) {
        if let Some(record) = self.current.take() {
            self.records.push(record);
        }
    }

    fn device_lost(&mut self, e: TapeImgrError) -> Termination {
        self.events.error(format!("Tape control failed: {}", e));
        if let Some(record) = self.current.as_mut() {
            if record.status == SessionStatus::Pending {
                record.status = SessionStatus::Failed(e.to_string());
            }
        }
        self.close_current();
        Termination::DeviceLost(e.to_string())
    }

    /// Checksum pass, then rewind and eject. Returns the manifest path when written.
    fn finish(&mut self, termination: &Termination) -> Option<PathBuf> {
        debug!("Finishing run: {:?}", termination);

        self.events.info("# Creating checksum file");
        let manifest_path =
            match checksum::write_manifest(self.job.dir_out(), self.job.extension()) {
                Ok(manifest) => {
                    self.events.info(format!(
                        "Checksums for {} file(s) written to {}",
                        manifest.entries.len(),
                        manifest.path.display()
                    ));
                    Some(manifest.path)
                }
                Err(e) => {
                    self.events.error(format!("ChecksumWriteFailed: {}", e));
                    None
                }
            };

        self.events.info("# Rewinding tape");
        match self.device.rewind() {
            Ok(code) if code.is_ok() => {}
            Ok(code) => self.events.warning(format!("Rewind returned status {}", code)),
            Err(e) => self.events.warning(format!("Rewind failed: {}", e)),
        }

        self.events.info("# Ejecting tape");
        match self.device.eject() {
            Ok(code) if code.is_ok() => {}
            Ok(code) => self.events.warning(format!("Eject returned status {}", code)),
            Err(e) => self.events.warning(format!("Eject failed: {}", e)),
        }

        manifest_path
    }
}
