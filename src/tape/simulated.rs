//! In-memory tape
//!
//! Models a tape as a sequence of sessions, each a sequence of physical
//! records terminated by a filemark, with the positioning rules of a real
//! st-driven drive: reads consume one record (even when they fail), a read
//! at a filemark consumes the filemark, record spacing stops at filemarks and
//! at end of data.

use super::{DeviceStatus, ReadError, StatusCode, TapeDevice, EBUSY, EIO};
use crate::error::{Result, TapeImgrError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Serializable description of a simulated tape (used by `--simulate`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TapeLayout {
    pub sessions: Vec<SessionLayout>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLayout {
    /// Physical record size the session was written with
    pub record_size: usize,
    /// Number of records in the session
    pub records: usize,
    /// Size of the final record, if shorter than `record_size`
    #[serde(default)]
    pub last_record_size: Option<usize>,
    /// 0-based indices of unreadable records
    #[serde(default)]
    pub bad_records: Vec<usize>,
}

impl SessionLayout {
    pub fn new(record_size: usize, records: usize) -> Self {
        Self {
            record_size,
            records,
            last_record_size: None,
            bad_records: Vec::new(),
        }
    }

    pub fn with_bad_records(mut self, bad: &[usize]) -> Self {
        self.bad_records = bad.to_vec();
        self
    }

    pub fn with_last_record_size(mut self, size: usize) -> Self {
        self.last_record_size = Some(size);
        self
    }
}

impl TapeLayout {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            TapeImgrError::parse(format!("Invalid tape layout {:?}: {}", path, e))
        })
    }
}

/// Tape operation recorded by the simulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapeOp {
    Status,
    Rewind,
    Eject,
    FastForward(u32),
    StepForward(u32),
    StepBackward(u32),
    Read { session: usize, record: usize },
}

/// Shared record of operations, readable after the tape moved into an engine
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<TapeOp>>>);

impl Journal {
    fn push(&self, op: TapeOp) {
        self.0.lock().push(op);
    }

    pub fn ops(&self) -> Vec<TapeOp> {
        self.0.lock().clone()
    }

    pub fn fast_forwards(&self) -> usize {
        self.0
            .lock()
            .iter()
            .filter(|op| matches!(op, TapeOp::FastForward(_)))
            .count()
    }

    pub fn ejected(&self) -> bool {
        self.0.lock().iter().any(|op| *op == TapeOp::Eject)
    }
}

#[derive(Debug, Clone)]
struct Record {
    data: Vec<u8>,
    bad: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Availability {
    Ready,
    Busy,
    Unreachable,
}

/// Failure injected into a control operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Operation runs but reports a non-zero status, position unchanged
    Refused,
    /// Operation cannot be issued at all
    Unreachable,
}

type ReadHook = Box<dyn FnMut(usize) + Send>;
type ControlHook = Box<dyn FnMut(&TapeOp) -> Option<Fault> + Send>;

pub struct SimulatedTape {
    name: String,
    sessions: Vec<Vec<Record>>,
    session: usize,
    record: usize,
    availability: Availability,
    reads: usize,
    journal: Journal,
    read_hook: Option<ReadHook>,
    control_hook: Option<ControlHook>,
}

impl SimulatedTape {
    pub fn new(layout: &TapeLayout) -> Self {
        let sessions = layout
            .sessions
            .iter()
            .enumerate()
            .map(|(s, session)| {
                (0..session.records)
                    .map(|r| {
                        let len = match session.last_record_size {
                            Some(last) if r + 1 == session.records => last,
                            _ => session.record_size,
                        };
                        Record {
                            data: record_pattern(s, r, len),
                            bad: session.bad_records.contains(&r),
                        }
                    })
                    .collect()
            })
            .collect();

        Self {
            name: "simulated".to_string(),
            sessions,
            session: 0,
            record: 0,
            availability: Availability::Ready,
            reads: 0,
            journal: Journal::default(),
            read_hook: None,
            control_hook: None,
        }
    }

    /// Tape with `count` sessions of `records` records of `record_size` bytes each
    pub fn uniform(count: usize, record_size: usize, records: usize) -> Self {
        Self::new(&TapeLayout {
            sessions: (0..count)
                .map(|_| SessionLayout::new(record_size, records))
                .collect(),
        })
    }

    /// Drive held by another process
    pub fn busy(mut self) -> Self {
        self.availability = Availability::Busy;
        self
    }

    /// Drive that cannot be reached at all
    pub fn unreachable(mut self) -> Self {
        self.availability = Availability::Unreachable;
        self
    }

    /// Callback invoked with the running read count after every read
    pub fn with_read_hook<F: FnMut(usize) + Send + 'static>(mut self, hook: F) -> Self {
        self.read_hook = Some(Box::new(hook));
        self
    }

    /// Callback consulted before every rewind, eject and spacing operation
    pub fn with_control_hook<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&TapeOp) -> Option<Fault> + Send + 'static,
    {
        self.control_hook = Some(Box::new(hook));
        self
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    /// Bytes of one record as written on the simulated tape
    pub fn record_data(&self, session: usize, record: usize) -> Option<&[u8]> {
        self.sessions
            .get(session)
            .and_then(|s| s.get(record))
            .map(|r| r.data.as_slice())
    }

    fn at_end_of_data(&self) -> bool {
        self.session >= self.sessions.len()
    }

    fn refused() -> StatusCode {
        StatusCode(EIO)
    }

    /// Journal a control operation; `Some` short-circuits it with an injected fault
    fn control(&mut self, op: TapeOp) -> Result<Option<StatusCode>> {
        self.journal.push(op.clone());
        let fault = self.control_hook.as_mut().and_then(|hook| hook(&op));
        match fault {
            Some(Fault::Refused) => Ok(Some(Self::refused())),
            Some(Fault::Unreachable) => Err(TapeImgrError::device_io(format!(
                "{}: {:?} could not be issued",
                self.name, op
            ))),
            None => Ok(None),
        }
    }
}

/// Deterministic, position dependent content
fn record_pattern(session: usize, record: usize, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (session.wrapping_mul(31) ^ record.wrapping_mul(7) ^ i) as u8)
        .collect()
}

impl TapeDevice for SimulatedTape {
    fn name(&self) -> &str {
        &self.name
    }

    fn status(&mut self) -> Result<DeviceStatus> {
        self.journal.push(TapeOp::Status);
        match self.availability {
            Availability::Busy => Err(TapeImgrError::device_busy(format!(
                "{}: device or resource busy (errno {})",
                self.name, EBUSY
            ))),
            Availability::Unreachable => Err(TapeImgrError::device_io(format!(
                "{}: no such device",
                self.name
            ))),
            Availability::Ready => Ok(DeviceStatus {
                code: StatusCode::OK,
                report: format!(
                    "SIMULATED tape drive: {} sessions, file number={}, block number={}",
                    self.sessions.len(),
                    self.session,
                    self.record
                ),
            }),
        }
    }

    fn rewind(&mut self) -> Result<StatusCode> {
        if let Some(code) = self.control(TapeOp::Rewind)? {
            return Ok(code);
        }
        self.session = 0;
        self.record = 0;
        Ok(StatusCode::OK)
    }

    fn eject(&mut self) -> Result<StatusCode> {
        if let Some(code) = self.control(TapeOp::Eject)? {
            return Ok(code);
        }
        self.session = 0;
        self.record = 0;
        Ok(StatusCode::OK)
    }

    fn fast_forward(&mut self, count: u32) -> Result<StatusCode> {
        if let Some(code) = self.control(TapeOp::FastForward(count))? {
            return Ok(code);
        }
        for _ in 0..count {
            if self.at_end_of_data() {
                return Ok(Self::refused());
            }
            self.session += 1;
            self.record = 0;
        }
        Ok(StatusCode::OK)
    }

    fn step_forward(&mut self, count: u32) -> Result<StatusCode> {
        if let Some(code) = self.control(TapeOp::StepForward(count))? {
            return Ok(code);
        }
        for _ in 0..count {
            if self.at_end_of_data() || self.record >= self.sessions[self.session].len() {
                return Ok(Self::refused());
            }
            self.record += 1;
        }
        Ok(StatusCode::OK)
    }

    fn step_backward(&mut self, count: u32) -> Result<StatusCode> {
        if let Some(code) = self.control(TapeOp::StepBackward(count))? {
            return Ok(code);
        }
        for _ in 0..count {
            if self.record == 0 {
                return Ok(Self::refused());
            }
            self.record -= 1;
        }
        Ok(StatusCode::OK)
    }

    fn read_block(&mut self, buf: &mut [u8]) -> std::result::Result<usize, ReadError> {
        self.journal.push(TapeOp::Read {
            session: self.session,
            record: self.record,
        });
        self.reads += 1;
        let reads = self.reads;
        if let Some(hook) = self.read_hook.as_mut() {
            hook(reads);
        }

        if self.at_end_of_data() {
            return Err(ReadError::device(EIO, "blank check: end of data"));
        }

        let records = &self.sessions[self.session];
        if self.record >= records.len() {
            debug!("Simulated filemark after session {}", self.session + 1);
            self.session += 1;
            self.record = 0;
            return Err(ReadError::EndOfRecord);
        }

        let record = &records[self.record];
        self.record += 1;

        if record.bad {
            return Err(ReadError::device(EIO, "medium error: unrecovered read error"));
        }
        if record.data.len() > buf.len() {
            return Err(ReadError::BufferTooSmall);
        }

        buf[..record.data.len()].copy_from_slice(&record.data);
        Ok(record.data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_consumes_records_then_filemark() {
        let mut tape = SimulatedTape::uniform(2, 1024, 2);
        let mut buf = vec![0u8; 1024];

        assert_eq!(tape.read_block(&mut buf), Ok(1024));
        assert_eq!(tape.read_block(&mut buf), Ok(1024));
        assert_eq!(tape.read_block(&mut buf), Err(ReadError::EndOfRecord));
        // Now at the start of session 2
        assert_eq!(tape.step_forward(1).unwrap(), StatusCode::OK);
        assert_eq!(tape.step_backward(1).unwrap(), StatusCode::OK);
        assert_eq!(&buf[..], tape.record_data(0, 1).unwrap());
    }

    #[test]
    fn test_short_buffer_still_advances() {
        let mut tape = SimulatedTape::uniform(1, 2048, 2);
        let mut small = vec![0u8; 512];

        assert_eq!(tape.read_block(&mut small), Err(ReadError::BufferTooSmall));
        assert_eq!(tape.step_backward(1).unwrap(), StatusCode::OK);

        let mut big = vec![0u8; 2048];
        assert_eq!(tape.read_block(&mut big), Ok(2048));
        assert_eq!(&big[..], tape.record_data(0, 0).unwrap());
    }

    #[test]
    fn test_step_forward_fails_at_end_of_data() {
        let mut tape = SimulatedTape::uniform(1, 512, 1);
        assert!(tape.fast_forward(1).unwrap().is_ok());
        assert!(!tape.step_forward(1).unwrap().is_ok());
        assert!(!tape.fast_forward(1).unwrap().is_ok());
    }

    #[test]
    fn test_unavailable_drives() {
        let mut busy = SimulatedTape::uniform(1, 512, 1).busy();
        assert!(matches!(busy.status(), Err(TapeImgrError::DeviceBusy(_))));

        let mut gone = SimulatedTape::uniform(1, 512, 1).unreachable();
        assert!(matches!(gone.status(), Err(TapeImgrError::DeviceIo(_))));
    }

    #[test]
    fn test_layout_from_json() {
        let layout: TapeLayout = serde_json::from_str(
            r#"{"sessions": [{"record_size": 10240, "records": 3, "bad_records": [1]}]}"#,
        )
        .unwrap();
        assert_eq!(layout.sessions[0].record_size, 10240);
        assert_eq!(layout.sessions[0].bad_records, vec![1]);
        assert_eq!(layout.sessions[0].last_record_size, None);
    }

    #[test]
    fn test_control_hook_faults() {
        let mut tape = SimulatedTape::uniform(2, 512, 2).with_control_hook(|op| match op {
            TapeOp::StepBackward(_) => Some(Fault::Refused),
            TapeOp::FastForward(_) => Some(Fault::Unreachable),
            _ => None,
        });
        let journal = tape.journal();

        assert!(tape.step_forward(1).unwrap().is_ok());
        assert!(!tape.step_backward(1).unwrap().is_ok());
        assert!(matches!(tape.fast_forward(1), Err(TapeImgrError::DeviceIo(_))));

        // The refused step back left the head after record 0
        let mut buf = vec![0u8; 512];
        tape.read_block(&mut buf).unwrap();
        assert_eq!(&buf[..], tape.record_data(0, 1).unwrap());
        assert_eq!(journal.fast_forwards(), 1);
    }
}
