//! Tape Device Layer
//!
//! The engine only talks to a tape through the `TapeDevice` trait: a handful
//! of positioning operations that return an exit/status code, plus a single
//! record read. `MtTape` drives a real drive, `SimulatedTape` is an in-memory
//! tape used by tests and dry runs.

pub mod mt;
pub mod simulated;

pub use mt::MtTape;
pub use simulated::{SimulatedTape, TapeLayout};

use crate::error::Result;
use std::fmt;
use thiserror::Error;

/// Exit/status code returned by a tape-control operation (0 = success)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub i32);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(0);

    pub fn is_ok(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Drive status report
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    pub code: StatusCode,
    pub report: String,
}

/// Failure kinds of a single record read
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// The record on tape is larger than the read buffer
    #[error("buffer smaller than the physical record")]
    BufferTooSmall,

    /// A filemark was read: the session has ended
    #[error("end of record (filemark)")]
    EndOfRecord,

    #[error("device error {code}: {message}")]
    Device { code: i32, message: String },
}

impl ReadError {
    pub fn device<T: Into<String>>(code: i32, message: T) -> Self {
        Self::Device {
            code,
            message: message.into(),
        }
    }

    /// Status code reported for the read that ended a session
    pub fn status_code(&self) -> StatusCode {
        match self {
            ReadError::EndOfRecord => StatusCode::OK,
            ReadError::BufferTooSmall => StatusCode(ENOMEM),
            ReadError::Device { code, .. } => StatusCode(*code),
        }
    }
}

pub(crate) const EIO: i32 = 5;
pub(crate) const ENOMEM: i32 = 12;
pub(crate) const EBUSY: i32 = 16;

/// Tape-control capability used by the extraction engine.
///
/// Control operations return `Err` only when the operation could not be
/// issued at all; a refused operation (e.g. spacing past end of data) is a
/// non-zero `StatusCode`.
pub trait TapeDevice: Send {
    /// Human readable device name for logs
    fn name(&self) -> &str;

    /// Query drive status. `DeviceIo`/`DeviceBusy` errors mean the drive is unusable.
    fn status(&mut self) -> Result<DeviceStatus>;

    fn rewind(&mut self) -> Result<StatusCode>;

    fn eject(&mut self) -> Result<StatusCode>;

    /// Space forward over `count` filemarks (skip whole sessions)
    fn fast_forward(&mut self, count: u32) -> Result<StatusCode>;

    /// Space forward over `count` records; fails at end of data
    fn step_forward(&mut self, count: u32) -> Result<StatusCode>;

    /// Space backward over `count` records
    fn step_backward(&mut self, count: u32) -> Result<StatusCode>;

    /// Read exactly one physical record into `buf`, returning its length
    fn read_block(&mut self, buf: &mut [u8]) -> std::result::Result<usize, ReadError>;
}

impl<T: TapeDevice + ?Sized> TapeDevice for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn status(&mut self) -> Result<DeviceStatus> {
        (**self).status()
    }

    fn rewind(&mut self) -> Result<StatusCode> {
        (**self).rewind()
    }

    fn eject(&mut self) -> Result<StatusCode> {
        (**self).eject()
    }

    fn fast_forward(&mut self, count: u32) -> Result<StatusCode> {
        (**self).fast_forward(count)
    }

    fn step_forward(&mut self, count: u32) -> Result<StatusCode> {
        (**self).step_forward(count)
    }

    fn step_backward(&mut self, count: u32) -> Result<StatusCode> {
        (**self).step_backward(count)
    }

    fn read_block(&mut self, buf: &mut [u8]) -> std::result::Result<usize, ReadError> {
        (**self).read_block(buf)
    }
}
