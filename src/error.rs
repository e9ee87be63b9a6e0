use crate::job::ValidationErrors;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TapeImgrError>;

#[derive(Error, Debug)]
pub enum TapeImgrError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Input validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Tape device IO error: {0}")]
    DeviceIo(String),

    #[error("Tape device busy: {0}")]
    DeviceBusy(String),

    #[error("Block size overflow: no read succeeded with buffers up to {ceiling} bytes")]
    BlockSizeOverflow { ceiling: usize },

    #[error("Session read error: {0}")]
    SessionRead(String),

    #[error("Failed to write checksum file: {0}")]
    ChecksumWriteFailed(String),

    #[error("Log file error: {0}")]
    LogFile(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl TapeImgrError {
    pub fn precondition<T: Into<String>>(msg: T) -> Self {
        Self::PreconditionFailed(msg.into())
    }

    pub fn device_io<T: Into<String>>(msg: T) -> Self {
        Self::DeviceIo(msg.into())
    }

    pub fn device_busy<T: Into<String>>(msg: T) -> Self {
        Self::DeviceBusy(msg.into())
    }

    pub fn session_read<T: Into<String>>(msg: T) -> Self {
        Self::SessionRead(msg.into())
    }

    pub fn checksum_write<T: Into<String>>(msg: T) -> Self {
        Self::ChecksumWriteFailed(msg.into())
    }

    pub fn log_file<T: Into<String>>(msg: T) -> Self {
        Self::LogFile(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }

    pub fn parse<T: Into<String>>(msg: T) -> Self {
        Self::Parse(msg.into())
    }

    /// Device errors that prevent a run from starting at all
    pub fn is_device_fatal(&self) -> bool {
        matches!(self, Self::DeviceIo(_) | Self::DeviceBusy(_))
    }
}
