//! tapeimgr Library
//!
//! Images the sessions of a sequential-access tape to disk files, one file
//! per session, detecting the block size of every session and tolerating
//! read errors, and records SHA-512 checksums of everything written.

pub mod checksum;
pub mod cli;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod job;
pub mod logger;
pub mod tape;
pub mod utils;


// Re-export key types for easier use
pub use config::TapeImgrConfig;
pub use engine::{
    CancelToken, ImagerSettings, RunHandle, RunOutcome, SessionRecord, SessionStatus, TapeImager,
    Termination,
};
pub use error::{Result, TapeImgrError};
pub use events::{Event, EventLevel, EventSink};
pub use job::{Job, RawJob, ValidationFailure, ValidationWarning};
pub use tape::{MtTape, SimulatedTape, TapeDevice};
