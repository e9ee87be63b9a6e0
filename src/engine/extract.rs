//! Session Extraction
//!
//! Streams the records of one session into its output file, block by block,
//! until the filemark. Two error policies:
//!
//! - default: the first failed read ends the extraction; the bytes read so
//!   far stay in the file.
//! - fill blocks: a failed read is replaced by a zero block and short reads
//!   are padded, so the output keeps the block alignment of the tape
//!   (N blocks always give N * block size bytes).

use super::probe::{FirstBlock, ProbeResult};
use super::CancelToken;
use crate::error::Result;
use crate::events::EventSink;
use crate::tape::{ReadError, StatusCode, TapeDevice};
use crate::utils;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractSettings {
    pub fill_blocks: bool,
    pub max_consecutive_errors: u32,
}

/// How the read loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractEnd {
    /// Filemark read; the tape is positioned at the next session
    EndOfSession,
    /// Stopped on a read error; the tape is somewhere inside the session
    Aborted(ReadError),
    /// Cancel token observed between blocks
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub blocks: u64,
    pub bytes_written: u64,
    pub read_errors: u64,
    pub end: ExtractEnd,
}

impl Extraction {
    /// Device status of the read that ended the loop
    pub fn terminating_status(&self) -> StatusCode {
        match &self.end {
            ExtractEnd::EndOfSession | ExtractEnd::Cancelled => StatusCode::OK,
            ExtractEnd::Aborted(err) => err.status_code(),
        }
    }
}

struct BlockWriter {
    writer: BufWriter<File>,
    block_size: usize,
    fill_blocks: bool,
    blocks: u64,
    bytes_written: u64,
}

impl BlockWriter {
    fn write_block(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(data)?;
        let mut written = data.len();

        if self.fill_blocks && data.len() < self.block_size {
            let padding = vec![0u8; self.block_size - data.len()];
            self.writer.write_all(&padding)?;
            written = self.block_size;
        }

        self.blocks += 1;
        self.bytes_written += written as u64;
        Ok(())
    }

    fn write_zero_block(&mut self) -> std::io::Result<()> {
        self.write_block(&[])
    }
}

/// Stream the session under the head into `path`.
///
/// `probe` carries the detected block size and the already consumed first
/// record. Only output file errors are returned as `Err`; read errors are
/// reported through `Extraction`.
pub fn extract_session<D: TapeDevice + ?Sized>(
    device: &mut D,
    probe: ProbeResult,
    path: &Path,
    settings: &ExtractSettings,
    cancel: &CancelToken,
    events: &EventSink,
) -> Result<Extraction> {
    let block_size = probe.block_size;
    let file = File::create(path)?;
    let mut out = BlockWriter {
        writer: BufWriter::with_capacity(block_size.max(8192) * 16, file),
        block_size,
        fill_blocks: settings.fill_blocks,
        blocks: 0,
        bytes_written: 0,
    };
    let mut read_errors = 0u64;
    let mut consecutive_errors = 0u32;

    // Records the probe passed over come before its first block
    for _ in 0..probe.unreadable_records {
        read_errors += 1;
        consecutive_errors += 1;
        events.warning(format!(
            "Read error in block {}, writing zero block",
            out.blocks + 1
        ));
        out.write_zero_block()?;
    }

    let mut end = match probe.first_block {
        FirstBlock::Data(data) => {
            out.write_block(&data)?;
            None
        }
        FirstBlock::EndOfSession => Some(ExtractEnd::EndOfSession),
        FirstBlock::Unreadable(err) => {
            read_errors += 1;
            consecutive_errors += 1;
            if settings.fill_blocks && consecutive_errors <= settings.max_consecutive_errors {
                events.warning(format!(
                    "Read error in block {}, writing zero block: {}",
                    out.blocks + 1,
                    err
                ));
                out.write_zero_block()?;
                None
            } else {
                Some(ExtractEnd::Aborted(err))
            }
        }
    };

    let mut buffer = vec![0u8; block_size];
    while end.is_none() {
        if cancel.is_cancelled() {
            end = Some(ExtractEnd::Cancelled);
            break;
        }

        match device.read_block(&mut buffer) {
            Ok(n) => {
                consecutive_errors = 0;
                out.write_block(&buffer[..n])?;
            }
            Err(ReadError::EndOfRecord) => end = Some(ExtractEnd::EndOfSession),
            Err(err) => {
                read_errors += 1;
                consecutive_errors += 1;

                if !settings.fill_blocks {
                    end = Some(ExtractEnd::Aborted(err));
                } else if consecutive_errors > settings.max_consecutive_errors {
                    events.error(format!(
                        "Giving up after {} consecutive read errors",
                        consecutive_errors
                    ));
                    end = Some(ExtractEnd::Aborted(err));
                } else {
                    events.warning(format!(
                        "Read error in block {}, writing zero block: {}",
                        out.blocks + 1,
                        err
                    ));
                    out.write_zero_block()?;
                }
            }
        }
    }

    out.writer.flush()?;

    let extraction = Extraction {
        blocks: out.blocks,
        bytes_written: out.bytes_written,
        read_errors,
        end: end.unwrap_or(ExtractEnd::EndOfSession),
    };

    events.info(format!(
        "Block size = {}, output file = {}, bytes written = {} ({}), read errors = {}",
        block_size,
        path.display(),
        extraction.bytes_written,
        utils::format_bytes(extraction.bytes_written),
        extraction.read_errors
    ));
    events.info(format!(
        "# read exit code = {}",
        extraction.terminating_status()
    ));

    Ok(extraction)
}
