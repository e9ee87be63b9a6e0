//! Block Size Detection
//!
//! A tape drive returns exactly one physical record per read, and a read with
//! a buffer smaller than the record fails. Starting from an initial
//! candidate, grow the buffer by a fixed step until a read succeeds. Each
//! failed read consumed the record, so the tape is stepped back one record
//! before retrying.
//!
//! Unreadable records at the start of a session tell nothing about the
//! size. When the caller tolerates them (fill blocks), they are passed over
//! and counted, and the probe continues on the next record.

use crate::config::MIN_BLOCK_SIZE;
use crate::error::{Result, TapeImgrError};
use crate::job::Job;
use crate::tape::{ReadError, TapeDevice};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    pub step: usize,
    pub ceiling: usize,
    /// Unreadable leading records to pass over before giving up (0 = none)
    pub max_unreadable: u32,
}

/// What the successful probe read returned
#[derive(Debug, Clone, PartialEq)]
pub enum FirstBlock {
    /// Record data; becomes the first bytes of the session file
    Data(Vec<u8>),
    /// The first record could not be read at all
    Unreadable(ReadError),
    /// Filemark right away: the session holds no records
    EndOfSession,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub block_size: usize,
    pub first_block: FirstBlock,
    pub retries: u32,
    /// Unreadable records passed over before `first_block`
    pub unreadable_records: u32,
}

/// Starting candidate for a job. With fill-blocks active, a buffer larger
/// than the record would be zero padded, so start from the minimum instead
/// of the configured value.
pub fn initial_candidate(job: &Job) -> usize {
    if job.fill_blocks() {
        MIN_BLOCK_SIZE
    } else {
        job.init_block_size()
    }
}

/// Detect the record size of the session under the head.
///
/// Returns `BlockSizeOverflow` once the candidate passes the ceiling (or the
/// initial candidate, if that is larger).
pub fn probe_block_size<D: TapeDevice + ?Sized>(
    device: &mut D,
    initial: usize,
    settings: &ProbeSettings,
) -> Result<ProbeResult> {
    let ceiling = settings.ceiling.max(initial);
    let mut candidate = initial.max(1);
    let mut retries = 0u32;
    let mut unreadable_records = 0u32;

    loop {
        if candidate > ceiling {
            return Err(TapeImgrError::BlockSizeOverflow { ceiling });
        }

        let mut buffer = vec![0u8; candidate];
        match device.read_block(&mut buffer) {
            Ok(n) => {
                buffer.truncate(n);
                debug!(
                    "Block size detected: {} bytes (record {} bytes, {} retries)",
                    candidate, n, retries
                );
                return Ok(ProbeResult {
                    block_size: candidate,
                    first_block: FirstBlock::Data(buffer),
                    retries,
                    unreadable_records,
                });
            }
            Err(ReadError::BufferTooSmall) => {
                let code = device.step_backward(1)?;
                if !code.is_ok() {
                    return Err(TapeImgrError::session_read(format!(
                        "cannot step back after probe read of {} bytes (status {})",
                        candidate, code
                    )));
                }
                debug!("Record larger than {} bytes, retrying", candidate);
                candidate += settings.step;
                retries += 1;
            }
            Err(ReadError::EndOfRecord) => {
                return Ok(ProbeResult {
                    block_size: candidate,
                    first_block: FirstBlock::EndOfSession,
                    retries,
                    unreadable_records,
                });
            }
            Err(err) if unreadable_records < settings.max_unreadable => {
                // The failed read moved past the record; try the next one
                debug!("Unreadable record while probing, continuing: {}", err);
                unreadable_records += 1;
            }
            Err(err) => {
                return Ok(ProbeResult {
                    block_size: candidate,
                    first_block: FirstBlock::Unreadable(err),
                    retries,
                    unreadable_records,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tape::simulated::{SessionLayout, SimulatedTape, TapeLayout, TapeOp};

    const SETTINGS: ProbeSettings = ProbeSettings {
        step: 512,
        ceiling: 1 << 20,
        max_unreadable: 0,
    };

    #[test]
    fn test_grows_to_smallest_step_multiple_covering_record() {
        for (initial, record) in [(512, 10240), (512, 1000), (1024, 1025), (512, 512), (2048, 32768)] {
            let mut tape = SimulatedTape::uniform(1, record, 3);
            let result = probe_block_size(&mut tape, initial, &SETTINGS).unwrap();

            let expected = initial + record.saturating_sub(initial).div_ceil(512) * 512;
            assert_eq!(result.block_size, expected, "initial {} record {}", initial, record);
            assert_eq!(
                result.first_block,
                FirstBlock::Data(tape.record_data(0, 0).unwrap().to_vec())
            );
        }
    }

    #[test]
    fn test_large_initial_candidate_needs_no_retry() {
        let mut tape = SimulatedTape::uniform(1, 4096, 2);
        let journal = tape.journal();
        let result = probe_block_size(&mut tape, 65536, &SETTINGS).unwrap();

        assert_eq!(result.block_size, 65536);
        assert_eq!(result.retries, 0);
        assert!(!journal.ops().iter().any(|op| matches!(op, TapeOp::StepBackward(_))));
    }

    #[test]
    fn test_each_retry_steps_back_one_record() {
        let mut tape = SimulatedTape::uniform(1, 2048, 2);
        let journal = tape.journal();
        let result = probe_block_size(&mut tape, 512, &SETTINGS).unwrap();

        assert_eq!(result.retries, 3);
        let backs = journal
            .ops()
            .iter()
            .filter(|op| **op == TapeOp::StepBackward(1))
            .count();
        assert_eq!(backs, 3);
    }

    #[test]
    fn test_overflow_past_ceiling() {
        let mut tape = SimulatedTape::uniform(1, 8192, 1);
        let settings = ProbeSettings {
            ceiling: 4096,
            ..SETTINGS
        };
        let result = probe_block_size(&mut tape, 512, &settings);
        assert!(matches!(
            result,
            Err(TapeImgrError::BlockSizeOverflow { ceiling: 4096 })
        ));
    }

    #[test]
    fn test_empty_session() {
        let mut tape = SimulatedTape::new(&TapeLayout {
            sessions: vec![SessionLayout::new(512, 0)],
        });
        let result = probe_block_size(&mut tape, 512, &SETTINGS).unwrap();
        assert_eq!(result.first_block, FirstBlock::EndOfSession);
    }

    #[test]
    fn test_unreadable_first_record() {
        let mut tape = SimulatedTape::new(&TapeLayout {
            sessions: vec![SessionLayout::new(1024, 2).with_bad_records(&[0])],
        });
        let result = probe_block_size(&mut tape, 512, &SETTINGS).unwrap();
        assert!(matches!(
            result.first_block,
            FirstBlock::Unreadable(ReadError::Device { .. })
        ));
    }

    #[test]
    fn test_passes_over_unreadable_leading_records() {
        let mut tape = SimulatedTape::new(&TapeLayout {
            sessions: vec![SessionLayout::new(2048, 4).with_bad_records(&[0, 1])],
        });
        let settings = ProbeSettings {
            max_unreadable: 5,
            ..SETTINGS
        };
        let result = probe_block_size(&mut tape, 512, &settings).unwrap();

        assert_eq!(result.block_size, 2048);
        assert_eq!(result.unreadable_records, 2);
        assert_eq!(
            result.first_block,
            FirstBlock::Data(tape.record_data(0, 2).unwrap().to_vec())
        );
    }

    #[test]
    fn test_unreadable_allowance_runs_out() {
        let mut tape = SimulatedTape::new(&TapeLayout {
            sessions: vec![SessionLayout::new(1024, 4).with_bad_records(&[0, 1, 2])],
        });
        let settings = ProbeSettings {
            max_unreadable: 2,
            ..SETTINGS
        };
        let result = probe_block_size(&mut tape, 512, &settings).unwrap();

        assert_eq!(result.unreadable_records, 2);
        assert!(matches!(result.first_block, FirstBlock::Unreadable(_)));
    }
}
