//! Real tape drive access through the `mt` utility and the device node
//!
//! Positioning is delegated to `mt -f <device> <op> <count>`; data is read
//! straight from the (non-rewinding) device node, one `read(2)` per physical
//! record. The node is closed before every `mt` call because the st driver
//! only allows a single open handle.

use super::{DeviceStatus, ReadError, StatusCode, TapeDevice, EBUSY, EIO, ENOMEM};
use crate::error::{Result, TapeImgrError};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read};
use std::process::Command;
use tracing::{debug, warn};

pub struct MtTape {
    device_path: String,
    mt_binary: String,
    handle: Option<File>,
}

impl MtTape {
    pub fn new(device_path: &str) -> Self {
        Self {
            device_path: device_path.to_string(),
            mt_binary: "mt".to_string(),
            handle: None,
        }
    }

    /// Use a different `mt` executable (e.g. `mt-st`)
    pub fn with_mt_binary(mut self, binary: &str) -> Self {
        self.mt_binary = binary.to_string();
        self
    }

    fn close(&mut self) {
        if self.handle.take().is_some() {
            debug!("Closed tape device handle: {}", self.device_path);
        }
    }

    fn open(&mut self) -> std::result::Result<&mut File, ReadError> {
        if self.handle.is_none() {
            let file = OpenOptions::new()
                .read(true)
                .open(&self.device_path)
                .map_err(|e| {
                    ReadError::device(
                        e.raw_os_error().unwrap_or(EIO),
                        format!("cannot open {}: {}", self.device_path, e),
                    )
                })?;
            debug!("Opened tape device for reading: {}", self.device_path);
            self.handle = Some(file);
        }

        self.handle
            .as_mut()
            .ok_or_else(|| ReadError::device(EIO, "device handle unavailable"))
    }

    /// Run one `mt` operation and return its exit code and combined output
    fn mt(&mut self, op: &str, count: Option<u32>) -> Result<(StatusCode, String)> {
        self.close();

        let mut command = Command::new(&self.mt_binary);
        command.arg("-f").arg(&self.device_path).arg(op);
        if let Some(count) = count {
            command.arg(count.to_string());
        }

        debug!("Running {} -f {} {} {:?}", self.mt_binary, self.device_path, op, count);

        let output = command.output().map_err(|e| {
            TapeImgrError::device_io(format!("cannot run {}: {}", self.mt_binary, e))
        })?;

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        // A process killed by a signal has no exit code
        let code = StatusCode(output.status.code().unwrap_or(-1));
        if !code.is_ok() {
            debug!("mt {} exited with {}: {}", op, code, text.trim());
        }

        Ok((code, text))
    }
}

impl TapeDevice for MtTape {
    fn name(&self) -> &str {
        &self.device_path
    }

    fn status(&mut self) -> Result<DeviceStatus> {
        let (code, report) = self.mt("status", None)?;

        if !code.is_ok() {
            let lower = report.to_lowercase();
            if lower.contains("busy") {
                return Err(TapeImgrError::device_busy(format!(
                    "{}: {}",
                    self.device_path,
                    report.trim()
                )));
            }
            return Err(TapeImgrError::device_io(format!(
                "{}: mt status exited with {}: {}",
                self.device_path,
                code,
                report.trim()
            )));
        }

        Ok(DeviceStatus { code, report })
    }

    fn rewind(&mut self) -> Result<StatusCode> {
        self.mt("rewind", None).map(|(code, _)| code)
    }

    fn eject(&mut self) -> Result<StatusCode> {
        self.mt("eject", None).map(|(code, _)| code)
    }

    fn fast_forward(&mut self, count: u32) -> Result<StatusCode> {
        self.mt("fsf", Some(count)).map(|(code, _)| code)
    }

    fn step_forward(&mut self, count: u32) -> Result<StatusCode> {
        self.mt("fsr", Some(count)).map(|(code, _)| code)
    }

    fn step_backward(&mut self, count: u32) -> Result<StatusCode> {
        self.mt("bsr", Some(count)).map(|(code, _)| code)
    }

    fn read_block(&mut self, buf: &mut [u8]) -> std::result::Result<usize, ReadError> {
        let file = self.open()?;

        loop {
            return match file.read(buf) {
                Ok(0) => Err(ReadError::EndOfRecord),
                Ok(n) => Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => match e.raw_os_error() {
                    // st driver: record larger than the buffer
                    Some(ENOMEM) => Err(ReadError::BufferTooSmall),
                    Some(EBUSY) => {
                        warn!("Tape device busy during read: {}", e);
                        Err(ReadError::device(EBUSY, e.to_string()))
                    }
                    Some(code) => Err(ReadError::device(code, e.to_string())),
                    None => Err(ReadError::device(EIO, e.to_string())),
                },
            };
        }
    }
}

impl Drop for MtTape {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_mt_binary_is_device_io_error() {
        let mut tape = MtTape::new("/dev/null").with_mt_binary("/nonexistent/tapeimgr-mt");
        let result = tape.status();
        assert!(matches!(result, Err(TapeImgrError::DeviceIo(_))));
        assert!(result.unwrap_err().is_device_fatal());
    }

    #[test]
    fn test_read_missing_device_node() {
        let mut tape = MtTape::new("/nonexistent/nst0");
        let mut buf = vec![0u8; 512];
        assert!(matches!(
            tape.read_block(&mut buf),
            Err(ReadError::Device { .. })
        ));
    }

    #[test]
    fn test_empty_file_reads_as_filemark() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut tape = MtTape::new(&file.path().to_string_lossy());
        let mut buf = vec![0u8; 512];
        assert_eq!(tape.read_block(&mut buf), Err(ReadError::EndOfRecord));
    }
}
