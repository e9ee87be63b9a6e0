//! Engine Event Stream
//!
//! Every message the engine produces goes to three places: the caller's
//! unbounded event channel, the append-only job log file in the output
//! directory, and `tracing`. Timestamps are forced to be monotonic so a
//! caller can rely on the channel order and the time order agreeing.

use crate::error::{Result, TapeImgrError};
use chrono::{DateTime, Local};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventLevel::Debug => "DEBUG",
            EventLevel::Info => "INFO",
            EventLevel::Warning => "WARNING",
            EventLevel::Error => "ERROR",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Local>,
    pub level: EventLevel,
    pub message: String,
}

impl Event {
    /// `2024-01-01 12:00:00,000 - INFO - message`
    pub fn log_line(&self) -> String {
        format!(
            "{} - {} - {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S,%3f"),
            self.level,
            self.message
        )
    }
}

struct SinkState {
    last_timestamp: Option<DateTime<Local>>,
    log_file: Option<BufWriter<File>>,
}

/// Cloneable producer side of the event stream
#[derive(Clone)]
pub struct EventSink {
    sender: Sender<Event>,
    state: Arc<Mutex<SinkState>>,
}

impl EventSink {
    /// Channel-only sink and its receiving end
    pub fn channel() -> (Self, Receiver<Event>) {
        let (sender, receiver) = channel::unbounded();
        let sink = Self {
            sender,
            state: Arc::new(Mutex::new(SinkState {
                last_timestamp: None,
                log_file: None,
            })),
        };
        (sink, receiver)
    }

    /// Channel sink that also appends to `log_path`
    pub fn with_log_file(log_path: &Path) -> Result<(Self, Receiver<Event>)> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .map_err(|e| {
                TapeImgrError::log_file(format!(
                    "error trying to write log file to {:?}: {}",
                    log_path, e
                ))
            })?;

        let (sink, receiver) = Self::channel();
        sink.state.lock().log_file = Some(BufWriter::new(file));
        debug!("Event log file opened: {}", log_path.display());
        Ok((sink, receiver))
    }

    pub fn emit(&self, level: EventLevel, message: impl Into<String>) {
        let message = message.into();

        match level {
            EventLevel::Debug => debug!("{}", message),
            EventLevel::Info => info!("{}", message),
            EventLevel::Warning => warn!("{}", message),
            EventLevel::Error => error!("{}", message),
        }

        // Timestamping, file append and send happen under one lock so the
        // channel order matches timestamp order across clones.
        let mut state = self.state.lock();

        let now = Local::now();
        let timestamp = match state.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        state.last_timestamp = Some(timestamp);

        let event = Event {
            timestamp,
            level,
            message,
        };

        if let Some(writer) = state.log_file.as_mut() {
            let written = writeln!(writer, "{}", event.log_line()).and_then(|_| writer.flush());
            if let Err(e) = written {
                warn!("Failed to append to job log file: {}", e);
            }
        }

        // The receiver may have been dropped by a caller that lost interest
        let _ = self.sender.send(event);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.emit(EventLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(EventLevel::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.emit(EventLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(EventLevel::Error, message);
    }
}

/// Drain every event currently queued without blocking
pub fn drain(receiver: &Receiver<Event>) -> Vec<Event> {
    receiver.try_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_arrive_in_order_with_monotonic_timestamps() {
        let (sink, receiver) = EventSink::channel();
        let other = sink.clone();

        for i in 0..50 {
            if i % 2 == 0 {
                sink.info(format!("event {}", i));
            } else {
                other.warning(format!("event {}", i));
            }
        }

        let events = drain(&receiver);
        assert_eq!(events.len(), 50);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.message, format!("event {}", i));
        }
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_log_file_is_appended() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("tapeimgr.log");
        std::fs::write(&log_path, "existing line\n").unwrap();

        let (sink, _receiver) = EventSink::with_log_file(&log_path).unwrap();
        sink.info("first");
        sink.error("second");

        let content = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "existing line");
        assert!(lines[1].ends_with(" - INFO - first"));
        assert!(lines[2].ends_with(" - ERROR - second"));
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (sink, receiver) = EventSink::channel();
        drop(receiver);
        sink.info("nobody listening");
    }

    #[test]
    fn test_unwritable_log_path() {
        let dir = tempfile::tempdir().unwrap();
        let result = EventSink::with_log_file(&dir.path().join("missing").join("x.log"));
        assert!(matches!(result, Err(TapeImgrError::LogFile(_))));
    }
}
