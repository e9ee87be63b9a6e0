//! Background execution
//!
//! Runs a `TapeImager` on a tokio blocking task so the caller stays
//! responsive. The caller drains events from the channel whenever it likes,
//! can request cancellation at any time, and receives the `RunOutcome` once
//! through `RunHandle::join`.

use super::{CancelToken, ImagerSettings, RunOutcome, TapeImager};
use crate::error::{Result, TapeImgrError};
use crate::events::{self, Event, EventSink};
use crate::job::Job;
use crate::tape::TapeDevice;
use crossbeam::channel::Receiver;
use tokio::task::JoinHandle;
use tracing::info;

pub struct RunHandle {
    events: Receiver<Event>,
    cancel: CancelToken,
    task: JoinHandle<Result<RunOutcome>>,
}

/// Open the job log in the output directory and start the engine.
///
/// Must be called from within a tokio runtime.
pub fn spawn<D: TapeDevice + 'static>(
    job: Job,
    settings: ImagerSettings,
    device: D,
) -> Result<RunHandle> {
    let log_path = job.dir_out().join(&settings.log_file_name);
    let (sink, receiver) = EventSink::with_log_file(&log_path)?;
    Ok(spawn_with_sink(job, settings, device, sink, receiver))
}

/// Start the engine with an already constructed event sink
pub fn spawn_with_sink<D: TapeDevice + 'static>(
    job: Job,
    settings: ImagerSettings,
    device: D,
    sink: EventSink,
    receiver: Receiver<Event>,
) -> RunHandle {
    let cancel = CancelToken::new();
    let mut imager = TapeImager::new(job, settings, device, sink).with_cancel_token(cancel.clone());

    info!("Starting tape extraction on background task");
    let task = tokio::task::spawn_blocking(move || imager.run());

    RunHandle {
        events: receiver,
        cancel,
        task,
    }
}

impl RunHandle {
    /// Events emitted since the last poll, in order; never blocks
    pub fn poll_events(&self) -> Vec<Event> {
        events::drain(&self.events)
    }

    /// Another handle on the same event queue, usable after `join`.
    ///
    /// Receivers compete: every event is delivered to exactly one of them
    /// (this one or `poll_events`), never copied to both.
    pub fn subscribe(&self) -> Receiver<Event> {
        self.events.clone()
    }

    /// Ask the engine to stop at the next block or session boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run to end. Undelivered events stay available via `subscribe`d receivers.
    pub async fn join(self) -> Result<RunOutcome> {
        self.task.await.map_err(|e| {
            TapeImgrError::Generic(anyhow::anyhow!("extraction task failed: {}", e))
        })?
    }
}
