//! Acquisition pipeline
//!
//! Runs one `ContainerSession` on a dedicated writer thread fed through a
//! bounded channel, so a live acquisition loop can hand off batches without
//! serializing session calls itself.
//!
//! ```text
//! acquisition ──submit_events──▶ [bounded channel] ──▶ writer thread ──▶ session
//!             ──submit_metadata─▶                          │
//!             ──finish──────────────────────────────────────┴─▶ finalize ─▶ PipelineReport
//! ```
//!
//! Recoverable rejections are logged and counted; the worker keeps going.
//! A fatal error discards the session and stops the worker; the error is
//! returned from `finish`.

use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};

use crate::error::{Result, RtdcError};
use crate::storage::StorageBackend;
use crate::value::Value;

use super::batch::EventBatch;
use super::session::{ContainerSession, ContainerSummary, SessionState};

enum Message {
    Events(EventBatch),
    Metadata {
        section: String,
        key: String,
        value: Value,
    },
}

/// Outcome of a pipeline run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub summary: ContainerSummary,
    pub batches_written: u64,
    pub rejected_batches: u64,
    pub rejected_metadata: u64,
}

/// Writer thread owning one session
pub struct AcquisitionPipeline {
    sender: Option<Sender<Message>>,
    worker: Option<JoinHandle<Result<PipelineReport>>>,
}

impl AcquisitionPipeline {
    /// Move `session` onto a new writer thread
    ///
    /// Queue depth comes from the session's `pipeline_capacity`.
    pub fn start<B>(session: ContainerSession<B>) -> Result<Self>
    where
        B: StorageBackend + 'static,
        B::Handle: Send + 'static,
    {
        let (sender, receiver) = channel::bounded(session.config().pipeline_capacity.max(1));

        let worker = thread::Builder::new()
            .name("rtdc-writer".to_string())
            .spawn(move || run_worker(session, receiver))?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    /// Queue a batch; blocks while the queue is full
    pub fn submit_events(&self, batch: EventBatch) -> Result<()> {
        self.send(Message::Events(batch))
    }

    /// Queue a metadata value; blocks while the queue is full
    pub fn submit_metadata(&self, section: &str, key: &str, value: impl Into<Value>) -> Result<()> {
        self.send(Message::Metadata {
            section: section.to_string(),
            key: key.to_string(),
            value: value.into(),
        })
    }

    /// Drain the queue, finalize the session and return the report
    pub fn finish(mut self) -> Result<PipelineReport> {
        self.join()
    }

    fn send(&self, message: Message) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| RtdcError::PipelineClosed("pipeline already finished".to_string()))?;
        sender
            .send(message)
            .map_err(|_| RtdcError::PipelineClosed("writer thread stopped".to_string()))
    }

    fn join(&mut self) -> Result<PipelineReport> {
        // Closing the channel ends the worker's receive loop
        self.sender.take();
        let worker = self
            .worker
            .take()
            .ok_or_else(|| RtdcError::PipelineClosed("pipeline already finished".to_string()))?;
        worker
            .join()
            .map_err(|_| RtdcError::PipelineClosed("writer thread panicked".to_string()))?
    }
}

impl Drop for AcquisitionPipeline {
    fn drop(&mut self) {
        if self.worker.is_some() {
            tracing::warn!("Acquisition pipeline dropped without finish; finalizing");
            if let Err(e) = self.join() {
                tracing::warn!("Pipeline finalize on drop failed: {}", e);
            }
        }
    }
}

fn run_worker<B: StorageBackend>(
    mut session: ContainerSession<B>,
    receiver: Receiver<Message>,
) -> Result<PipelineReport> {
    let mut rejected_batches = 0;
    let mut rejected_metadata = 0;

    for message in receiver.iter() {
        let result = match message {
            Message::Events(batch) => session.write_events(&batch).map_err(|e| (e, true)),
            Message::Metadata { section, key, value } => session
                .write_metadata(&section, &key, value)
                .map_err(|e| (e, false)),
        };

        match result {
            Ok(()) => {}
            Err((e, is_batch)) if e.is_recoverable() && session.state() != SessionState::Failed => {
                if is_batch {
                    tracing::warn!("Pipeline rejected batch: {}", e);
                    rejected_batches += 1;
                } else {
                    tracing::warn!("Pipeline rejected metadata: {}", e);
                    rejected_metadata += 1;
                }
            }
            Err((e, _)) => {
                tracing::error!("Pipeline stopping on fatal error: {}", e);
                if let Err(close) = session.close_discard() {
                    tracing::warn!("Discarding session failed: {}", close);
                }
                return Err(e);
            }
        }
    }

    let batches_written = session.batches_written();
    match session.finalize() {
        Ok(summary) => Ok(PipelineReport {
            summary,
            batches_written,
            rejected_batches,
            rejected_metadata,
        }),
        Err(e) => {
            if let Err(close) = session.close_discard() {
                tracing::warn!("Discarding session failed: {}", close);
            }
            Err(e)
        }
    }
}
