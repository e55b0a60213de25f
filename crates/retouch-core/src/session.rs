//! Editing session: one loaded image, its history, and the worker that
//! computes new steps.
//!
//! Operations reach the session as [`Descriptor`]s. The session picks the
//! [`Handler`] of the descriptor's family, validates, and then either
//! runs the operation inline ([`Session::apply`]) or hands it to the
//! background [`Worker`] ([`Session::submit`]). Worker results are
//! collected with [`Session::poll`] or [`Session::wait`] and recorded in
//! the history at that point.
//!
//! Only one job is in flight at a time. While it runs, anything that
//! would move the cursor or replace the image fails with
//! [`SessionError::Busy`]; a second `submit` is rejected or queued
//! according to [`BusyPolicy`].

use std::collections::VecDeque;
use std::time::Duration;

use retouch_ops::{CancelToken, Descriptor, Handler, Image, OpError, Operation};
use tracing::{debug, info, instrument, warn};
use web_time::Instant;

use crate::codec::{CodecError, ExportFormat, ImageCodec};
use crate::config::{BusyPolicy, SessionConfig};
use crate::history::{Direction, History, HistoryError};
use crate::worker::{Job, Worker, WorkerReply};

/// Errors from session operations. None of them invalidate the session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A worker job is in flight.
    #[error("an operation is still running")]
    Busy,

    /// Nothing to undo or redo.
    #[error("nothing to {0}")]
    NoHistory(Direction),

    /// Validation or the kernel failed; the history is unchanged.
    #[error(transparent)]
    Operation(#[from] OpError),

    /// Decoding or encoding failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Threshold re-tuning needs the current step to be an edge detection.
    #[error("the current step is not an edge detection")]
    NotEdgeDetection,

    /// The worker thread exited unexpectedly.
    #[error("the worker thread is gone")]
    WorkerGone,

    /// The worker thread could not be started.
    #[error("failed to start worker thread: {0}")]
    Spawn(std::io::Error),
}

impl From<HistoryError> for SessionError {
    fn from(error: HistoryError) -> Self {
        match error {
            HistoryError::NoHistory(direction) => Self::NoHistory(direction),
            HistoryError::Operation(error) => Self::Operation(error),
        }
    }
}

/// What [`Session::submit`] did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Sent to the worker as the job with this generation.
    Started(u64),
    /// Waiting behind the running job, at this queue length.
    Queued(usize),
}

/// A worker job whose result was recorded in the history.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Generation of the finished job.
    pub generation: u64,
    /// Descriptor it ran.
    pub descriptor: Descriptor,
    /// The new current image.
    pub image: Image,
    /// Time spent in the kernel.
    pub duration: Duration,
}

#[derive(Debug)]
struct InFlight {
    generation: u64,
    descriptor: Descriptor,
    cancel: CancelToken,
}

#[derive(Debug)]
struct Queued {
    descriptor: Descriptor,
    operation: Operation,
}

/// One loaded image and its editing history. See the [module docs](self).
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    original: Image,
    history: History,
    active: Option<Handler>,
    worker: Option<Worker>,
    in_flight: Option<InFlight>,
    queue: VecDeque<Queued>,
    next_generation: u64,
}

impl Session {
    /// Start a session on `image`.
    #[must_use]
    pub fn open(image: Image, config: SessionConfig) -> Self {
        info!(
            width = image.width(),
            height = image.height(),
            channels = image.channels(),
            "session opened"
        );
        Self {
            history: History::new(image.clone(), config.history),
            original: image,
            config,
            active: None,
            worker: None,
            in_flight: None,
            queue: VecDeque::new(),
            next_generation: 1,
        }
    }

    /// Decode `bytes` and start a session on the result.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Codec`] if decoding fails.
    pub fn open_bytes(
        bytes: &[u8],
        codec: &impl ImageCodec,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        Ok(Self::open(codec.decode(bytes)?, config))
    }

    /// Replace the loaded image and discard all history.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Busy`] while a job is in flight.
    pub fn load(&mut self, image: Image) -> Result<&Image, SessionError> {
        self.ensure_idle()?;
        info!(width = image.width(), height = image.height(), "image loaded");
        self.original = image.clone();
        self.history.reset(image);
        self.active = None;
        Ok(self.history.current())
    }

    /// Decode `bytes` and [`load`](Self::load) the result.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Busy`] while a job is in flight and
    /// [`SessionError::Codec`] if decoding fails. A failed decode leaves
    /// the session unchanged.
    pub fn load_bytes(
        &mut self,
        bytes: &[u8],
        codec: &impl ImageCodec,
    ) -> Result<&Image, SessionError> {
        self.ensure_idle()?;
        let image = codec.decode(bytes)?;
        self.load(image)
    }

    /// Run `descriptor` on the current image on this thread and record
    /// the result.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Busy`] while a job is in flight and
    /// [`SessionError::Operation`] if validation or the kernel fails.
    #[instrument(skip_all, fields(op = %descriptor))]
    pub fn apply(&mut self, descriptor: &Descriptor) -> Result<Image, SessionError> {
        self.ensure_idle()?;
        let handler = self.handler_for(descriptor);
        let image = self
            .history
            .apply(&handler, descriptor, &CancelToken::new())?;
        self.active = Some(handler);
        Ok(image)
    }

    /// Validate `descriptor` and run it on the worker.
    ///
    /// Validation happens here, so parameter errors are reported
    /// immediately rather than through [`poll`](Self::poll).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Operation`] for invalid descriptors,
    /// [`SessionError::Busy`] if a job is running under
    /// [`BusyPolicy::Reject`], and [`SessionError::WorkerGone`] or
    /// [`SessionError::Spawn`] if the worker is unavailable.
    #[instrument(skip_all, fields(op = %descriptor))]
    pub fn submit(&mut self, descriptor: &Descriptor) -> Result<Submission, SessionError> {
        let handler = self.handler_for(descriptor);
        let operation = handler.validate(descriptor)?;

        if self.in_flight.is_some() {
            return match self.config.busy {
                BusyPolicy::Reject => Err(SessionError::Busy),
                BusyPolicy::Queue => {
                    self.queue.push_back(Queued {
                        descriptor: descriptor.clone(),
                        operation,
                    });
                    self.active = Some(handler);
                    debug!(queued = self.queue.len(), "job queued");
                    Ok(Submission::Queued(self.queue.len()))
                }
            };
        }

        let generation = self.start(descriptor.clone(), operation)?;
        self.active = Some(handler);
        Ok(Submission::Started(generation))
    }

    /// Collect a finished job without blocking.
    ///
    /// Returns `Ok(None)` when nothing has finished. On success the
    /// result is recorded and the next queued job, if any, is started.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Operation`] if the job failed (including
    /// [`OpError::Cancelled`]); the queue is cleared and the history is
    /// unchanged.
    pub fn poll(&mut self) -> Result<Option<Completion>, SessionError> {
        while self.in_flight.is_some() {
            let Some(worker) = &self.worker else {
                return Err(self.worker_lost());
            };
            let reply = match worker.try_recv() {
                Ok(Some(reply)) => reply,
                Ok(None) => return Ok(None),
                Err(error) => {
                    self.worker_lost();
                    return Err(error);
                }
            };
            if let Some(completion) = self.handle_reply(reply)? {
                return Ok(Some(completion));
            }
        }
        Ok(None)
    }

    /// Block until the running job and every queued job have finished.
    /// Returns the current image.
    ///
    /// # Errors
    ///
    /// Same as [`poll`](Self::poll); stops at the first failed job.
    pub fn wait(&mut self) -> Result<&Image, SessionError> {
        while self.in_flight.is_some() {
            let Some(worker) = &self.worker else {
                return Err(self.worker_lost());
            };
            let reply = match worker.recv() {
                Ok(reply) => reply,
                Err(error) => {
                    self.worker_lost();
                    return Err(error);
                }
            };
            self.handle_reply(reply)?;
        }
        Ok(self.history.current())
    }

    /// Ask the running job to stop and drop the queue. The job's reply
    /// is discarded whenever it arrives. Returns whether a job was
    /// running.
    pub fn cancel(&mut self) -> bool {
        self.queue.clear();
        match self.in_flight.take() {
            Some(job) => {
                job.cancel.cancel();
                info!(generation = job.generation, op = %job.descriptor, "job cancelled");
                true
            }
            None => false,
        }
    }

    /// Whether a worker job is in flight.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Requests waiting behind the running job.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Step back one history entry.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Busy`] while a job is in flight and
    /// [`SessionError::NoHistory`] at the first state.
    pub fn undo(&mut self) -> Result<Image, SessionError> {
        self.ensure_idle()?;
        Ok(self.history.undo()?)
    }

    /// Step forward one history entry.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Busy`] while a job is in flight and
    /// [`SessionError::NoHistory`] at the newest state.
    pub fn redo(&mut self) -> Result<Image, SessionError> {
        self.ensure_idle()?;
        Ok(self.history.redo()?)
    }

    /// Discard all edits and return to the image as loaded.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Busy`] while a job is in flight.
    pub fn revert(&mut self) -> Result<&Image, SessionError> {
        self.ensure_idle()?;
        info!(discarded = self.history.len(), "reverted to original");
        self.history.reset(self.original.clone());
        Ok(self.history.current())
    }

    /// Re-run the current edge-detection step with a new threshold,
    /// replacing that step instead of adding one.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Busy`] while a job is in flight,
    /// [`SessionError::NotEdgeDetection`] if the current step is not an
    /// edge detection (or there is none), and [`SessionError::Operation`]
    /// if `threshold` is out of range.
    #[instrument(skip(self))]
    pub fn retune_threshold(&mut self, threshold: f64) -> Result<Image, SessionError> {
        self.ensure_idle()?;
        let (Some(entry), Some(input)) =
            (self.history.current_entry(), self.history.previous_image())
        else {
            return Err(SessionError::NotEdgeDetection);
        };
        if entry.descriptor().kind.edge_detector().is_none() {
            return Err(SessionError::NotEdgeDetection);
        }
        let descriptor = entry.descriptor().clone().param("threshold", threshold);
        let handler = self.handler_for(&descriptor);
        let start = Instant::now();
        let image = handler.run(&descriptor, input, &CancelToken::new())?;
        let image = self
            .history
            .replace_current(descriptor, image, start.elapsed())?;
        self.active = Some(handler);
        Ok(image)
    }

    /// The image at the history cursor.
    #[must_use]
    pub fn current_image(&self) -> &Image {
        self.history.current()
    }

    /// The image as loaded, before any edit.
    #[must_use]
    pub const fn original(&self) -> &Image {
        &self.original
    }

    /// The edit history.
    #[must_use]
    pub const fn history(&self) -> &History {
        &self.history
    }

    /// Handler of the family last dispatched to, if any.
    #[must_use]
    pub const fn active_handler(&self) -> Option<&Handler> {
        self.active.as_ref()
    }

    /// Configuration in force.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Encode the current image.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Codec`] if encoding fails.
    pub fn export_current(
        &self,
        format: ExportFormat,
        codec: &impl ImageCodec,
    ) -> Result<Vec<u8>, SessionError> {
        Ok(codec.encode(self.current_image(), format)?)
    }

    /// Encode the image as loaded.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Codec`] if encoding fails.
    pub fn export_original(
        &self,
        format: ExportFormat,
        codec: &impl ImageCodec,
    ) -> Result<Vec<u8>, SessionError> {
        Ok(codec.encode(&self.original, format)?)
    }

    fn handler_for(&self, descriptor: &Descriptor) -> Handler {
        Handler::for_kind(descriptor.kind, self.config.limits)
    }

    const fn ensure_idle(&self) -> Result<(), SessionError> {
        if self.in_flight.is_some() {
            Err(SessionError::Busy)
        } else {
            Ok(())
        }
    }

    /// Send a job for the current image to the worker, spawning the
    /// worker on first use.
    fn start(&mut self, descriptor: Descriptor, operation: Operation) -> Result<u64, SessionError> {
        let worker = match self.worker.take() {
            Some(worker) => worker,
            None => Worker::spawn()?,
        };
        let generation = self.next_generation;
        let cancel = CancelToken::new();
        let sent = worker.send(Job {
            generation,
            operation,
            input: self.history.current().clone(),
            cancel: cancel.clone(),
        });
        if let Err(error) = sent {
            // Dropped here; the next start spawns a fresh thread.
            drop(worker);
            return Err(error);
        }
        self.worker = Some(worker);
        self.next_generation += 1;
        info!(generation, op = %descriptor, "job submitted");
        self.in_flight = Some(InFlight {
            generation,
            descriptor,
            cancel,
        });
        Ok(generation)
    }

    /// Start the job at the head of the queue. If it cannot be sent, the
    /// rest of the queue is dropped with it.
    fn start_next(&mut self) -> Result<(), SessionError> {
        let Some(next) = self.queue.pop_front() else {
            return Ok(());
        };
        if let Err(error) = self.start(next.descriptor, next.operation) {
            warn!(dropped = self.queue.len(), %error, "queued job could not start, dropping queue");
            self.queue.clear();
            return Err(error);
        }
        Ok(())
    }

    /// Apply a worker reply. Stale replies are dropped and yield
    /// `Ok(None)`.
    fn handle_reply(&mut self, reply: WorkerReply) -> Result<Option<Completion>, SessionError> {
        let current = self
            .in_flight
            .as_ref()
            .is_some_and(|job| job.generation == reply.generation);
        if !current {
            debug!(generation = reply.generation, "discarding stale worker reply");
            return Ok(None);
        }
        let Some(job) = self.in_flight.take() else {
            return Ok(None);
        };

        match reply.outcome {
            Ok(completed) => {
                let image =
                    self.history
                        .record(job.descriptor.clone(), completed.image, completed.duration);
                info!(
                    generation = job.generation,
                    op = %job.descriptor,
                    duration_ms = completed.duration.as_secs_f64() * 1000.0,
                    "job completed"
                );
                self.start_next()?;
                Ok(Some(Completion {
                    generation: job.generation,
                    descriptor: job.descriptor,
                    image,
                    duration: completed.duration,
                }))
            }
            Err(error) => {
                if !self.queue.is_empty() {
                    warn!(dropped = self.queue.len(), "job failed, dropping queued jobs");
                }
                self.queue.clear();
                info!(generation = job.generation, op = %job.descriptor, %error, "job failed");
                Err(SessionError::Operation(error))
            }
        }
    }

    /// Forget the worker and everything waiting on it.
    fn worker_lost(&mut self) -> SessionError {
        warn!("worker thread lost");
        self.worker = None;
        self.in_flight = None;
        self.queue.clear();
        SessionError::WorkerGone
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Let the worker's join return promptly.
        if let Some(job) = &self.in_flight {
            job.cancel.cancel();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use retouch_ops::{GrayImage, OperationKind, RgbImage};

    use super::*;

    fn photo() -> Image {
        Image::try_from(RgbImage::from_fn(12, 12, |x, y| {
            image::Rgb([if x < 6 { 230 } else { 20 }, if y < 6 { 40 } else { 160 }, 90])
        }))
        .unwrap()
    }

    fn session() -> Session {
        Session::open(photo(), SessionConfig::default())
    }

    fn op(text: &str) -> Descriptor {
        text.parse().unwrap()
    }

    #[test]
    fn apply_then_undo_restores_original() {
        let mut s = session();
        let gray = s.apply(&op("grayscale")).unwrap();
        assert_eq!(gray.channels(), 1);
        assert_eq!(s.undo().unwrap(), photo());
        assert_eq!(s.current_image(), s.original());
    }

    #[test]
    fn active_handler_follows_last_family() {
        let mut s = session();
        assert!(s.active_handler().is_none());
        s.apply(&op("hsv")).unwrap();
        assert_eq!(
            s.active_handler().unwrap().family(),
            retouch_ops::Family::Conversion
        );
        s.apply(&op("sobel")).unwrap();
        assert_eq!(
            s.active_handler().unwrap().family(),
            retouch_ops::Family::EdgeDetection
        );
    }

    #[test]
    fn no_history_errors_are_flattened() {
        let mut s = session();
        assert!(matches!(
            s.undo(),
            Err(SessionError::NoHistory(Direction::Undo))
        ));
        assert!(matches!(
            s.redo(),
            Err(SessionError::NoHistory(Direction::Redo))
        ));
    }

    #[test]
    fn retune_requires_edge_step() {
        let mut s = session();
        assert!(matches!(
            s.retune_threshold(0.2),
            Err(SessionError::NotEdgeDetection)
        ));
        s.apply(&op("grayscale")).unwrap();
        assert!(matches!(
            s.retune_threshold(0.2),
            Err(SessionError::NotEdgeDetection)
        ));
    }

    #[test]
    fn retune_replaces_edge_step() {
        let mut s = session();
        s.apply(&op("grayscale")).unwrap();
        s.apply(&op("roberts:threshold=0.9")).unwrap();
        let retuned = s.retune_threshold(0.05).unwrap();
        assert_eq!(s.history().len(), 2);
        let expected =
            retouch_ops::apply(&op("roberts:threshold=0.05"), s.history().previous_image().unwrap())
                .unwrap();
        assert_eq!(retuned, expected);
        assert!(matches!(
            s.retune_threshold(3.0),
            Err(SessionError::Operation(OpError::InvalidParameter { .. }))
        ));
    }

    #[test]
    fn revert_returns_to_original() {
        let mut s = session();
        s.apply(&op("grayscale")).unwrap();
        s.apply(&op("multi-otsu:classes=2")).unwrap();
        assert_eq!(s.revert().unwrap(), &photo());
        assert!(s.history().is_empty());
    }

    #[test]
    fn load_resets_history() {
        let mut s = session();
        s.apply(&op("hsv")).unwrap();
        let gray = Image::try_from(GrayImage::new(3, 3)).unwrap();
        s.load(gray.clone()).unwrap();
        assert_eq!(s.current_image(), &gray);
        assert_eq!(s.original(), &gray);
        assert!(!s.history().can_undo());
        assert!(s.active_handler().is_none());
    }

    #[test]
    fn cancel_without_job_is_noop() {
        let mut s = session();
        assert!(!s.cancel());
        assert!(!s.is_busy());
        assert!(s.poll().unwrap().is_none());
    }

    #[test]
    fn unsendable_queued_job_drops_the_rest_of_the_queue() {
        let mut s = session();
        for text in ["grayscale", "hsv", "sobel"] {
            s.queue.push_back(Queued {
                descriptor: op(text),
                operation: Operation::Grayscale,
            });
        }
        s.worker = Some(Worker::disconnected());
        assert!(matches!(s.start_next(), Err(SessionError::WorkerGone)));
        assert_eq!(s.queued(), 0);
        assert!(!s.is_busy());
        assert!(s.worker.is_none());
    }
}
