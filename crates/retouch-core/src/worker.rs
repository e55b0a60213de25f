//! Background thread that runs validated operations off the caller's
//! thread.
//!
//! The worker is a single long-lived thread fed through an `mpsc`
//! channel. Each [`Job`] carries a generation id that is passed through
//! to its [`WorkerReply`], so the owner can recognise replies that
//! belong to a job it has since cancelled and drop them. A panic inside
//! a kernel is caught and reported as [`OpError::Kernel`]; the thread
//! keeps serving jobs.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use retouch_ops::{CancelToken, Image, ImageOperation, OpError, Operation};
use tracing::{debug, warn};
use web_time::Instant;

use crate::session::SessionError;

/// One unit of work.
#[derive(Debug, Clone)]
pub struct Job {
    /// Id echoed back in the reply.
    pub generation: u64,
    /// Validated operation to run.
    pub operation: Operation,
    /// Image to run it on.
    pub input: Image,
    /// Cancellation flag shared with the submitter.
    pub cancel: CancelToken,
}

/// Successful job output.
#[derive(Debug, Clone)]
pub struct Completed {
    /// Result image.
    pub image: Image,
    /// Time spent in the kernel.
    pub duration: Duration,
}

/// Exactly one reply is sent per job.
#[derive(Debug, Clone)]
pub struct WorkerReply {
    /// Generation of the job this answers.
    pub generation: u64,
    /// Result or failure.
    pub outcome: Result<Completed, OpError>,
}

/// Handle to the worker thread. Dropping it closes the job channel and
/// joins the thread, which first finishes the job it is running.
#[derive(Debug)]
pub struct Worker {
    jobs: Option<Sender<Job>>,
    replies: Receiver<WorkerReply>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Start the worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Spawn`] if the OS refuses to create the
    /// thread.
    pub fn spawn() -> Result<Self, SessionError> {
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (reply_tx, reply_rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("retouch-worker".into())
            .spawn(move || {
                for job in job_rx {
                    if reply_tx.send(run_job(job)).is_err() {
                        break;
                    }
                }
                debug!("worker thread exiting");
            })
            .map_err(SessionError::Spawn)?;
        Ok(Self {
            jobs: Some(job_tx),
            replies: reply_rx,
            thread: Some(thread),
        })
    }

    /// Queue `job` on the worker.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::WorkerGone`] if the thread has exited.
    pub fn send(&self, job: Job) -> Result<(), SessionError> {
        self.jobs
            .as_ref()
            .ok_or(SessionError::WorkerGone)?
            .send(job)
            .map_err(|_| SessionError::WorkerGone)
    }

    /// Next reply, if one is ready.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::WorkerGone`] if the thread has exited.
    pub fn try_recv(&self) -> Result<Option<WorkerReply>, SessionError> {
        match self.replies.try_recv() {
            Ok(reply) => Ok(Some(reply)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(SessionError::WorkerGone),
        }
    }

    /// Block until the next reply arrives.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::WorkerGone`] if the thread has exited.
    pub fn recv(&self) -> Result<WorkerReply, SessionError> {
        self.replies.recv().map_err(|_| SessionError::WorkerGone)
    }
}

#[cfg(test)]
impl Worker {
    /// A handle whose thread is already gone.
    pub(crate) fn disconnected() -> Self {
        let (jobs, _) = mpsc::channel();
        let (_, replies) = mpsc::channel();
        Self {
            jobs: Some(jobs),
            replies,
            thread: None,
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        drop(self.jobs.take());
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("worker thread panicked during shutdown");
        }
    }
}

fn run_job(job: Job) -> WorkerReply {
    let Job {
        generation,
        operation,
        input,
        cancel,
    } = job;
    debug!(generation, op = %operation.descriptor(), "job started");
    let start = Instant::now();
    let outcome = run_caught(|| operation.apply(&input, &cancel)).map(|image| Completed {
            image,
            duration: start.elapsed(),
        });
    debug!(generation, ok = outcome.is_ok(), "job finished");
    WorkerReply {
        generation,
        outcome,
    }
}

/// Run a kernel, turning a panic into [`OpError::Kernel`].
fn run_caught(kernel: impl FnOnce() -> Result<Image, OpError>) -> Result<Image, OpError> {
    panic::catch_unwind(AssertUnwindSafe(kernel))
        .unwrap_or_else(|payload| Err(OpError::Kernel(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "kernel panicked".to_owned())
}
