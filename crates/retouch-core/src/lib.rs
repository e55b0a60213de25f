//! retouch-core: Operation history and editing sessions.
//!
//! A [`Session`] owns one loaded image and a linear [`History`] of the
//! operations applied to it. Operations are described with
//! [`Descriptor`]s, validated by the family [`Handler`] and either run on
//! the calling thread ([`Session::apply`]) or handed to a background
//! [`Worker`] ([`Session::submit`]). Every successful run appends one
//! history entry; [`Session::undo`] and [`Session::redo`] move a cursor
//! through the entries without recomputing anything.
//!
//! Encoding and decoding are abstracted by the [`ImageCodec`] trait so
//! this crate stays free of file-format code; `retouch-io` provides the
//! standard implementation.

pub mod codec;
pub mod config;
pub mod history;
pub mod session;
pub mod worker;

pub use codec::{CodecError, ExportFormat, ImageCodec};
pub use config::{BusyPolicy, ConfigError, HistoryPolicy, SessionConfig};
pub use history::{Direction, Entry, History, HistoryError, HistorySummary, Position};
pub use session::{Completion, Session, SessionError, Submission};
pub use worker::{Completed, Job, Worker, WorkerReply};

pub use retouch_ops::{Descriptor, Handler, Image, OpError, OperationKind};
