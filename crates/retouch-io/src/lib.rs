//! retouch-io: Image codecs and filesystem access.
//!
//! Implements [`retouch_core::ImageCodec`] with the `image` crate and
//! provides path-based load/save helpers for the CLI.

pub mod codec;
pub mod files;

pub use codec::StdCodec;
pub use files::{IoError, format_for_path, load, read_bytes, save, write_bytes};
