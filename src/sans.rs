//! Frame codecs, checksums and session state machines, free of I/O.
//!
//! Each protocol is exposed as a set of pure functions over byte buffers,
//! plus state tokens for the exchanges that span several frames. A state
//! token is consumed by its `advance` method, which takes the next chunk of
//! received bytes and returns the following state (or the decoded result).
//! Tokens cannot be cloned, so a session can only move forward.
//!
//! ```ignore
//! use either::Either;
//! use glucometer::sans::lis::{Establishment, Transfer};
//!
//! let mut transfer = Establishment.advance(&read_block()?)?;
//! write_block(&[ACK])?;
//!
//! let termination = loop {
//!     transfer = match transfer.advance(&read_block()?)? {
//!         Either::Left(transfer) => transfer,
//!         Either::Right(termination) => break termination,
//!     };
//!     write_block(&[ACK])?;
//! };
//! ```
//!
//! The [`avec`](crate::avec) module drives these tokens over real transports.

use thiserror::Error;

pub mod abbott;
pub mod accuchek;
pub mod areo;
pub mod check;
pub mod codefree;
pub mod contour;
pub mod fields;
pub mod freestyle;
pub mod libre;
pub mod lifescan;
pub mod lis;
pub mod taidoc;
pub mod ultra2;

/// Structural violation in a received frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Unexpected start marker ({0:#04x}).")]
    StartMarker(u8),

    #[error("Unexpected end marker ({0:#04x}).")]
    EndMarker(u8),

    #[error("Invalid frame length ({0}).")]
    Length(usize),

    #[error("Frame truncated.")]
    Truncated,

    #[error("Frame number {found} received, {expected} expected.")]
    Sequence { found: u8, expected: u8 },

    #[error("Calculated ({calculated:#x}) and found ({found:#x}) checksums do not match.")]
    Checksum { found: u32, calculated: u32 },

    #[error("Frame is missing its checksum ({0:?}).")]
    MissingChecksum(String),
}
