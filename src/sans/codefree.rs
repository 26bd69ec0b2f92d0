//! SD CodeFree serial framing.
//!
//! Frames are `0x53, direction, length, payload, xor, 0xAA`, where `length`
//! counts the payload plus the two trailing bytes and `xor` folds the
//! payload. Every session starts with the meter sending a fixed challenge
//! once the user turns it on.

use chrono::{NaiveDate, NaiveDateTime};
use either::Either;
use zerocopy::FromBytes;

use super::{FrameError, check::xor_fold};
use crate::{Error, GlucoseReading, Meal};

pub const STX: u8 = 0x53;
pub const ETX: u8 = 0xAA;

pub const DIRECTION_IN: u8 = 0x20;
pub const DIRECTION_OUT: u8 = 0x10;

pub const CHALLENGE: [u8; 7] = [0x53, 0x20, 0x04, 0x10, 0x30, 0x20, 0xAA];
pub const CHALLENGE_RESPONSE: &[u8] = &[0x10, 0x40];
pub const DATE_SET: &[u8] = &[0x10, 0x10];
pub const FETCH: &[u8] = &[0x10, 0x60];
pub const DISCONNECT: &[u8] = &[0x10, 0x60];
pub const DISCONNECTED: &[u8] = &[0x10, 0x70];

/// Length of the first message following the challenge response.
pub const FIRST_MESSAGE_SIZE: usize = 22;

pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let length = payload.len() + 2;
    let length = u8::try_from(length).map_err(|_| FrameError::Length(length))?;

    let mut r = Vec::with_capacity(length as usize + 3);
    r.extend([STX, DIRECTION_OUT, length]);
    r.extend_from_slice(payload);
    r.extend([xor_fold(payload), ETX]);

    Ok(r)
}

/// `ADATE` command setting the clock, to the minute.
pub fn set_datetime(t: NaiveDateTime) -> Vec<u8> {
    t.format("ADATE%Y%m%d%H%M").to_string().into_bytes()
}

/// State token to decode the three-byte preamble of a received frame.
#[derive(Debug)]
pub struct FrameStart;

impl FrameStart {
    pub fn advance(self, r: [u8; 3]) -> Result<FrameRest, FrameError> {
        let [stx, direction, length] = r;

        if stx != STX {
            Err(FrameError::StartMarker(stx))?
        }

        if direction != DIRECTION_IN {
            Err(FrameError::StartMarker(direction))?
        }

        if length < 2 {
            Err(FrameError::Length(length as usize))?
        }

        Ok(FrameRest { length })
    }
}

#[derive(Debug)]
pub struct FrameRest {
    length: u8,
}

impl FrameRest {
    pub fn remaining(&self) -> usize {
        self.length as usize
    }

    /// Validate the trailer and return the payload.
    pub fn advance(self, r: &[u8]) -> Result<Vec<u8>, FrameError> {
        if r.len() != self.remaining() {
            Err(FrameError::Length(r.len()))?
        }

        let (payload, trailer) = r.split_at(r.len() - 2);
        let [checksum, etx] = [trailer[0], trailer[1]];

        if etx != ETX {
            Err(FrameError::EndMarker(etx))?
        }

        let calculated = xor_fold(payload);
        if checksum != calculated {
            Err(FrameError::Checksum {
                found: checksum as u32,
                calculated: calculated as u32,
            })?
        }

        Ok(payload.to_vec())
    }
}

/// State token waiting for the meter's challenge, one byte at a time.
///
/// Leading NUL bytes, sent while the meter powers up, are skipped.
#[derive(Debug)]
pub struct Challenge;

impl Challenge {
    pub fn advance(self, byte: u8) -> Result<Either<Challenge, ChallengeRest>, Error> {
        match byte {
            0x00 => Ok(Either::Left(self)),
            STX => Ok(Either::Right(ChallengeRest)),
            other => Err(Error::ConnectionFailed(format!(
                "unexpected starting byte {other:#04x}"
            ))),
        }
    }
}

#[derive(Debug)]
pub struct ChallengeRest;

impl ChallengeRest {
    /// Validate the challenge; the caller answers with [`CHALLENGE_RESPONSE`].
    pub fn advance(self, r: [u8; 6]) -> Result<FirstMessage, Error> {
        if r != CHALLENGE[1..] {
            Err(Error::ConnectionFailed(format!(
                "unexpected challenge {}",
                hex::encode(r)
            )))?
        }

        Ok(FirstMessage)
    }
}

#[derive(Debug)]
pub struct FirstMessage;

impl FirstMessage {
    /// Number of readings stored in the meter.
    pub fn advance(self, payload: &[u8]) -> Result<u16, Error> {
        if payload.len() != FIRST_MESSAGE_SIZE {
            Err(Error::invalid(format!(
                "first message of {} bytes received",
                payload.len()
            )))?
        }

        Ok(u16::from_be_bytes([payload[1], payload[2]]))
    }
}

#[repr(C, packed)]
#[derive(FromBytes)]
struct Record {
    _unknown: [u8; 2],
    year: u8,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    value: [u8; 2],
    meal: u8,
}

pub fn parse_reading(payload: &[u8]) -> Result<GlucoseReading, Error> {
    let (record, _) = Record::read_from_prefix(payload)
        .map_err(|_| Error::invalid(format!("reading of {} bytes received", payload.len())))?;

    let timestamp = NaiveDate::from_ymd_opt(
        2000 + record.year as i32,
        record.month as u32,
        record.day as u32,
    )
    .and_then(|d| d.and_hms_opt(record.hour as u32, record.minute as u32, 0))
    .ok_or(Error::InvalidDateTime)?;

    let meal = match record.meal {
        0x00 => Meal::None,
        0x10 => Meal::Before,
        0x20 => Meal::After,
        other => Err(Error::invalid(format!("unknown meal flag {other:#04x}")))?,
    };

    let value = u16::from_be_bytes(record.value);

    Ok(GlucoseReading::new(timestamp, value as f64).with_meal(meal))
}
