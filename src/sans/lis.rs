//! LIS1-A transfer frames and LIS2-A2 records.
//!
//! A LIS1-A session has three phases: establishment (the meter sends ENQ and
//! is answered with ACK), transfer (numbered frames, each acknowledged) and
//! termination (EOT). Frames are
//!
//! ```text
//! STX FN text ETB C1 C2 CR LF    (intermediate frame)
//! STX FN text ETX C1 C2 CR LF    (end frame)
//! ```
//!
//! where `FN` is an ASCII digit cycling through 0-7 and `C1 C2` is the byte
//! sum modulo 256 of everything from `FN` to the terminator, in hex.
//!
//! The transferred text is a LIS2-A2 message: CR-separated records whose
//! fields, repeats and components are split by the delimiters declared in
//! the header record.

use chrono::NaiveDateTime;
use either::Either;

use super::{FrameError, check::byte_sum_mod256};
use crate::{Error, GlucoseReading, Unit};

pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
pub const EOT: u8 = 0x04;
pub const ENQ: u8 = 0x05;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;
pub const ETB: u8 = 0x17;
pub const CR: u8 = 0x0D;
pub const LF: u8 = 0x0A;

/// Smallest possible frame, carrying no text.
const MIN_FRAME: usize = 7;

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M";

/// A validated transfer frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub number: u8,
    pub end: bool,
    pub text: &'a [u8],
}

/// Parse a transfer frame, which must follow the frame numbered `previous`.
pub fn parse_frame(previous: u8, data: &[u8]) -> Result<Frame<'_>, Error> {
    if data.len() < MIN_FRAME {
        Err(FrameError::Length(data.len()))?
    }

    if data[0] != STX {
        Err(FrameError::StartMarker(data[0]))?
    }

    let number = match data[1] {
        n @ b'0'..=b'7' => n - b'0',
        _ => Err(Error::invalid(format!(
            "invalid frame number in {}",
            hex::encode(data)
        )))?,
    };

    let expected = previous.wrapping_add(1) % 8;
    if number != expected {
        Err(FrameError::Sequence {
            found: number,
            expected,
        })?
    }

    let len = data.len();
    let end = match data[len - 5] {
        ETX => true,
        ETB => false,
        other => Err(FrameError::EndMarker(other))?,
    };

    let digits = &data[len - 4..len - 2];
    let found = digits
        .iter()
        .all(|c| matches!(c, b'0'..=b'9' | b'A'..=b'F'))
        .then(|| std::str::from_utf8(digits).ok())
        .flatten()
        .and_then(|c| u8::from_str_radix(c, 16).ok())
        .ok_or_else(|| FrameError::MissingChecksum(latin1(digits)))?;
    let calculated = byte_sum_mod256(&data[1..len - 4]);

    if found != calculated {
        Err(FrameError::Checksum {
            found: found as u32,
            calculated: calculated as u32,
        })?
    }

    if data[len - 2..] != [CR, LF] {
        Err(FrameError::EndMarker(data[len - 1]))?
    }

    Ok(Frame {
        number,
        end,
        text: &data[2..len - 5],
    })
}

/// State token waiting for the meter to open a session.
#[derive(Debug)]
pub struct Establishment;

impl Establishment {
    /// Accept the meter's ENQ; the caller answers with [`ACK`].
    pub fn advance(self, data: &[u8]) -> Result<Transfer, Error> {
        if data != [ENQ] {
            Err(Error::invalid(format!(
                "session opened with {}",
                hex::encode(data)
            )))?
        }

        Ok(Transfer {
            previous: 0,
            text: Vec::new(),
        })
    }
}

/// State token receiving transfer frames.
#[derive(Debug)]
pub struct Transfer {
    previous: u8,
    text: Vec<u8>,
}

impl Transfer {
    /// Accept a frame; the caller answers every frame with [`ACK`].
    pub fn advance(mut self, data: &[u8]) -> Result<Either<Self, Termination>, Error> {
        let frame = parse_frame(self.previous, data)?;

        self.previous = frame.number;
        self.text.extend_from_slice(frame.text);

        if frame.end {
            Ok(Either::Right(Termination { text: self.text }))
        } else {
            Ok(Either::Left(self))
        }
    }
}

/// State token waiting for the meter to close the session.
#[derive(Debug)]
pub struct Termination {
    text: Vec<u8>,
}

impl Termination {
    /// Accept the meter's EOT and return the transferred message.
    pub fn advance(self, data: &[u8]) -> Result<Vec<u8>, Error> {
        if data != [EOT] {
            Err(Error::invalid(format!(
                "session closed with {}",
                hex::encode(data)
            )))?
        }

        Ok(self.text)
    }
}

/// Decode Latin-1 bytes, which map one-to-one onto the first 256 code points.
pub fn latin1(r: &[u8]) -> String {
    r.iter().map(|&b| b as char).collect()
}

/// Separators declared by a header record (`H|\^&`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delimiters {
    pub field: char,
    pub repeat: char,
    pub component: char,
    pub escape: char,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            field: '|',
            repeat: '\\',
            component: '^',
            escape: '&',
        }
    }
}

impl Delimiters {
    pub fn from_header(record: &str) -> Result<Self, Error> {
        let mut chars = record.chars();

        let (Some(_), Some(field), Some(repeat), Some(component), Some(escape)) = (
            chars.next(),
            chars.next(),
            chars.next(),
            chars.next(),
            chars.next(),
        ) else {
            Err(Error::invalid(format!("header record too short: {record:?}")))?
        };

        // The delimiter definition is either the last field of the record or
        // followed by a field delimiter.
        if chars.next().is_some_and(|c| c != field) {
            Err(Error::invalid(format!("malformed delimiters in {record:?}")))?
        }

        Ok(Self {
            field,
            repeat,
            component,
            escape,
        })
    }
}

/// A record split into fields of repeats of components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fields(Vec<Vec<Vec<String>>>);

impl Fields {
    pub fn parse(delimiters: &Delimiters, record: &str) -> Self {
        Self(
            record
                .split(delimiters.field)
                .map(|field| {
                    field
                        .split(delimiters.repeat)
                        .map(|repeat| {
                            repeat
                                .split(delimiters.component)
                                .map(str::to_owned)
                                .collect()
                        })
                        .collect()
                })
                .collect(),
        )
    }

    pub fn component(&self, field: usize, repeat: usize, component: usize) -> Result<&str, Error> {
        self.0
            .get(field)
            .and_then(|f| f.get(repeat))
            .and_then(|r| r.get(component))
            .map(String::as_str)
            .ok_or_else(|| {
                Error::invalid(format!(
                    "no field {field} repeat {repeat} component {component} in {:?}",
                    self.0
                ))
            })
    }

    pub fn field(&self, field: usize) -> Result<&str, Error> {
        self.component(field, 0, 0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Components of the first repeat of a field.
    pub fn components(&self, field: usize) -> impl Iterator<Item = &str> {
        self.0
            .get(field)
            .and_then(|f| f.first())
            .into_iter()
            .flatten()
            .map(String::as_str)
    }
}

/// Split a transferred message into its records.
///
/// Records end with CR; a record may span several frames.
pub fn records(text: &[u8]) -> impl Iterator<Item = String> {
    text.split(|&b| b == CR)
        .filter(|r| !r.is_empty())
        .map(latin1)
}

/// Meter identity and results carried by a LIS2-A2 message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub serial_number: String,
    pub version: String,
    /// Unit of the results, if any were transferred.
    pub unit: Option<Unit>,
    pub readings: Vec<GlucoseReading>,
}

/// Parse a message: a header, a patient record, then result records up to
/// the terminator record.
pub fn parse_message(text: &[u8]) -> Result<Message, Error> {
    let mut records = records(text);

    let header = records
        .next()
        .ok_or_else(|| Error::invalid("empty message"))?;

    if !header.starts_with('H') {
        Err(Error::invalid(format!("message opened by {header:?}")))?
    }

    let delimiters = Delimiters::from_header(&header)?;
    let fields = Fields::parse(&delimiters, header.get(6..).unwrap_or_default());

    let mut message = Message {
        serial_number: fields.component(2, 2, 1)?.to_owned(),
        version: format!(
            "{} DE: {} AE: {} GP: {}",
            fields.component(2, 0, 0)?,
            fields.component(2, 0, 1)?,
            fields.component(2, 1, 0)?,
            fields.component(2, 2, 0)?,
        ),
        unit: None,
        readings: Vec::new(),
    };

    // Only a single patient is supported.
    if records.next().is_none() {
        return Ok(message);
    }

    for record in records {
        match record.chars().next() {
            Some('L') => break,
            Some('R') => {}
            _ => {
                log::debug!("Ignoring record {record:?}");
                continue;
            }
        }

        let fields = Fields::parse(&delimiters, &record);

        let unit: Unit = fields.field(4)?.parse()?;
        if message.unit.is_some_and(|u| u != unit) {
            Err(Error::invalid("results reported in more than one unit"))?
        }
        message.unit = Some(unit);

        let value: f64 = fields
            .field(3)?
            .parse()
            .map_err(|_| Error::invalid(format!("invalid result value in {record:?}")))?;

        let timestamp =
            NaiveDateTime::parse_from_str(fields.field(8)?.trim_end_matches('\r'), TIMESTAMP_FORMAT)
                .map_err(|_| Error::InvalidDateTime)?;

        message
            .readings
            .push(GlucoseReading::from_unit(timestamp, value, unit));
    }

    Ok(message)
}
