//! Abbott FreeStyle shared HID protocol.
//!
//! Every report carries a message type, a payload length and up to 62 bytes
//! of payload. Text commands are answered by one or more text replies that
//! are accumulated until the `CMD OK` trailer, after which the embedded
//! `CKSM:` checksum is verified. Bulk queries ("multirecords") embed a
//! second count and checksum line in the text reply.

use chrono::{NaiveDate, NaiveDateTime};
use csv::StringRecord;
use either::Either;
use log::debug;

use super::{FrameError, check::sum32};
use crate::Error;

/// Size of a report read from the meter.
pub const REPORT_SIZE: usize = 64;
/// Largest payload of a single report.
pub const MAX_PAYLOAD: usize = 62;
/// Size of the encrypted region of a report, following the message type.
pub const CIPHER_BLOCK: usize = 62;

pub const INIT: u8 = 0x01;
pub const INIT_REPLY: u8 = 0x71;
pub const KEEPALIVE: u8 = 0x22;
pub const UNKNOWN_COMMAND: u8 = 0x30;
pub const ENCRYPTION_STATUS: u8 = 0x33;

/// Text command type of most models.
pub const TEXT_COMMAND: u8 = 0x60;
/// Text command type of the Libre family.
pub const LIBRE_TEXT_COMMAND: u8 = 0x21;
pub const TEXT_REPLY: u8 = 0x60;

const ENCRYPTION_NOT_INITIALIZED: u8 = 0x14;
const ENCRYPTION_SETUP_FAILED: u8 = 0x15;

/// Message types exchanged in clear even within an encrypted session.
pub const ALWAYS_UNENCRYPTED: [u8; 13] = [
    INIT, 0x04, 0x05, 0x06, 0x0C, 0x0D, 0x14, 0x15, 0x33, 0x34, 0x35, INIT_REPLY, KEEPALIVE,
];

const REPLY_COMPLETED: &[u8] = b"CMD OK";
const REPLY_FAILURE: &[u8] = b"CMD Fail!";

const LOG_EMPTY: &str = "Log Empty\r\n";

pub const SERIAL_NUMBER: &str = "$serlnum?";
pub const LIBRE_SERIAL_NUMBER: &str = "$sn?";
pub const VERSION: &str = "$swver?";
pub const DATE: &str = "$date?";
pub const TIME: &str = "$time?";
pub const PATIENT_NAME: &str = "$ptname?";
pub const UNIT: &str = "$uom?";
pub const RESET_PATIENT: &str = "$resetpatient";
pub const HISTORY: &str = "$history?";
pub const ARRESULT: &str = "$arresult?";
pub const RESULT: &str = "$result?";

/// Cipher applied to the reports of an encrypted session.
///
/// The cipher operates in place on the [`CIPHER_BLOCK`] bytes that follow the
/// message type.
pub trait ReportCipher {
    fn encrypt(&mut self, block: &mut [u8; CIPHER_BLOCK]);
    fn decrypt(&mut self, block: &mut [u8; CIPHER_BLOCK]);
}

pub fn is_always_unencrypted(message_type: u8) -> bool {
    ALWAYS_UNENCRYPTED.contains(&message_type)
}

/// Build the report for `payload`.
pub fn encode_report(message_type: u8, payload: &[u8]) -> Result<[u8; REPORT_SIZE], FrameError> {
    if payload.len() > MAX_PAYLOAD {
        Err(FrameError::Length(payload.len()))?
    }

    let mut r = [0; REPORT_SIZE];
    r[0] = message_type;
    r[1] = payload.len() as u8;
    r[2..2 + payload.len()].copy_from_slice(payload);

    Ok(r)
}

/// Build an encrypted report: the payload is zero padded to the whole block
/// and carries no length.
pub fn encode_encrypted_report(
    message_type: u8,
    payload: &[u8],
    cipher: &mut dyn ReportCipher,
) -> Result<[u8; REPORT_SIZE], FrameError> {
    if is_always_unencrypted(message_type) {
        return encode_report(message_type, payload);
    }

    if payload.len() > CIPHER_BLOCK {
        Err(FrameError::Length(payload.len()))?
    }

    let mut block = [0; CIPHER_BLOCK];
    block[..payload.len()].copy_from_slice(payload);
    cipher.encrypt(&mut block);

    let mut r = [0; REPORT_SIZE];
    r[0] = message_type;
    r[1..1 + CIPHER_BLOCK].copy_from_slice(&block);

    Ok(r)
}

pub fn decode_report(r: &[u8; REPORT_SIZE]) -> Result<(u8, &[u8]), FrameError> {
    let length = r[1] as usize;
    if length > MAX_PAYLOAD {
        Err(FrameError::Length(length))?
    }

    Ok((r[0], &r[2..2 + length]))
}

/// Decode a report of an encrypted session. Trailing zero padding of the
/// decrypted block is dropped.
pub fn decode_encrypted_report(
    r: &[u8; REPORT_SIZE],
    cipher: &mut dyn ReportCipher,
) -> Result<(u8, Vec<u8>), FrameError> {
    if is_always_unencrypted(r[0]) {
        return decode_report(r).map(|(t, payload)| (t, payload.to_vec()));
    }

    let mut block = [0; CIPHER_BLOCK];
    block.copy_from_slice(&r[1..1 + CIPHER_BLOCK]);
    cipher.decrypt(&mut block);

    let end = block.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    Ok((r[0], block[..end].to_vec()))
}

/// Classification of a received report.
#[derive(Debug, PartialEq, Eq)]
pub enum Incoming<'a> {
    /// Keep-alive noise, to be discarded before reading again.
    KeepAlive,
    Message(u8, &'a [u8]),
}

pub fn classify(message_type: u8, payload: &[u8]) -> Result<Incoming<'_>, Error> {
    match (message_type, payload) {
        (KEEPALIVE, [_]) => Ok(Incoming::KeepAlive),
        (UNKNOWN_COMMAND, _) => Err(Error::CommandError(format!(
            "unknown command ({})",
            hex::encode(payload)
        ))),
        (ENCRYPTION_STATUS, [ENCRYPTION_NOT_INITIALIZED, ..]) => Err(Error::CommandError(
            "encryption not initialized".to_owned(),
        )),
        (ENCRYPTION_STATUS, [ENCRYPTION_SETUP_FAILED, ..]) => {
            Err(Error::CommandError("encryption setup failed".to_owned()))
        }
        _ => Ok(Incoming::Message(message_type, payload)),
    }
}

/// Validate the answer to [`INIT`].
pub fn check_init_reply(message_type: u8, payload: &[u8]) -> Result<(), Error> {
    if message_type != INIT_REPLY || payload != [0x01] {
        Err(Error::ConnectionFailed(format!(
            "connection error: unexpected message {message_type:02x}:{}",
            hex::encode(payload)
        )))?
    }

    Ok(())
}

/// State token accumulating the reports of a text reply.
#[derive(Debug)]
pub struct TextReply {
    reply_type: u8,
    content: Vec<u8>,
}

impl TextReply {
    pub fn new(reply_type: u8) -> Self {
        Self {
            reply_type,
            content: Vec::new(),
        }
    }

    /// Add a received message. Returns the verified reply text once the
    /// `CMD OK` trailer arrived.
    pub fn advance(mut self, message_type: u8, payload: &[u8]) -> Result<Either<Self, String>, Error> {
        if payload
            .windows(REPLY_FAILURE.len())
            .any(|w| w == REPLY_FAILURE)
        {
            Err(Error::invalid(format!(
                "command failure: {}",
                String::from_utf8_lossy(payload)
            )))?
        }

        if message_type != self.reply_type {
            Err(Error::invalid(format!(
                "message type {message_type:02x} does not match expectations: {}",
                String::from_utf8_lossy(payload)
            )))?
        }

        self.content.extend_from_slice(payload);

        if self
            .content
            .windows(REPLY_COMPLETED.len())
            .any(|w| w == REPLY_COMPLETED)
        {
            parse_text_reply(&self.content).map(Either::Right)
        } else {
            Ok(Either::Left(self))
        }
    }
}

fn verify_checksum(message: &str, checksum: &str) -> Result<(), Error> {
    if checksum.len() != 8
        || !checksum
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
    {
        Err(Error::MissingChecksum(checksum.to_owned()))?
    }

    let expected = u32::from_str_radix(checksum, 16)
        .map_err(|_| Error::MissingChecksum(checksum.to_owned()))?;
    let calculated = sum32(message.as_bytes());

    if expected != calculated {
        Err(Error::InvalidChecksum {
            expected,
            calculated,
        })?
    }

    Ok(())
}

/// Parse `message CKSM:XXXXXXXX\r\nCMD OK\r\n`, returning the message with
/// its line terminator.
pub fn parse_text_reply(content: &[u8]) -> Result<String, Error> {
    let content = std::str::from_utf8(content)
        .map_err(|_| Error::invalid(String::from_utf8_lossy(content).into_owned()))?;
    let invalid = || Error::invalid(content.to_owned());

    let body = content
        .strip_suffix("\r\nCMD OK\r\n")
        .ok_or_else(invalid)?;
    let (message, checksum) = body.rsplit_once("CKSM:").ok_or_else(invalid)?;

    if message.len() < 3 || !message.ends_with("\r\n") {
        Err(invalid())?
    }

    verify_checksum(message, checksum)?;

    Ok(message.to_owned())
}

/// Text reply without its line terminators.
pub fn reply_line(message: &str) -> &str {
    message.trim_end_matches(['\r', '\n'])
}

/// Parse a multirecord reply into its comma-separated records.
///
/// The body is `records\r\nCOUNT,XXXXXXXX\r\n`, the checksum covering the
/// records and their terminators.
pub fn parse_multirecord(message: &str) -> Result<Vec<StringRecord>, Error> {
    if message == LOG_EMPTY {
        return Ok(Vec::new());
    }

    let invalid = || Error::invalid(message.to_owned());

    let body = message.strip_suffix("\r\n").ok_or_else(invalid)?;
    let split = body.rfind("\r\n").ok_or_else(invalid)? + 2;
    let (records, trailer) = body.split_at(split);

    let (count, checksum) = trailer.split_once(',').ok_or_else(invalid)?;
    if records.len() < 3 || count.is_empty() || !count.bytes().all(|b| b.is_ascii_digit()) {
        Err(invalid())?
    }

    verify_checksum(records, checksum)?;
    debug!("Multirecord reply announces {count} records");

    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(records.as_bytes())
        .into_records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Error::invalid(format!("malformed records ({e})")))
}

/// `$date` command setting the date.
pub fn set_date(t: NaiveDateTime) -> String {
    t.format("$date,%-m,%-d,%y").to_string()
}

/// `$time` command setting the time, to the minute.
pub fn set_time(t: NaiveDateTime) -> String {
    t.format("$time,%-H,%-M").to_string()
}

/// Combine the `M,D,Y` and `H,M` replies of `$date?` and `$time?`.
pub fn parse_datetime(date: &str, time: &str) -> Result<NaiveDateTime, Error> {
    let numbers = |s: &str| -> Option<Vec<u32>> {
        reply_line(s)
            .split(',')
            .map(|n| n.trim().parse().ok())
            .collect()
    };

    let Some(&[month, day, year]) = numbers(date).as_deref() else {
        Err(Error::invalid(format!("invalid date {date:?}")))?
    };
    let Some(&[hour, minute]) = numbers(time).as_deref() else {
        Err(Error::invalid(format!("invalid time {time:?}")))?
    };

    NaiveDate::from_ymd_opt(2000 + year as i32, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .ok_or(Error::InvalidDateTime)
}

/// Patient name, absent when the meter reports an empty one.
pub fn parse_patient_name(message: &str) -> Option<String> {
    let name = reply_line(message);
    (!name.is_empty()).then(|| name.to_owned())
}

pub fn set_patient_name(name: &str) -> String {
    format!("$ptname,{name}")
}
