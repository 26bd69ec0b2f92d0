//! LifeScan OneTouch Ultra 2 text protocol.
//!
//! Commands are sent as `DM<x>` strings preceded by a wake sequence.
//! Responses are single lines terminated by a carriage return, ending with
//! a space and four uppercase hex digits holding the 16-bit byte sum of
//! everything before that space.

use chrono::{NaiveDate, NaiveDateTime};

use super::{FrameError, check::sum16};
use crate::{Error, GlucoseReading, Meal, Unit};

pub const VERSION: &str = "DM?";
pub const SERIAL_NUMBER: &str = "DM@";
pub const READ_DATETIME: &str = "DMF";
pub const GLUCOSE_UNIT: &str = "DMSU?";
pub const DUMP: &str = "DMP";
pub const ZERO_LOG: &str = "DMZ";

pub fn encode_command(command: &str) -> Vec<u8> {
    format!("\x11\r{command}\r").into_bytes()
}

/// `DMT` command setting the clock.
pub fn set_datetime(t: NaiveDateTime) -> String {
    t.format("DMT%m/%d/%y %H:%M:%S").to_string()
}

/// Validate and strip the trailing checksum of a response line.
pub fn strip_checksum(line: &str) -> Result<&str, FrameError> {
    let missing = || FrameError::MissingChecksum(line.to_owned());

    let body = line.strip_suffix('\n').unwrap_or(line);
    let body = body.strip_suffix('\r').ok_or_else(missing)?;
    let (message, checksum) = body.rsplit_once(' ').ok_or_else(missing)?;

    if message.is_empty()
        || checksum.len() != 4
        || !checksum
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
    {
        Err(missing())?
    }

    let found = u16::from_str_radix(checksum, 16).map_err(|_| missing())?;
    let calculated = sum16(message.as_bytes());

    if found != calculated {
        Err(FrameError::Checksum {
            found: found as u32,
            calculated: calculated as u32,
        })?
    }

    Ok(message)
}

fn unquote(s: &str) -> Option<&str> {
    s.strip_prefix('"')?.strip_suffix('"')
}

fn invalid(response: &str) -> Error {
    Error::invalid(format!("unexpected response {response:?}"))
}

pub fn parse_version(message: &str) -> Result<String, Error> {
    message
        .strip_prefix('?')
        .map(str::to_owned)
        .ok_or_else(|| invalid(message))
}

/// Serial numbers are nine uppercase alphanumerics; a trailing `Y` marks an
/// Ultra 2 meter.
pub fn parse_serial_number(message: &str) -> Result<String, Error> {
    let serial = message
        .strip_prefix("@ ")
        .and_then(unquote)
        .filter(|s| {
            s.len() == 9
                && s.bytes()
                    .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        })
        .ok_or_else(|| invalid(message))?;

    if !serial.ends_with('Y') {
        Err(Error::InvalidSerialNumber(serial.to_owned()))?
    }

    Ok(serial.to_owned())
}

pub fn parse_glucose_unit(message: &str) -> Result<Unit, Error> {
    let unit = message
        .strip_prefix("SU?,\"")
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| invalid(message))?;

    match unit {
        "MG/DL " => Ok(Unit::MgDl),
        "MMOL/L" => Ok(Unit::MmolL),
        other => Err(Error::InvalidGlucoseUnit(other.to_owned())),
    }
}

/// Parse the `"DOW","MM/DD/YY","HH:MM:SS   "` triple shared by clock
/// responses and dump records.
fn parse_date_fields(day: &str, date: &str, time: &str) -> Result<NaiveDateTime, Error> {
    let bad = || Error::invalid(format!("invalid date {day},{date},{time}"));

    let day = unquote(day).ok_or_else(bad)?;
    let date = unquote(date).ok_or_else(bad)?;
    let time = unquote(time).ok_or_else(bad)?;

    if day.len() != 3 || !day.bytes().all(|b| b.is_ascii_uppercase()) {
        Err(bad())?
    }

    let time = time.strip_suffix("   ").ok_or_else(bad)?;
    let numbers = |s: &str, sep: char| -> Option<Vec<u32>> {
        s.split(sep)
            .map(|n| {
                (n.len() == 2 && n.bytes().all(|b| b.is_ascii_digit()))
                    .then(|| n.parse().ok())
                    .flatten()
            })
            .collect()
    };

    let &[month, dom, year] = numbers(date, '/').ok_or_else(bad)?.as_slice() else {
        Err(bad())?
    };
    let &[hour, minute, second] = numbers(time, ':').ok_or_else(bad)?.as_slice() else {
        Err(bad())?
    };

    NaiveDate::from_ymd_opt(2000 + year as i32, month, dom)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .ok_or(Error::InvalidDateTime)
}

/// Parse the clock reported by `DMF` (`F` prefix) or `DMT` (`T` prefix).
pub fn parse_datetime(message: &str) -> Result<NaiveDateTime, Error> {
    let fields = message
        .strip_prefix("F ")
        .or_else(|| message.strip_prefix("T "))
        .ok_or_else(|| invalid(message))?;

    let [day, date, time] = fields.split(',').collect::<Vec<_>>()[..] else {
        Err(invalid(message))?
    };

    parse_date_fields(day, date, time)
}

/// Number of records announced by the first line of a dump.
pub fn parse_dump_header(message: &str) -> Result<usize, Error> {
    let fields = message.strip_prefix("P ").ok_or_else(|| invalid(message))?;

    let [count, serial, unit] = fields.split(',').collect::<Vec<_>>()[..] else {
        Err(invalid(message))?
    };

    if unquote(serial).is_none() || unquote(unit).is_none() {
        Err(invalid(message))?
    }

    count
        .trim()
        .parse()
        .map_err(|_| invalid(message))
}

/// Parse a dump record: `P "DOW","MM/DD/YY","HH:MM:SS   ","C VVV?","M","CC", 00`.
pub fn parse_dump_record(message: &str) -> Result<GlucoseReading, Error> {
    let fields = message.strip_prefix("P ").ok_or_else(|| invalid(message))?;

    let [day, date, time, value, meal, comment, _] = fields.split(',').collect::<Vec<_>>()[..]
    else {
        Err(invalid(message))?
    };

    let timestamp = parse_date_fields(day, date, time)?;

    let value = unquote(value)
        .filter(|v| v.len() == 6 && v.is_ascii())
        .ok_or_else(|| invalid(message))?;
    let (control, rest) = value.split_at(1);
    if !matches!(control, "C" | " ") || &rest[..1] != " " || !matches!(&rest[4..], "?" | " ") {
        Err(invalid(message))?
    }
    let glucose: f64 = rest[1..4]
        .bytes()
        .all(|b| b.is_ascii_digit())
        .then(|| rest[1..4].parse().ok())
        .flatten()
        .ok_or_else(|| invalid(message))?;

    let meal = match unquote(meal) {
        Some("N") => Meal::None,
        Some("B") => Meal::Before,
        Some("A") => Meal::After,
        _ => Err(invalid(message))?,
    };

    let comment = unquote(comment)
        .filter(|c| c.len() == 2)
        .and_then(|c| c.parse::<u8>().ok())
        .filter(|c| *c <= 11)
        .ok_or_else(|| invalid(message))?;

    // Control `C` marks control-solution tests.
    Ok(GlucoseReading::new(timestamp, glucose)
        .with_meal(meal)
        .with_comment(comment_text(comment))
        .with_extra("control", (control == "C") as i64))
}

fn comment_text(code: u8) -> &'static str {
    match code {
        1 => "Not Enough Food",
        2 => "Too Much Food",
        3 => "Mild Exercise",
        4 => "Hard Exercise",
        5 => "Medication",
        6 => "Stress",
        7 => "Illness",
        8 => "Feel Hypo",
        9 => "Menses",
        10 => "Vacation",
        11 => "Other",
        _ => "",
    }
}
