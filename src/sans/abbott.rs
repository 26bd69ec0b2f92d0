//! Serial text protocol of the FreeStyle Optium and Freedom Lite meters.
//!
//! Commands are `$<command>\r\n`; replies are CRLF-terminated lines using
//! English month abbreviations in their timestamps.

use chrono::{NaiveDate, NaiveDateTime};

use super::check::sum32;
use crate::{Error, GlucoseReading, Unit};

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

pub fn encode_command(command: &str) -> Vec<u8> {
    format!("${command}\r\n").into_bytes()
}

/// `tim` command setting the clock.
pub fn set_datetime(t: NaiveDateTime) -> String {
    t.format("tim,%m,%d,%y,%H,%M").to_string()
}

pub fn month_number(name: &str) -> Option<u32> {
    MONTHS.iter().position(|m| *m == name).map(|i| i as u32 + 1)
}

fn digits<T: std::str::FromStr>(s: &str) -> Option<T> {
    s.bytes().all(|b| b.is_ascii_digit()).then(|| s.parse().ok())?
}

fn parse_time(s: &str) -> Option<(u32, u32, u32)> {
    let mut parts = s.split(':').map(|p| (p.len() == 2).then(|| digits::<u32>(p))?);

    let hour = parts.next()??;
    let minute = parts.next()??;
    let second = match parts.next() {
        Some(second) => second?,
        None => 0,
    };

    parts.next().is_none().then_some((hour, minute, second))
}

/// Parse `Mmm? DD YYYY HH:MM[:SS]`, where the character following the month
/// abbreviation is a space or the last letter of June or July.
fn parse_month_date(s: &str) -> Option<NaiveDateTime> {
    if !s.is_ascii() || s.len() < 13 {
        return None;
    }

    let month = month_number(&s[..3])?;
    if !matches!(&s[3..5], "  " | "e " | "y ") {
        return None;
    }

    let rest = &s[5..];
    let (day, year) = (rest.get(..2)?, rest.get(3..7)?);
    if rest.get(2..3)? != " " || rest.get(7..8)? != " " {
        return None;
    }
    let time = rest.get(8..)?;

    let (hour, minute, second) = parse_time(time)?;

    NaiveDate::from_ymd_opt(digits(year)?, month, digits(day)?)?.and_hms_opt(hour, minute, second)
}

/// Parse the `Clock:\tMmm  DD YYYY\tHH:MM:SS` line of a `colq` reply.
pub fn parse_clock(line: &str) -> Result<NaiveDateTime, Error> {
    let invalid = || Error::invalid(format!("invalid clock {line:?}"));

    let fields = line.strip_prefix("Clock:\t").ok_or_else(invalid)?;
    let (date, time) = fields.split_once('\t').ok_or_else(invalid)?;

    parse_month_date(&format!("{date} {time}")).ok_or_else(invalid)
}

/// Parse the `Mmm  DD YYYY HH:MM:SS` clock of a Freedom Lite `mem` reply.
pub fn parse_clock_init(line: &str) -> Result<NaiveDateTime, Error> {
    parse_month_date(line).ok_or_else(|| Error::invalid(format!("invalid clock {line:?}")))
}

/// Identity reported by the `colq` command.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial_number: String,
    pub version: String,
    pub unit: Unit,
    pub clock: Option<NaiveDateTime>,
}

/// Parse the lines of a `colq` reply, which must end with `CMD OK`.
pub fn parse_colq<S: AsRef<str>>(lines: &[S]) -> Result<DeviceInfo, Error> {
    let mut info = DeviceInfo::default();

    for line in lines {
        let line = line.as_ref().trim_end_matches(['\r', '\n']);
        let fields: Vec<&str> = line.split('\t').collect();

        match fields[..] {
            ["S/N:", serial, ..] => info.serial_number = serial.to_owned(),
            ["Ver:", version, ref rest @ ..] => {
                info.version = version.to_owned();
                info.unit = match rest.first() {
                    Some(&"MMOL") => Unit::MmolL,
                    _ => Unit::MgDl,
                };
            }
            ["Clock:", ..] => info.clock = Some(parse_clock(line)?),
            ["CMD OK"] => return Ok(info),
            _ => {}
        }
    }

    Err(Error::ConnectionFailed("device information not terminated".to_owned()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingKind {
    Glucose,
    Ketone,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadingLine {
    /// `None` for readings above the meter range.
    pub value: Option<u16>,
    pub timestamp: NaiveDateTime,
    pub kind: ReadingKind,
}

impl ReadingLine {
    pub fn to_reading(&self) -> GlucoseReading {
        let value = self.value.map(f64::from).unwrap_or(f64::INFINITY);
        GlucoseReading::new(self.timestamp, value)
    }
}

/// Parse a memory line: `VVV  Mmm? DD YYYY HH:MM T 0x00`, where `VVV` is a
/// three digit value or `HI ` and `T` is `G` or `K`.
pub fn parse_reading_line(line: &str) -> Result<ReadingLine, Error> {
    let invalid = || Error::invalid(format!("invalid reading {line:?}"));

    if !line.is_ascii() || line.len() != 30 || &line[3..5] != "  " {
        Err(invalid())?
    }

    let value = match &line[..3] {
        "HI " => None,
        v => Some(digits(v).ok_or_else(invalid)?),
    };

    let timestamp = parse_month_date(&line[5..23]).ok_or_else(invalid)?;

    let kind = match &line[23..] {
        " G 0x00" => ReadingKind::Glucose,
        " K 0x00" => ReadingKind::Ketone,
        _ => Err(invalid())?,
    };

    Ok(ReadingLine {
        value,
        timestamp,
        kind,
    })
}

/// Parse a Freedom Lite memory line, of which only the value and timestamp
/// are meaningful.
pub fn parse_freedom_reading(line: &str) -> Result<GlucoseReading, Error> {
    let invalid = || Error::invalid(format!("invalid reading {line:?}"));

    let value: u16 = line
        .get(..3)
        .and_then(|v| digits(v.trim_start()))
        .ok_or_else(invalid)?;
    let timestamp = line
        .get(5..23)
        .and_then(parse_month_date)
        .ok_or_else(invalid)?;

    Ok(GlucoseReading::new(timestamp, value as f64))
}

/// Validate the `0xXXXX  END` trailer of an `xmem` dump, which carries the
/// sum of every preceding line including its CRLF terminator.
pub fn verify_memory_checksum<S: AsRef<str>>(lines: &[S], trailer: &str) -> Result<(), Error> {
    let found = trailer
        .strip_suffix("  END")
        .and_then(|c| c.strip_prefix("0x"))
        .filter(|c| c.len() == 4 && c.bytes().all(|b| b.is_ascii_hexdigit()))
        .and_then(|c| u32::from_str_radix(c, 16).ok())
        .ok_or_else(|| Error::invalid(format!("invalid trailer {trailer:?}")))?;

    let calculated = lines.iter().fold(0u32, |acc, line| {
        acc.wrapping_add(sum32(line.as_ref().as_bytes()) + 0x0D + 0x0A)
    });

    if found != calculated {
        Err(Error::InvalidChecksum {
            expected: found,
            calculated,
        })?
    }

    Ok(())
}

/// Memory dump returned by `xmem`.
#[derive(Debug)]
pub struct MemoryDump {
    pub lines: Vec<String>,
}

impl MemoryDump {
    /// Lines of the dump before its record count.
    pub const HEADER_LINES: usize = 5;

    /// Number of further lines announced by the header, trailer included.
    pub fn remaining<S: AsRef<str>>(header: &[S]) -> Result<usize, Error> {
        let count = header
            .get(Self::HEADER_LINES - 1)
            .map(|l| l.as_ref().trim())
            .and_then(digits::<usize>)
            .ok_or_else(|| Error::invalid("missing record count"))?;

        Ok(count + 1)
    }

    /// Validate the dump and parse its records.
    pub fn readings(&self) -> Result<Vec<ReadingLine>, Error> {
        let Some((trailer, lines)) = self.lines.split_last() else {
            Err(Error::invalid("empty memory dump"))?
        };

        let count = Self::remaining(lines)? - 1;
        if lines.len() != Self::HEADER_LINES + count {
            Err(Error::invalid(format!(
                "{count} records announced, {} received",
                lines.len().saturating_sub(Self::HEADER_LINES)
            )))?
        }

        verify_memory_checksum(lines, trailer)?;

        lines[Self::HEADER_LINES..]
            .iter()
            .map(|l| parse_reading_line(l))
            .collect()
    }
}
