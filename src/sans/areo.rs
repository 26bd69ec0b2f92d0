//! GlucoMen areo text responses.
//!
//! Commands are single bytes. Responses are CRLF-terminated lines enclosed
//! between `[` and `]` lines, the line before the closing bracket carrying
//! the CRC-8/MAXIM of everything above it as two hex digits.

use chrono::NaiveDateTime;
use either::Either;

use super::check::crc8_maxim;
use crate::{Error, GlucoseReading, Meal, Unit};

pub const GET_INFO: &[u8] = &[0xA2];
pub const GET_READINGS: &[u8] = &[0x80];
const SET_DATETIME: &[u8] = &[0xC2, 0xA1];

/// Sole content line of a readings response when the memory is empty.
pub const NO_READINGS: &[u8] = &[0x90, 0x3D];

/// Single-byte reply acknowledging a clock change.
pub const DATETIME_ACCEPTED: u8 = b'P';

/// Command setting the clock, to the minute.
pub fn set_datetime(t: NaiveDateTime) -> Vec<u8> {
    let mut body = b"[\r\n".to_vec();
    body.extend(t.format("%y%m%d%H%M\r\n").to_string().into_bytes());

    let checksum = crc8_maxim(&body);

    let mut r = SET_DATETIME.to_vec();
    r.extend(body);
    r.extend(format!("{checksum:02X}\r\n]\r\n").into_bytes());
    r
}

/// State token accumulating the lines of a bracketed response.
#[derive(Debug, Default)]
pub struct TextResponse {
    lines: Vec<Vec<u8>>,
}

impl TextResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a received line, terminator included. Returns the content lines,
    /// stripped of their terminators, once the closing bracket arrives.
    pub fn advance(mut self, line: Vec<u8>) -> Result<Either<Self, Vec<Vec<u8>>>, Error> {
        if !line.ends_with(b"\r\n") {
            Err(Error::invalid(format!(
                "corrupted response line {}",
                String::from_utf8_lossy(&line)
            )))?
        }

        let closing = line == b"]\r\n";
        self.lines.push(line);

        if closing {
            self.finish().map(Either::Right)
        } else {
            Ok(Either::Left(self))
        }
    }

    fn finish(self) -> Result<Vec<Vec<u8>>, Error> {
        let lines = self.lines;

        if lines.len() < 3 || lines[0] != b"[\r\n" {
            Err(Error::invalid("response not opened by a bracket"))?
        }

        let checksum_line = &lines[lines.len() - 2];
        let found = std::str::from_utf8(&checksum_line[..checksum_line.len() - 2])
            .ok()
            .and_then(|c| u8::from_str_radix(c, 16).ok())
            .ok_or_else(|| {
                Error::MissingChecksum(String::from_utf8_lossy(checksum_line).into_owned())
            })?;
        let calculated = crc8_maxim(&lines[..lines.len() - 2].concat());

        if found != calculated {
            Err(Error::InvalidChecksum {
                expected: found as u32,
                calculated: calculated as u32,
            })?
        }

        let content = lines.len() - 2;
        Ok(lines
            .into_iter()
            .take(content)
            .skip(1)
            .map(|mut l| {
                l.truncate(l.len() - 2);
                l
            })
            .collect())
    }
}

/// Identity fields of the info response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub serial_number: String,
    pub version: String,
}

pub fn parse_info(lines: &[Vec<u8>]) -> Result<Info, Error> {
    let [line] = lines else {
        Err(Error::invalid(format!(
            "{} info lines received, one expected",
            lines.len()
        )))?
    };

    let line = std::str::from_utf8(line).map_err(|_| Error::invalid("non-ASCII info line"))?;

    let [_, _, _, serial, version] = line.split(',').collect::<Vec<_>>()[..] else {
        Err(Error::invalid(format!("incomplete info response {line:?}")))?
    };

    Ok(Info {
        serial_number: serial.trim().to_owned(),
        version: version.trim().to_owned(),
    })
}

/// Stored measurement: `type,value,unit,marking,yymmdd,HHMM`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    pub reading_type: String,
    pub value: f64,
    pub unit: Unit,
    pub meal: Meal,
    pub comment: &'static str,
    pub timestamp: NaiveDateTime,
}

impl RawReading {
    pub fn is_glucose(&self) -> bool {
        self.reading_type == "Glu"
    }

    pub fn to_reading(&self) -> GlucoseReading {
        GlucoseReading::from_unit(self.timestamp, self.value, self.unit)
            .with_meal(self.meal)
            .with_comment(self.comment)
    }
}

pub fn parse_reading(line: &[u8]) -> Result<RawReading, Error> {
    let line = std::str::from_utf8(line).map_err(|_| Error::invalid("non-ASCII reading"))?;
    let invalid = || Error::invalid(format!("invalid reading {line:?}"));

    let [reading_type, value, unit, marking, date, time] = line.split(',').collect::<Vec<_>>()[..]
    else {
        Err(invalid())?
    };

    let unit = match unit {
        "mg/dL" => Unit::MgDl,
        "mmol/L" => Unit::MmolL,
        other => Err(Error::InvalidGlucoseUnit(other.to_owned()))?,
    };

    let (meal, comment) = match marking {
        "00" => (Meal::None, ""),
        "01" => (Meal::None, "Check Mark"),
        "02" => (Meal::Before, ""),
        "04" => (Meal::After, ""),
        "08" => (Meal::None, "Exercise"),
        _ => Err(invalid())?,
    };

    let timestamp = NaiveDateTime::parse_from_str(&format!("{date},{time}"), "%y%m%d,%H%M")
        .map_err(|_| Error::InvalidDateTime)?;

    Ok(RawReading {
        reading_type: reading_type.to_owned(),
        value: value.trim().parse().map_err(|_| invalid())?,
        unit,
        meal,
        comment,
        timestamp,
    })
}

/// Parse the content of a readings response, which may report an empty
/// memory.
pub fn parse_readings(lines: &[Vec<u8>]) -> Result<Vec<RawReading>, Error> {
    if lines.first().is_some_and(|l| l == NO_READINGS) {
        return Ok(Vec::new());
    }

    lines.iter().map(|l| parse_reading(l)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(lines: &[&[u8]]) -> Result<Vec<Vec<u8>>, Error> {
        let mut response = TextResponse::new();

        for line in lines {
            response = match response.advance(line.to_vec())? {
                Either::Left(response) => response,
                Either::Right(content) => return Ok(content),
            };
        }

        panic!("response not terminated");
    }

    fn with_checksum(content: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut lines: Vec<Vec<u8>> = vec![b"[\r\n".to_vec()];
        lines.extend(content.iter().map(|l| l.to_vec()));

        let checksum = crc8_maxim(&lines.concat());
        lines.push(format!("{checksum:02X}\r\n").into_bytes());
        lines.push(b"]\r\n".to_vec());
        lines
    }

    #[test]
    fn parses_info_response() {
        let lines = with_checksum(&[b"GlucoMen areo,1,2,SN12345 ,V1.02\r\n"]);
        let lines: Vec<&[u8]> = lines.iter().map(Vec::as_slice).collect();

        let info = parse_info(&feed(&lines).unwrap()).unwrap();
        assert_eq!(info.serial_number, "SN12345");
        assert_eq!(info.version, "V1.02");
    }

    #[test]
    fn rejects_corrupt_checksum() {
        let mut lines = with_checksum(&[b"Glu,5.5,mmol/L,02,200101,0830\r\n"]);
        lines[1][4] = b'6';
        let lines: Vec<&[u8]> = lines.iter().map(Vec::as_slice).collect();

        assert!(matches!(
            feed(&lines),
            Err(Error::InvalidChecksum { .. })
        ));
    }

    #[test]
    fn rejects_unterminated_lines() {
        assert!(TextResponse::new().advance(b"[\n".to_vec()).is_err());
    }

    #[test]
    fn parses_readings() {
        let readings = parse_readings(&[
            b"Glu,5.5,mmol/L,02,200101,0830".to_vec(),
            b"Ket,0.5,mmol/L,00,200101,0845".to_vec(),
        ])
        .unwrap();

        assert!(readings[0].is_glucose());
        assert!(!readings[1].is_glucose());

        let reading = readings[0].to_reading();
        assert_eq!(reading.value, 99.0);
        assert_eq!(reading.meal, Meal::Before);
        assert_eq!(reading.timestamp.to_string(), "2020-01-01 08:30:00");

        assert!(parse_readings(&[NO_READINGS.to_vec()]).unwrap().is_empty());
    }

    #[test]
    fn builds_set_datetime_command() {
        let t = NaiveDateTime::parse_from_str("2020-01-02 03:04", "%Y-%m-%d %H:%M").unwrap();
        let command = set_datetime(t);

        assert!(command.starts_with(b"\xC2\xA1[\r\n2001020304\r\n"));
        assert!(command.ends_with(b"\r\n]\r\n"));
    }
}
