//! Menarini GlucoMen areo over a serial line.

use std::io::{Read, Write};

use chrono::{NaiveDateTime, Timelike};
use either::Either;
use log::{debug, warn};

use super::{Driver, Readings, transport::LineReader};
use crate::{
    Error, MeterInfo, Reading, Unit,
    sans::areo::{self, RawReading, TextResponse},
};

/// Driver of the GlucoMen areo.
#[derive(Debug)]
pub struct Areo<T> {
    port: LineReader<T>,
}

impl<T: Read + Write> Areo<T> {
    pub fn new(port: T) -> Self {
        Self {
            port: LineReader::new(port),
        }
    }

    pub fn into_inner(self) -> T {
        self.port.into_inner()
    }

    /// Send a command and collect the content of its bracketed response.
    fn command(&mut self, command: &[u8]) -> Result<Vec<Vec<u8>>, Error> {
        self.port.write_all(command)?;

        let mut response = TextResponse::new();

        loop {
            let line = self.port.read_until(b'\n')?;

            response = match response.advance(line)? {
                Either::Left(response) => response,
                Either::Right(lines) => return Ok(lines),
            };
        }
    }

    fn raw_readings(&mut self) -> Result<Vec<RawReading>, Error> {
        let readings = areo::parse_readings(&self.command(areo::GET_READINGS)?)?;

        if readings.is_empty() {
            debug!("No readings stored in the meter");
        }

        Ok(readings)
    }

    /// The meter has no unit setting of its own; the unit of its first
    /// glucose reading is taken, or mg/dL when it holds none.
    pub fn glucose_unit(&mut self) -> Result<Unit, Error> {
        Ok(self
            .raw_readings()?
            .iter()
            .find(|r| r.is_glucose())
            .map_or(Unit::MgDl, |r| r.unit))
    }
}

impl<T: Read + Write> Driver for Areo<T> {
    fn meter_info(&mut self) -> Result<MeterInfo, Error> {
        let info = areo::parse_info(&self.command(areo::GET_INFO)?)?;

        Ok(MeterInfo::new("GlucoMen areo")
            .with_serial_number(info.serial_number)
            .with_version(info.version)
            .with_native_unit(self.glucose_unit()?))
    }

    fn datetime(&mut self) -> Result<NaiveDateTime, Error> {
        Err(Error::NotImplemented("datetime"))
    }

    /// The meter acknowledges the new time with a single byte. Its clock
    /// has no seconds.
    fn set_datetime(&mut self, t: NaiveDateTime) -> Result<NaiveDateTime, Error> {
        self.port.write_all(&areo::set_datetime(t))?;

        let [response] = self.port.read_exact()?;
        if response != areo::DATETIME_ACCEPTED {
            Err(Error::invalid(format!("unexpected response {response:#04x}")))?
        }

        t.with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .ok_or(Error::InvalidDateTime)
    }

    fn readings(&mut self) -> Result<Readings<'_>, Error> {
        let readings = self.raw_readings()?.into_iter().filter_map(|r| {
            if r.is_glucose() {
                Some(Ok(Reading::from(r.to_reading())))
            } else {
                warn!("Skipping unsupported reading type {:?}", r.reading_type);
                None
            }
        });

        Ok(Box::new(readings))
    }

    fn zero_log(&mut self) -> Result<(), Error> {
        Err(Error::NotImplemented("zero log"))
    }
}
