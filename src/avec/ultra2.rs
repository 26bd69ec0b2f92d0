//! OneTouch Ultra 2 over a serial line.

use std::io::{Read, Write};

use chrono::NaiveDateTime;
use log::debug;

use super::{Driver, Readings, paged, transport::LineReader};
use crate::{Error, MeterInfo, Reading, Unit, sans::ultra2};

/// Driver of the OneTouch Ultra 2.
#[derive(Debug)]
pub struct Ultra2<T> {
    port: LineReader<T>,
}

impl<T: Read + Write> Ultra2<T> {
    pub fn new(port: T) -> Self {
        Self {
            port: LineReader::new(port),
        }
    }

    pub fn into_inner(self) -> T {
        self.port.into_inner()
    }

    fn read_line(&mut self) -> Result<String, Error> {
        let line = self.port.read_until(b'\n')?;
        let line = String::from_utf8(line)
            .map_err(|e| Error::invalid(format!("non-ASCII response {:?}", e.as_bytes())))?;

        Ok(ultra2::strip_checksum(&line)?.to_owned())
    }

    /// Send a command and read its one-line response, checksum stripped.
    fn command(&mut self, command: &str) -> Result<String, Error> {
        self.port.write_all(&ultra2::encode_command(command))?;
        self.read_line()
    }

    pub fn version(&mut self) -> Result<String, Error> {
        ultra2::parse_version(&self.command(ultra2::VERSION)?)
    }

    pub fn serial_number(&mut self) -> Result<String, Error> {
        ultra2::parse_serial_number(&self.command(ultra2::SERIAL_NUMBER)?)
    }

    pub fn glucose_unit(&mut self) -> Result<Unit, Error> {
        ultra2::parse_glucose_unit(&self.command(ultra2::GLUCOSE_UNIT)?)
    }
}

impl<T: Read + Write> Driver for Ultra2<T> {
    fn meter_info(&mut self) -> Result<MeterInfo, Error> {
        Ok(MeterInfo::new("OneTouch Ultra 2")
            .with_serial_number(self.serial_number()?)
            .with_version(format!("Software version: {}", self.version()?))
            .with_native_unit(self.glucose_unit()?))
    }

    fn datetime(&mut self) -> Result<NaiveDateTime, Error> {
        ultra2::parse_datetime(&self.command(ultra2::READ_DATETIME)?)
    }

    fn set_datetime(&mut self, t: NaiveDateTime) -> Result<NaiveDateTime, Error> {
        ultra2::parse_datetime(&self.command(&ultra2::set_datetime(t))?)
    }

    /// The dump is a single response: a header announcing the count, then
    /// one line per reading, each with its own checksum.
    fn readings(&mut self) -> Result<Readings<'_>, Error> {
        let count = ultra2::parse_dump_header(&self.command(ultra2::DUMP)?)?;
        debug!("Dump announces {count} readings");

        Ok(paged((0..count).map(move |_| {
            let line = self.read_line()?;
            ultra2::parse_dump_record(&line).map(Reading::from)
        })))
    }

    fn zero_log(&mut self) -> Result<(), Error> {
        let response = self.command(ultra2::ZERO_LOG)?;

        if response != "Z" {
            Err(Error::invalid(format!("unexpected response {response:?}")))?
        }

        Ok(())
    }
}
