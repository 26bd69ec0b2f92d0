//! TaiDoc TD-42xx meters over a serial bridge.

use std::io::{Read, Write};

use chrono::NaiveDateTime;
use log::info;

use super::{Driver, Readings, paged, transport::LineReader};
use crate::{
    Error, GlucoseReading, MeterInfo, Reading,
    sans::taidoc::{self, EMPTY_MESSAGE, Packet},
};

/// Driver of the TaiDoc TD-4277 and its siblings.
#[derive(Debug)]
pub struct Td42xx<T> {
    port: LineReader<T>,
    model: Option<String>,
}

impl<T: Read + Write> Td42xx<T> {
    pub fn new(port: T) -> Self {
        Self {
            port: LineReader::new(port),
            model: None,
        }
    }

    pub fn into_inner(self) -> T {
        self.port.into_inner()
    }

    fn exchange(&mut self, command: u8, message: [u8; 4]) -> Result<Packet, Error> {
        self.port.write_all(&Packet::new(command, message).encode())?;
        Ok(Packet::decode(self.port.read_exact()?)?)
    }

    /// Send a command, returning the message of the matching response.
    fn command(&mut self, command: u8, message: [u8; 4]) -> Result<[u8; 4], Error> {
        let response = self.exchange(command, message)?;

        if response.command != command {
            Err(Error::invalid(format!(
                "response to command {command:#04x} carries command {:#04x}",
                response.command
            )))?
        }

        Ok(response.message)
    }

    pub fn model(&mut self) -> Result<String, Error> {
        let message = self.command(taidoc::GET_MODEL, EMPTY_MESSAGE)?;
        Ok(taidoc::parse_model(message))
    }

    fn record(&mut self, id: u16) -> Result<Reading, Error> {
        let timestamp = taidoc::parse_datetime(
            self.command(taidoc::GET_READING_DATETIME, taidoc::select_record(id))?,
        )?;
        let (value, meal) = taidoc::parse_value(
            self.command(taidoc::GET_READING_VALUE, taidoc::select_record(id))?,
        )?;

        Ok(GlucoseReading::new(timestamp, value as f64)
            .with_meal(meal)
            .into())
    }
}

impl<T: Read + Write> Driver for Td42xx<T> {
    fn connect(&mut self) -> Result<(), Error> {
        let response = self.exchange(taidoc::CONNECT, EMPTY_MESSAGE)?;

        if !taidoc::CONNECT_RESPONSES.contains(&response.command) {
            Err(Error::ConnectionFailed(format!(
                "invalid response {:#04x} {}",
                response.command,
                hex::encode(response.message)
            )))?
        }

        let model = self.model()?;
        info!("Connected to {model}");
        self.model = Some(model);

        Ok(())
    }

    fn meter_info(&mut self) -> Result<MeterInfo, Error> {
        let model = match self.model.clone() {
            Some(model) => model,
            None => self.model()?,
        };

        Ok(MeterInfo::new(format!("TaiDoc {model} glucometer")))
    }

    fn datetime(&mut self) -> Result<NaiveDateTime, Error> {
        taidoc::parse_datetime(self.command(taidoc::GET_DATETIME, EMPTY_MESSAGE)?)
    }

    fn set_datetime(&mut self, t: NaiveDateTime) -> Result<NaiveDateTime, Error> {
        let message = self.command(taidoc::SET_DATETIME, taidoc::encode_datetime(t)?)?;
        taidoc::parse_datetime(message)
    }

    fn readings(&mut self) -> Result<Readings<'_>, Error> {
        let count = taidoc::parse_count(self.command(taidoc::GET_READING_COUNT, EMPTY_MESSAGE)?);

        Ok(paged((0..count).map(move |id| self.record(id))))
    }

    fn zero_log(&mut self) -> Result<(), Error> {
        self.command(taidoc::CLEAR_MEMORY, EMPTY_MESSAGE)?;
        Ok(())
    }
}
