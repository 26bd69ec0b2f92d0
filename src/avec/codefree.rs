//! SD CodeFree over a serial line.
//!
//! The meter drives the session: every exchange starts with the meter
//! sending a challenge once the user selects the transfer mode.

use std::io::{Read, Write};

use chrono::{NaiveDateTime, Timelike};
use either::Either;
use log::{debug, info};

use super::{Driver, Readings, paged, transport::LineReader};
use crate::{
    Error, MeterInfo, Reading, Unit,
    sans::codefree::{self, Challenge, FrameStart},
};

/// Driver of the SD CodeFree.
#[derive(Debug)]
pub struct CodeFree<T> {
    port: LineReader<T>,
}

impl<T: Read + Write> CodeFree<T> {
    pub fn new(port: T) -> Self {
        Self {
            port: LineReader::new(port),
        }
    }

    pub fn into_inner(self) -> T {
        self.port.into_inner()
    }

    fn send(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.port.write_all(&codefree::encode_frame(payload)?)
    }

    fn receive(&mut self) -> Result<Vec<u8>, Error> {
        let rest = FrameStart.advance(self.port.read_exact()?)?;
        let r = self.port.read_vec(rest.remaining())?;

        Ok(rest.advance(&r)?)
    }

    fn expect(&mut self, expected: &[u8]) -> Result<(), Error> {
        let payload = self.receive()?;

        if payload != expected {
            Err(Error::invalid(format!(
                "unexpected response {}",
                hex::encode(&payload)
            )))?
        }

        Ok(())
    }

    /// Answer the meter's challenge, returning the number of stored
    /// readings it announces.
    fn wait_and_ready(&mut self) -> Result<u16, Error> {
        let mut challenge = Challenge;

        let rest = loop {
            let [byte] = self.port.read_exact()?;

            challenge = match challenge.advance(byte)? {
                Either::Left(challenge) => challenge,
                Either::Right(rest) => break rest,
            };
        };

        let first = rest.advance(self.port.read_exact()?)?;
        self.send(codefree::CHALLENGE_RESPONSE)?;

        let count = first.advance(&self.receive()?)?;
        info!("Meter ready with {count} readings");

        Ok(count)
    }

    fn fetch(&mut self) -> Result<Reading, Error> {
        self.send(codefree::FETCH)?;
        codefree::parse_reading(&self.receive()?).map(Reading::from)
    }
}

impl<T: Read + Write> Driver for CodeFree<T> {
    fn disconnect(&mut self) -> Result<(), Error> {
        self.send(codefree::DISCONNECT)?;
        self.expect(codefree::DISCONNECTED)
    }

    fn meter_info(&mut self) -> Result<MeterInfo, Error> {
        Ok(MeterInfo::new("SD CodeFree glucometer").with_native_unit(Unit::MgDl))
    }

    fn datetime(&mut self) -> Result<NaiveDateTime, Error> {
        Err(Error::NotImplemented("datetime"))
    }

    /// The meter keeps the time to the minute, which is what is returned.
    fn set_datetime(&mut self, t: NaiveDateTime) -> Result<NaiveDateTime, Error> {
        let count = self.wait_and_ready()?;
        debug!("Ignoring count of {count} readings");

        self.send(&codefree::set_datetime(t))?;
        self.expect(codefree::DATE_SET)?;

        t.with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .ok_or(Error::InvalidDateTime)
    }

    fn readings(&mut self) -> Result<Readings<'_>, Error> {
        let count = self.wait_and_ready()?;

        Ok(paged((0..count).map(move |_| self.fetch())))
    }

    fn zero_log(&mut self) -> Result<(), Error> {
        Err(Error::NotImplemented("zero log"))
    }
}
