//! LifeScan OneTouch binary drivers: the UltraEasy and Verio IQ over a
//! serial line, and the Verio (2015) and Select Plus over SCSI registers.

use std::io::{Read, Write};

use chrono::NaiveDateTime;
use log::{debug, info};

use super::{
    Driver, Readings, paged,
    transport::{BlockDevice, LineReader},
};
use crate::{
    Error, MeterInfo, Reading,
    sans::lifescan::{
        Link, Packet, PacketStart, Received, decode_register, encode_register, ultraeasy, verio,
        verioiq,
    },
};

/// Serial link shared by the UltraEasy and Verio IQ.
#[derive(Debug)]
struct Session<T> {
    port: LineReader<T>,
    link: Link,
}

impl<T: Read + Write> Session<T> {
    fn read_packet(&mut self) -> Result<Packet, Error> {
        let rest = PacketStart.advance(self.port.read_exact()?)?;
        let r = self.port.read_vec(rest.remaining())?;

        Ok(rest.advance(&r)?)
    }

    fn connect(&mut self) -> Result<(), Error> {
        let packet = self.link.connect()?;
        self.port.write_all(&packet)?;

        let response = self.read_packet()?;
        if let Received::Response { ack: Some(ack), .. } = self.link.receive(response)? {
            self.port.write_all(&ack)?;
        }

        info!("Link handshake completed");
        Ok(())
    }

    /// Send a request and wait for its response, skipping the meter's
    /// acknowledgement and acknowledging the response in turn.
    fn exchange(&mut self, message: &[u8]) -> Result<Vec<u8>, Error> {
        let packet = self.link.request(message)?;
        self.port.write_all(&packet)?;

        loop {
            let packet = self.read_packet()?;

            match self.link.receive(packet)? {
                Received::Acknowledged => debug!("Request acknowledged"),
                Received::Response { message, ack } => {
                    if let Some(ack) = ack {
                        self.port.write_all(&ack)?;
                    }

                    return Ok(message);
                }
            }
        }
    }
}

/// Driver of the OneTouch Ultra Easy (and Ultra Mini).
#[derive(Debug)]
pub struct UltraEasy<T> {
    session: Session<T>,
}

impl<T: Read + Write> UltraEasy<T> {
    pub fn new(port: T) -> Self {
        Self {
            session: Session {
                port: LineReader::new(port),
                link: Link::controlled(),
            },
        }
    }

    pub fn into_inner(self) -> T {
        self.session.port.into_inner()
    }

    fn record(&mut self, index: u16) -> Result<Reading, Error> {
        let response = self.session.exchange(&ultraeasy::read_record(index))?;
        ultraeasy::parse_record(&response).map(Reading::from)
    }
}

impl<T: Read + Write> Driver for UltraEasy<T> {
    fn connect(&mut self) -> Result<(), Error> {
        self.session.connect()
    }

    /// The link is closed by the same packet that opens it.
    fn disconnect(&mut self) -> Result<(), Error> {
        self.session.connect()
    }

    fn meter_info(&mut self) -> Result<MeterInfo, Error> {
        let serial_number =
            ultraeasy::parse_serial_number(&self.session.exchange(ultraeasy::SERIAL_NUMBER)?)?;
        let version = ultraeasy::parse_version(&self.session.exchange(ultraeasy::VERSION)?)?;
        let unit = ultraeasy::parse_glucose_unit(&self.session.exchange(ultraeasy::GLUCOSE_UNIT)?)?;

        Ok(MeterInfo::new("OneTouch Ultra Easy")
            .with_serial_number(serial_number)
            .with_version(format!("Software version: {version}"))
            .with_native_unit(unit))
    }

    fn datetime(&mut self) -> Result<NaiveDateTime, Error> {
        ultraeasy::parse_datetime(&self.session.exchange(ultraeasy::READ_RTC)?)
    }

    fn set_datetime(&mut self, t: NaiveDateTime) -> Result<NaiveDateTime, Error> {
        ultraeasy::parse_datetime(&self.session.exchange(&ultraeasy::write_rtc(t)?)?)
    }

    fn readings(&mut self) -> Result<Readings<'_>, Error> {
        let count = ultraeasy::parse_count(&self.session.exchange(ultraeasy::READING_COUNT)?)?;
        debug!("Meter holds {count} readings");

        Ok(paged((0..count).map(move |i| self.record(i))))
    }

    fn zero_log(&mut self) -> Result<(), Error> {
        ultraeasy::check_success(&self.session.exchange(ultraeasy::ZERO_LOG)?)
    }
}

/// Driver of the OneTouch Verio IQ, whose link carries no sequence bits.
#[derive(Debug)]
pub struct VerioIq<T> {
    session: Session<T>,
}

impl<T: Read + Write> VerioIq<T> {
    pub fn new(port: T) -> Self {
        Self {
            session: Session {
                port: LineReader::new(port),
                link: Link::fixed(),
            },
        }
    }

    pub fn into_inner(self) -> T {
        self.session.port.into_inner()
    }

    fn record(&mut self, index: u16) -> Result<Reading, Error> {
        let response = self.session.exchange(&verioiq::read_record(index))?;
        verioiq::parse_record(&response).map(Reading::from)
    }
}

impl<T: Read + Write> Driver for VerioIq<T> {
    fn meter_info(&mut self) -> Result<MeterInfo, Error> {
        let serial_number =
            verioiq::parse_serial_number(&self.session.exchange(verioiq::SERIAL_NUMBER)?)?;
        let version = verioiq::parse_version(&self.session.exchange(verioiq::VERSION)?)?;
        let unit = verioiq::parse_glucose_unit(&self.session.exchange(verioiq::GLUCOSE_UNIT)?)?;

        Ok(MeterInfo::new("OneTouch Verio IQ")
            .with_serial_number(serial_number)
            .with_version(format!("Software version: {version}"))
            .with_native_unit(unit))
    }

    fn datetime(&mut self) -> Result<NaiveDateTime, Error> {
        verioiq::parse_datetime(&self.session.exchange(verioiq::READ_RTC)?)
    }

    fn set_datetime(&mut self, t: NaiveDateTime) -> Result<NaiveDateTime, Error> {
        verioiq::parse_datetime(&self.session.exchange(&verioiq::write_rtc(t)?)?)
    }

    fn readings(&mut self) -> Result<Readings<'_>, Error> {
        let count = verioiq::parse_count(&self.session.exchange(verioiq::READING_COUNT)?)?;
        debug!("Meter holds {count} readings");

        Ok(paged((0..count).map(move |i| self.record(i))))
    }

    fn zero_log(&mut self) -> Result<(), Error> {
        verioiq::check_success(&self.session.exchange(verioiq::ZERO_LOG)?).map(|_| ())
    }
}

/// Driver of the OneTouch Verio (2015) and Select Plus, exchanging framed
/// messages through SCSI block registers.
#[derive(Debug)]
pub struct Verio<B> {
    device: B,
}

impl<B: BlockDevice> Verio<B> {
    pub fn new(device: B) -> Self {
        Self { device }
    }

    pub fn into_inner(self) -> B {
        self.device
    }

    /// Write a message to a register and read the response back from it.
    fn send(&mut self, message: &[u8], lba: u32) -> Result<Vec<u8>, Error> {
        self.device.write_block(lba, &encode_register(message)?)?;
        let r = self.device.read_block(lba)?;

        let response = decode_register(&r)?;
        debug!("Register {lba} answered {}", hex::encode(response));

        Ok(response.to_vec())
    }

    fn query(&mut self, selector: u8) -> Result<String, Error> {
        verio::parse_query(&self.send(&verio::query(selector), verio::COMMAND_LBA)?)
    }

    fn record(&mut self, index: u16) -> Result<Reading, Error> {
        let response = self.send(&verio::read_record(index), verio::COMMAND_LBA)?;
        verio::parse_record(&response).map(Reading::from)
    }
}

impl<B: BlockDevice> Driver for Verio<B> {
    fn connect(&mut self) -> Result<(), Error> {
        let vendor = self.device.vendor()?;

        if vendor.trim_end() != verio::VENDOR {
            Err(Error::ConnectionFailed(format!(
                "device vendor {vendor:?} is not LifeScan"
            )))?
        }

        Ok(())
    }

    fn meter_info(&mut self) -> Result<MeterInfo, Error> {
        let model = self.query(verio::QUERY_MODEL)?;
        let serial_number = self.query(verio::QUERY_SERIAL_NUMBER)?;
        let version = self.query(verio::QUERY_SOFTWARE_VERSION)?;
        let unit = verio::parse_glucose_unit(&self.send(verio::GLUCOSE_UNIT, verio::PARAMETER_LBA)?)?;

        Ok(MeterInfo::new(format!("OneTouch {model}"))
            .with_serial_number(serial_number)
            .with_version(format!("Software version: {version}"))
            .with_native_unit(unit))
    }

    fn datetime(&mut self) -> Result<NaiveDateTime, Error> {
        verio::parse_datetime(&self.send(verio::READ_RTC, verio::COMMAND_LBA)?)
    }

    /// The meter does not echo the new time, so the clock is read back.
    fn set_datetime(&mut self, t: NaiveDateTime) -> Result<NaiveDateTime, Error> {
        let response = self.send(&verio::write_rtc(t)?, verio::COMMAND_LBA)?;
        verio::check_success(&response)?;

        self.datetime()
    }

    fn readings(&mut self) -> Result<Readings<'_>, Error> {
        let count = verio::parse_count(&self.send(verio::READING_COUNT, verio::COMMAND_LBA)?)?;
        debug!("Meter holds {count} readings");

        Ok(paged((0..count).map(move |i| self.record(i))))
    }

    fn zero_log(&mut self) -> Result<(), Error> {
        verio::check_success(&self.send(verio::ZERO_LOG, verio::COMMAND_LBA)?).map(|_| ())
    }
}
