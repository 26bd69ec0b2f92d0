//! Bayer and Ascensia Contour meters over HID.
//!
//! The original Bayer Contour pushes a single LIS2-A2 message on connection.
//! The Contour USB and Contour Next One are polled: an EOT probe returns the
//! header record, and a download session returns every stored result.

use chrono::NaiveDateTime;
use either::Either;
use log::{debug, info};

use super::{Driver, Readings, transport::HidDevice};
use crate::{
    Error, GlucoseReading, MeterInfo, Reading, Unit,
    sans::{
        contour::{self, Block, Dialect, Header, Sync},
        lis::{self, ACK, EOT, Establishment},
    },
};

/// HID device carrying LIS1-A traffic in tagged reports.
#[derive(Debug)]
struct Session<H> {
    device: H,
}

impl<H: HidDevice> Session<H> {
    fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        self.device.write_report(&contour::encode_report(data)?)
    }

    fn read_block(&mut self) -> Result<Vec<u8>, Error> {
        let mut block = Block::new();

        loop {
            let r = self.device.read_report()?;

            block = match block.advance(&r)? {
                Either::Left(block) => block,
                Either::Right(data) => return Ok(data),
            };
        }
    }
}

/// Driver of the Bayer Contour, which transfers its whole memory as soon as
/// the host is connected.
#[derive(Debug)]
pub struct BayerContour<H> {
    session: Session<H>,
    message: Option<lis::Message>,
}

impl<H: HidDevice> BayerContour<H> {
    pub fn new(device: H) -> Self {
        Self {
            session: Session { device },
            message: None,
        }
    }

    pub fn into_inner(self) -> H {
        self.session.device
    }

    fn message(&self) -> Result<&lis::Message, Error> {
        self.message.as_ref().ok_or(Error::NotConnected)
    }
}

impl<H: HidDevice> Driver for BayerContour<H> {
    fn connect(&mut self) -> Result<(), Error> {
        let mut transfer = Establishment.advance(&self.session.read_block()?)?;
        self.session.write(&[ACK])?;

        let termination = loop {
            let next = transfer.advance(&self.session.read_block()?)?;
            self.session.write(&[ACK])?;

            transfer = match next {
                Either::Left(transfer) => transfer,
                Either::Right(termination) => break termination,
            };
        };

        let text = termination.advance(&self.session.read_block()?)?;
        let message = lis::parse_message(&text)?;

        info!(
            "Received {} readings from meter {}",
            message.readings.len(),
            message.serial_number
        );
        self.message = Some(message);

        Ok(())
    }

    fn meter_info(&mut self) -> Result<MeterInfo, Error> {
        let message = self.message()?;

        Ok(MeterInfo::new("Bayer Contour")
            .with_serial_number(message.serial_number.clone())
            .with_version(format!("Software version: {}", message.version))
            .with_native_unit(message.unit.unwrap_or(Unit::MmolL)))
    }

    fn datetime(&mut self) -> Result<NaiveDateTime, Error> {
        Err(Error::NotImplemented("datetime"))
    }

    fn set_datetime(&mut self, _: NaiveDateTime) -> Result<NaiveDateTime, Error> {
        Err(Error::NotImplemented("set datetime"))
    }

    fn readings(&mut self) -> Result<Readings<'_>, Error> {
        let readings: Vec<GlucoseReading> = self.message()?.readings.clone();
        Ok(Box::new(readings.into_iter().map(|r| Ok(Reading::from(r)))))
    }

    fn zero_log(&mut self) -> Result<(), Error> {
        Err(Error::NotImplemented("zero log"))
    }
}

/// Driver of the Contour USB and Contour Next One.
#[derive(Debug)]
pub struct ContourUsb<H> {
    session: Session<H>,
    dialect: Dialect,
    header: Option<Header>,
}

impl<H: HidDevice> ContourUsb<H> {
    pub fn new(device: H, dialect: Dialect) -> Self {
        Self {
            session: Session { device },
            dialect,
            header: None,
        }
    }

    pub fn into_inner(self) -> H {
        self.session.device
    }

    /// Probe the meter with EOT until it answers with its header record.
    fn fetch_header(&mut self) -> Result<&Header, Error> {
        for attempt in 1..=contour::MAX_INFO_ATTEMPTS {
            self.session.write(&[EOT])?;

            if let Some(header) = contour::parse_info(&self.session.read_block()?)? {
                debug!("Header received after {attempt} probes");
                return Ok(self.header.insert(header));
            }
        }

        Err(Error::ConnectionFailed(format!(
            "no header after {} probes",
            contour::MAX_INFO_ATTEMPTS
        )))
    }

    fn model(&self) -> &'static str {
        match self.dialect {
            Dialect::ContourUsb => "Contour USB",
            Dialect::NextOne => "Contour Next One",
        }
    }
}

impl<H: HidDevice> Driver for ContourUsb<H> {
    fn meter_info(&mut self) -> Result<MeterInfo, Error> {
        let model = self.model();
        let header = self.fetch_header()?;

        Ok(MeterInfo::new(model)
            .with_serial_number(header.serial_number.clone())
            .with_version(format!("Meter versions: {}", header.version()))
            .with_native_unit(header.unit))
    }

    /// Clock reported by the last header record.
    fn datetime(&mut self) -> Result<NaiveDateTime, Error> {
        if let Some(header) = &self.header {
            return Ok(header.datetime);
        }

        Ok(self.fetch_header()?.datetime)
    }

    fn set_datetime(&mut self, _: NaiveDateTime) -> Result<NaiveDateTime, Error> {
        Err(Error::NotImplemented("set datetime"))
    }

    fn readings(&mut self) -> Result<Readings<'_>, Error> {
        let (sync, first) = Sync::new(self.dialect);
        self.session.write(&[first])?;

        let session = &mut self.session;
        let mut sync = Some(sync);

        Ok(Box::new(std::iter::from_fn(move || {
            loop {
                let current = sync.take()?;

                let block = match session.read_block() {
                    Ok(block) => block,
                    Err(e) => return Some(Err(e)),
                };

                match current.advance(&block) {
                    Either::Left((next, step)) => {
                        sync = Some(next);

                        if let Err(e) = session.write(&[step.reply]) {
                            return Some(Err(e));
                        }

                        if let Some(record) = step.record.filter(|r| r.starts_with('R')) {
                            return Some(contour::parse_result(&record).map(Reading::from));
                        }
                    }
                    Either::Right(last) => {
                        debug!("Download session ended");
                        return last.and_then(|b| session.write(&[b]).err().map(Err));
                    }
                }
            }
        })))
    }

    fn zero_log(&mut self) -> Result<(), Error> {
        Err(Error::NotImplemented("zero log"))
    }
}
