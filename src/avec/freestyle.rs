//! Abbott FreeStyle meters speaking the shared HID protocol: the Libre,
//! Libre 2, Precision Neo and InsuLinx.

use chrono::NaiveDateTime;
use csv::StringRecord;
use either::Either;
use log::{debug, info};

use super::{Driver, Readings, transport::HidDevice};
use crate::{
    Error, MeterInfo, Reading, Unit,
    sans::{
        freestyle::{self, Incoming, ReportCipher, TextReply},
        libre,
    },
};

/// HID session exchanging text commands with a FreeStyle meter.
pub struct Session<H> {
    device: H,
    text_command: u8,
    cipher: Option<Box<dyn ReportCipher>>,
}

impl<H> std::fmt::Debug for Session<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("text_command", &self.text_command)
            .field("encrypted", &self.cipher.is_some())
            .finish_non_exhaustive()
    }
}

impl<H: HidDevice> Session<H> {
    pub fn new(device: H, text_command: u8) -> Self {
        Self {
            device,
            text_command,
            cipher: None,
        }
    }

    /// Encrypt the session's reports with an established cipher.
    pub fn with_cipher(mut self, cipher: Box<dyn ReportCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn into_inner(self) -> H {
        self.device
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn send(&mut self, message_type: u8, payload: &[u8]) -> Result<(), Error> {
        let report = match &mut self.cipher {
            Some(cipher) => freestyle::encode_encrypted_report(message_type, payload, cipher.as_mut())?,
            None => freestyle::encode_report(message_type, payload)?,
        };

        self.device.write_report(&report)
    }

    /// Read the next message, skipping keep-alive reports.
    pub fn receive(&mut self) -> Result<(u8, Vec<u8>), Error> {
        loop {
            let r = self.device.read_report()?;

            let (message_type, payload) = match &mut self.cipher {
                Some(cipher) => freestyle::decode_encrypted_report(&r, cipher.as_mut())?,
                None => freestyle::decode_report(&r).map(|(t, p)| (t, p.to_vec()))?,
            };

            match freestyle::classify(message_type, &payload)? {
                Incoming::KeepAlive => debug!("Skipping keep-alive report"),
                Incoming::Message(..) => return Ok((message_type, payload)),
            }
        }
    }

    /// Knock on the meter with an INIT message.
    pub fn connect(&mut self) -> Result<(), Error> {
        self.send(freestyle::INIT, &[])?;

        let (message_type, payload) = self.receive()?;
        freestyle::check_init_reply(message_type, &payload)?;

        info!("FreeStyle session initialized");
        Ok(())
    }

    /// Send a text command, returning its verified reply.
    pub fn text_command(&mut self, command: &str) -> Result<String, Error> {
        self.send(self.text_command, command.as_bytes())?;

        let mut reply = TextReply::new(freestyle::TEXT_REPLY);

        loop {
            let (message_type, payload) = self.receive()?;

            reply = match reply.advance(message_type, &payload)? {
                Either::Left(reply) => reply,
                Either::Right(message) => return Ok(message),
            };
        }
    }

    pub fn multirecord(&mut self, command: &str) -> Result<Vec<StringRecord>, Error> {
        freestyle::parse_multirecord(&self.text_command(command)?)
    }

    pub fn datetime(&mut self) -> Result<NaiveDateTime, Error> {
        let date = self.text_command(freestyle::DATE)?;
        let time = self.text_command(freestyle::TIME)?;

        freestyle::parse_datetime(&date, &time)
    }

    pub fn set_datetime(&mut self, t: NaiveDateTime) -> Result<NaiveDateTime, Error> {
        self.text_command(&freestyle::set_date(t))?;
        self.text_command(&freestyle::set_time(t))?;

        self.datetime()
    }
}

/// Meters of the FreeStyle HID family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    Libre,
    /// Libre 2, which requires an encrypted session.
    Libre2,
    PrecisionNeo,
    InsuLinx,
}

impl Model {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Libre => "FreeStyle Libre",
            Self::Libre2 => "FreeStyle Libre 2",
            Self::PrecisionNeo => "FreeStyle Precision Neo",
            Self::InsuLinx => "FreeStyle InsuLinx",
        }
    }

    fn is_libre(&self) -> bool {
        matches!(self, Self::Libre | Self::Libre2)
    }

    fn text_command(&self) -> u8 {
        if self.is_libre() {
            freestyle::LIBRE_TEXT_COMMAND
        } else {
            freestyle::TEXT_COMMAND
        }
    }
}

/// Driver of the FreeStyle HID meters.
#[derive(Debug)]
pub struct FreeStyle<H> {
    model: Model,
    session: Session<H>,
}

impl<H: HidDevice> FreeStyle<H> {
    pub fn new(device: H, model: Model) -> Self {
        Self {
            model,
            session: Session::new(device, model.text_command()),
        }
    }

    pub fn with_cipher(self, cipher: Box<dyn ReportCipher>) -> Self {
        Self {
            model: self.model,
            session: self.session.with_cipher(cipher),
        }
    }

    pub fn into_inner(self) -> H {
        self.session.into_inner()
    }

    pub fn serial_number(&mut self) -> Result<String, Error> {
        let command = if self.model.is_libre() {
            freestyle::LIBRE_SERIAL_NUMBER
        } else {
            freestyle::SERIAL_NUMBER
        };

        let reply = self.session.text_command(command)?;
        Ok(freestyle::reply_line(&reply).to_owned())
    }

    pub fn version(&mut self) -> Result<String, Error> {
        let reply = self.session.text_command(freestyle::VERSION)?;
        Ok(freestyle::reply_line(&reply).to_owned())
    }

    pub fn glucose_unit(&mut self) -> Result<Unit, Error> {
        if self.model.is_libre() {
            libre::parse_unit(&self.session.text_command(freestyle::UNIT)?)
        } else {
            Ok(Unit::MgDl)
        }
    }

    fn libre_readings(&mut self) -> Result<Readings<'_>, Error> {
        let history = self
            .session
            .multirecord(freestyle::HISTORY)?
            .into_iter()
            .filter_map(|r| libre::parse_history(&r).transpose())
            .map(|r| r.map(Reading::from));

        let session = &mut self.session;
        let results = std::iter::once_with(move || session.multirecord(freestyle::ARRESULT))
            .flat_map(|records| match records {
                Ok(records) => records
                    .iter()
                    .filter_map(|r| libre::parse_arresult(r).transpose())
                    .collect(),
                Err(e) => vec![Err(e)],
            });

        Ok(Box::new(history.chain(results)))
    }
}

impl<H: HidDevice> Driver for FreeStyle<H> {
    fn connect(&mut self) -> Result<(), Error> {
        if self.model == Model::Libre2 && !self.session.is_encrypted() {
            Err(Error::NotImplemented("unencrypted FreeStyle Libre 2 session"))?
        }

        self.session.connect()
    }

    fn meter_info(&mut self) -> Result<MeterInfo, Error> {
        let info = MeterInfo::new(self.model.name())
            .with_serial_number(self.serial_number()?)
            .with_version(format!("Software version: {}", self.version()?))
            .with_native_unit(self.glucose_unit()?);

        if self.model.is_libre() {
            Ok(info.with_patient_name(self.patient_name()?))
        } else {
            Ok(info)
        }
    }

    fn datetime(&mut self) -> Result<NaiveDateTime, Error> {
        self.session.datetime()
    }

    fn set_datetime(&mut self, t: NaiveDateTime) -> Result<NaiveDateTime, Error> {
        self.session.set_datetime(t)
    }

    fn readings(&mut self) -> Result<Readings<'_>, Error> {
        match self.model {
            Model::Libre | Model::Libre2 => self.libre_readings(),
            Model::PrecisionNeo => {
                let records = self.session.multirecord(freestyle::RESULT)?;

                Ok(Box::new(
                    records
                        .into_iter()
                        .filter_map(|r| libre::parse_neo_result(&r).transpose()),
                ))
            }
            Model::InsuLinx => {
                let records = self.session.multirecord(freestyle::RESULT)?;

                Ok(Box::new(records.into_iter().filter_map(|r| {
                    libre::parse_insulinx_result(&r)
                        .transpose()
                        .map(|r| r.map(Reading::from))
                })))
            }
        }
    }

    fn zero_log(&mut self) -> Result<(), Error> {
        if !self.model.is_libre() {
            Err(Error::NotImplemented("zero log"))?
        }

        self.session.text_command(freestyle::RESET_PATIENT)?;
        Ok(())
    }

    fn patient_name(&mut self) -> Result<Option<String>, Error> {
        if !self.model.is_libre() {
            Err(Error::NotImplemented("patient name"))?
        }

        let reply = self.session.text_command(freestyle::PATIENT_NAME)?;
        Ok(freestyle::parse_patient_name(&reply))
    }

    fn set_patient_name(&mut self, name: &str) -> Result<(), Error> {
        if !self.model.is_libre() {
            Err(Error::NotImplemented("patient name"))?
        }

        self.session.text_command(&freestyle::set_patient_name(name))?;
        Ok(())
    }
}
