use std::{
    fmt,
    fs::OpenOptions,
    io::{Read, Write},
    path::Path,
    str::FromStr,
    time::Duration,
};

use log::info;
use serde::Deserialize;

use super::{
    Driver,
    abbott::{FreedomLite, Optium},
    accuchek::AccuChek,
    areo::Areo,
    codefree::CodeFree,
    contour::{BayerContour, ContourUsb},
    freestyle::{FreeStyle, Model},
    lifescan::{UltraEasy, VerioIq},
    taidoc::Td42xx,
    transport::{HidDevice, HidRaw, Parity, SerialSettings},
    ultra2::Ultra2,
};
use crate::{Error, sans::contour::Dialect};

/// How a meter is attached to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportClass {
    Serial,
    Hid,
    Scsi,
    /// A mounted volume exposing report files.
    Filesystem,
}

/// Every supported meter driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum DriverKind {
    OtUltra2,
    OtUltraEasy,
    OtVerioIq,
    OtVerio2015,
    FsLibre,
    FsLibre2,
    FsPrecisionNeo,
    FsInsulinx,
    FsOptium,
    FsFreedomLite,
    SdCodeFree,
    Td42xx,
    GlucoMenAreo,
    Contour,
    ContourUsb,
    ContourNextOne,
    AccuChek,
}

impl DriverKind {
    pub const ALL: [Self; 17] = [
        Self::OtUltra2,
        Self::OtUltraEasy,
        Self::OtVerioIq,
        Self::OtVerio2015,
        Self::FsLibre,
        Self::FsLibre2,
        Self::FsPrecisionNeo,
        Self::FsInsulinx,
        Self::FsOptium,
        Self::FsFreedomLite,
        Self::SdCodeFree,
        Self::Td42xx,
        Self::GlucoMenAreo,
        Self::Contour,
        Self::ContourUsb,
        Self::ContourNextOne,
        Self::AccuChek,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::OtUltra2 => "otultra2",
            Self::OtUltraEasy => "otultraeasy",
            Self::OtVerioIq => "otverioiq",
            Self::OtVerio2015 => "otverio2015",
            Self::FsLibre => "fslibre",
            Self::FsLibre2 => "fslibre2",
            Self::FsPrecisionNeo => "fsprecisionneo",
            Self::FsInsulinx => "fsinsulinx",
            Self::FsOptium => "fsoptium",
            Self::FsFreedomLite => "fsfreedomlite",
            Self::SdCodeFree => "sdcodefree",
            Self::Td42xx => "td42xx",
            Self::GlucoMenAreo => "glucomenareo",
            Self::Contour => "contour",
            Self::ContourUsb => "contourusb",
            Self::ContourNextOne => "contournextone",
            Self::AccuChek => "accuchek",
        }
    }

    pub fn model(&self) -> &'static str {
        match self {
            Self::OtUltra2 => "OneTouch Ultra 2",
            Self::OtUltraEasy => "OneTouch Ultra Easy",
            Self::OtVerioIq => "OneTouch Verio IQ",
            Self::OtVerio2015 => "OneTouch Verio (2015)",
            Self::FsLibre => "FreeStyle Libre",
            Self::FsLibre2 => "FreeStyle Libre 2",
            Self::FsPrecisionNeo => "FreeStyle Precision Neo",
            Self::FsInsulinx => "FreeStyle InsuLinx",
            Self::FsOptium => "FreeStyle Optium",
            Self::FsFreedomLite => "FreeStyle Freedom Lite",
            Self::SdCodeFree => "SD CodeFree",
            Self::Td42xx => "TaiDoc TD-42xx",
            Self::GlucoMenAreo => "GlucoMen areo",
            Self::Contour => "Bayer Contour",
            Self::ContourUsb => "Contour USB",
            Self::ContourNextOne => "Contour Next One",
            Self::AccuChek => "Accu-Chek",
        }
    }

    pub fn transport(&self) -> TransportClass {
        match self {
            Self::OtVerio2015 => TransportClass::Scsi,
            Self::FsLibre
            | Self::FsLibre2
            | Self::FsPrecisionNeo
            | Self::FsInsulinx
            | Self::Contour
            | Self::ContourUsb
            | Self::ContourNextOne => TransportClass::Hid,
            Self::AccuChek => TransportClass::Filesystem,
            _ => TransportClass::Serial,
        }
    }

    /// Line settings of serial meters.
    pub fn serial_settings(&self) -> Option<SerialSettings> {
        let (baud_rate, parity) = match self {
            Self::OtUltra2 | Self::OtUltraEasy | Self::OtVerioIq => (9600, Parity::None),
            Self::FsOptium | Self::FsFreedomLite | Self::Td42xx => (19200, Parity::None),
            Self::SdCodeFree => (38400, Parity::None),
            Self::GlucoMenAreo => (9600, Parity::Odd),
            _ => return None,
        };

        Some(SerialSettings { baud_rate, parity })
    }

    /// Read timeout of serial meters. The SD CodeFree waits for the user to
    /// start the transfer on the meter.
    pub fn default_timeout(&self) -> Duration {
        match self {
            Self::OtUltraEasy | Self::OtVerioIq | Self::Td42xx => Duration::from_millis(500),
            Self::SdCodeFree => Duration::from_secs(300),
            _ => Duration::from_secs(1),
        }
    }

    /// USB vendor and product id of the meter or its usual cable.
    pub fn usb_id(&self) -> Option<(u16, u16)> {
        match self {
            Self::OtUltraEasy => Some((0x067b, 0x2303)),
            Self::OtVerioIq => Some((0x10c4, 0x85a7)),
            Self::FsLibre => Some((0x1a61, 0x3650)),
            Self::FsLibre2 => Some((0x1a61, 0x3950)),
            Self::FsPrecisionNeo => Some((0x1a61, 0x3850)),
            Self::FsInsulinx => Some((0x1a61, 0x3460)),
            Self::FsOptium => Some((0x1a61, 0x3420)),
            Self::FsFreedomLite => Some((0x0403, 0x6001)),
            Self::SdCodeFree | Self::GlucoMenAreo => Some((0x10c4, 0xea60)),
            Self::Td42xx => Some((0x10c4, 0xea80)),
            Self::Contour | Self::ContourUsb | Self::ContourNextOne => Some((0x1a79, 0x6002)),
            Self::OtUltra2 | Self::OtVerio2015 | Self::AccuChek => None,
        }
    }

    /// Build the driver of a serial meter over an open port.
    pub fn serial_driver<T: Read + Write + 'static>(&self, port: T) -> Result<Box<dyn Driver>, Error> {
        let driver: Box<dyn Driver> = match self {
            Self::OtUltra2 => Box::new(Ultra2::new(port)),
            Self::OtUltraEasy => Box::new(UltraEasy::new(port)),
            Self::OtVerioIq => Box::new(VerioIq::new(port)),
            Self::FsOptium => Box::new(Optium::new(port)),
            Self::FsFreedomLite => Box::new(FreedomLite::new(port)),
            Self::SdCodeFree => Box::new(CodeFree::new(port)),
            Self::Td42xx => Box::new(Td42xx::new(port)),
            Self::GlucoMenAreo => Box::new(Areo::new(port)),
            _ => Err(Error::NotImplemented("serial transport for this meter"))?,
        };

        Ok(driver)
    }

    /// Build the driver of an HID meter over an open device.
    pub fn hid_driver<H: HidDevice + 'static>(&self, device: H) -> Result<Box<dyn Driver>, Error> {
        let driver: Box<dyn Driver> = match self {
            Self::FsLibre => Box::new(FreeStyle::new(device, Model::Libre)),
            Self::FsLibre2 => Box::new(FreeStyle::new(device, Model::Libre2)),
            Self::FsPrecisionNeo => Box::new(FreeStyle::new(device, Model::PrecisionNeo)),
            Self::FsInsulinx => Box::new(FreeStyle::new(device, Model::InsuLinx)),
            Self::Contour => Box::new(BayerContour::new(device)),
            Self::ContourUsb => Box::new(ContourUsb::new(device, Dialect::ContourUsb)),
            Self::ContourNextOne => Box::new(ContourUsb::new(device, Dialect::NextOne)),
            _ => Err(Error::NotImplemented("HID transport for this meter"))?,
        };

        Ok(driver)
    }

    /// Open the meter attached at `device`.
    ///
    /// HID meters are opened through their hidraw node, and serial meters
    /// require the `serial` feature. SCSI meters must be built over a
    /// caller-provided [`BlockDevice`](super::transport::BlockDevice).
    pub fn open(&self, device: Option<&Path>, timeout: Option<Duration>) -> Result<Box<dyn Driver>, Error> {
        let Some(device) = device else {
            Err(Error::ConnectionFailed(format!(
                "no device given for {}",
                self.model()
            )))?
        };

        info!("Opening {} at {}", self.model(), device.display());

        match self.transport() {
            TransportClass::Hid => {
                let node = OpenOptions::new().read(true).write(true).open(device)?;
                self.hid_driver(HidRaw::new(node))
            }
            TransportClass::Serial => self.open_serial(device, timeout.unwrap_or(self.default_timeout())),
            TransportClass::Scsi => Err(Error::NotImplemented("SCSI transport")),
            TransportClass::Filesystem => Ok(Box::new(AccuChek::open(device)?)),
        }
    }

    #[cfg(feature = "serial")]
    fn open_serial(&self, device: &Path, timeout: Duration) -> Result<Box<dyn Driver>, Error> {
        let settings = self
            .serial_settings()
            .ok_or(Error::NotImplemented("serial transport for this meter"))?;
        let port = super::transport::open_serial(&device.to_string_lossy(), settings, timeout)?;

        self.serial_driver(port)
    }

    #[cfg(not(feature = "serial"))]
    fn open_serial(&self, _: &Path, _: Duration) -> Result<Box<dyn Driver>, Error> {
        Err(Error::NotImplemented("serial transport without the `serial` feature"))
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DriverKind {
    type Err = Error;

    /// Names are matched case-insensitively, ignoring `-` and `_`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_'))
            .collect::<String>()
            .to_ascii_lowercase();

        let kind = match name.as_str() {
            "td4277" => Self::Td42xx,
            "bacontour" => Self::Contour,
            "accuchekreports" => Self::AccuChek,
            name => Self::ALL
                .into_iter()
                .find(|k| k.name() == name)
                .ok_or_else(|| Error::ConnectionFailed(format!("unknown driver {s:?}")))?,
        };

        Ok(kind)
    }
}

impl TryFrom<String> for DriverKind {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}
