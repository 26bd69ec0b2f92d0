//! Drivers pairing the [`sans`](crate::sans) decoders with a transport.
//!
//! Every meter model is driven through the [`Driver`] trait. Drivers are
//! built over a transport from [`transport`] (a serial handle, an HID device
//! or a SCSI block device), or opened by name through [`DriverKind`]. The
//! [`Meter`] facade wraps a driver to enforce the session lifecycle.
//!
//! ```ignore
//! use glucometer::avec::{DriverKind, Meter};
//!
//! let driver = DriverKind::OtUltraEasy.open(Some("/dev/ttyUSB0".as_ref()), None)?;
//! let mut meter = Meter::new(driver);
//!
//! meter.connect()?;
//! println!("{}", meter.info()?);
//!
//! for reading in meter.readings()? {
//!     println!("{}", reading?.as_csv(Unit::MgDl));
//! }
//!
//! meter.disconnect()?;
//! ```

use chrono::NaiveDateTime;
use log::info;

use crate::{Error, MeterInfo, Reading};

pub mod abbott;
pub mod accuchek;
pub mod areo;
pub mod codefree;
pub mod contour;
pub mod freestyle;
mod kind;
pub mod lifescan;
pub mod taidoc;
pub mod transport;
pub mod ultra2;

pub use kind::{DriverKind, TransportClass};

/// Readings retrieved from a meter, in the order the meter reports them.
///
/// Paged protocols fetch each reading as the iterator is advanced, so an
/// error may surface after some readings were produced.
pub type Readings<'a> = Box<dyn Iterator<Item = Result<Reading, Error>> + 'a>;

/// Box a paged retrieval, which stops at its first failure without
/// requesting further pages.
pub(crate) fn paged<'a>(
    readings: impl Iterator<Item = Result<Reading, Error>> + 'a,
) -> Readings<'a> {
    let mut readings = Some(readings);

    Box::new(std::iter::from_fn(move || {
        let r = readings.as_mut()?.next()?;
        if r.is_err() {
            readings = None;
        }

        Some(r)
    }))
}

/// Operations of a glucometer driver.
///
/// Operations a model cannot perform return [`Error::NotImplemented`].
pub trait Driver {
    /// Open the session with the meter.
    fn connect(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn meter_info(&mut self) -> Result<MeterInfo, Error>;

    /// Current time of the meter clock.
    fn datetime(&mut self) -> Result<NaiveDateTime, Error>;

    /// Set the meter clock, returning the time the meter reports back.
    fn set_datetime(&mut self, t: NaiveDateTime) -> Result<NaiveDateTime, Error>;

    /// Set the meter clock to the local time of the host.
    fn set_datetime_now(&mut self) -> Result<NaiveDateTime, Error> {
        self.set_datetime(chrono::Local::now().naive_local())
    }

    fn readings(&mut self) -> Result<Readings<'_>, Error>;

    /// Erase every reading stored in the meter.
    fn zero_log(&mut self) -> Result<(), Error>;

    fn patient_name(&mut self) -> Result<Option<String>, Error> {
        Err(Error::NotImplemented("patient name"))
    }

    fn set_patient_name(&mut self, _: &str) -> Result<(), Error> {
        Err(Error::NotImplemented("patient name"))
    }
}

impl<D: Driver + ?Sized> Driver for Box<D> {
    fn connect(&mut self) -> Result<(), Error> {
        (**self).connect()
    }

    fn disconnect(&mut self) -> Result<(), Error> {
        (**self).disconnect()
    }

    fn meter_info(&mut self) -> Result<MeterInfo, Error> {
        (**self).meter_info()
    }

    fn datetime(&mut self) -> Result<NaiveDateTime, Error> {
        (**self).datetime()
    }

    fn set_datetime(&mut self, t: NaiveDateTime) -> Result<NaiveDateTime, Error> {
        (**self).set_datetime(t)
    }

    fn set_datetime_now(&mut self) -> Result<NaiveDateTime, Error> {
        (**self).set_datetime_now()
    }

    fn readings(&mut self) -> Result<Readings<'_>, Error> {
        (**self).readings()
    }

    fn zero_log(&mut self) -> Result<(), Error> {
        (**self).zero_log()
    }

    fn patient_name(&mut self) -> Result<Option<String>, Error> {
        (**self).patient_name()
    }

    fn set_patient_name(&mut self, name: &str) -> Result<(), Error> {
        (**self).set_patient_name(name)
    }
}

/// A connection-scoped session over a driver.
///
/// Operations require a prior [`connect`](Meter::connect). The meter
/// description is fetched once per connection, and readings may be taken
/// once per connection.
#[derive(Debug)]
pub struct Meter<D> {
    driver: D,
    connected: bool,
    info: Option<MeterInfo>,
    readings_taken: bool,
}

impl<D: Driver> Meter<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            connected: false,
            info: None,
            readings_taken: false,
        }
    }

    pub fn connect(&mut self) -> Result<(), Error> {
        self.driver.connect()?;

        info!("Connected to meter");
        self.connected = true;
        self.info = None;
        self.readings_taken = false;

        Ok(())
    }

    pub fn disconnect(&mut self) -> Result<(), Error> {
        if !self.connected {
            return Ok(());
        }

        self.connected = false;
        self.driver.disconnect()?;

        info!("Disconnected from meter");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn info(&mut self) -> Result<&MeterInfo, Error> {
        if !self.connected {
            Err(Error::NotConnected)?
        }

        let info = match self.info.take() {
            Some(info) => info,
            None => self.driver.meter_info()?,
        };

        Ok(self.info.insert(info))
    }

    pub fn datetime(&mut self) -> Result<NaiveDateTime, Error> {
        self.session()?.datetime()
    }

    pub fn set_datetime(&mut self, t: NaiveDateTime) -> Result<NaiveDateTime, Error> {
        self.session()?.set_datetime(t)
    }

    pub fn set_datetime_now(&mut self) -> Result<NaiveDateTime, Error> {
        self.session()?.set_datetime_now()
    }

    /// Readings stored in the meter. A second call on the same connection
    /// fails with [`Error::ReadingsConsumed`].
    pub fn readings(&mut self) -> Result<Readings<'_>, Error> {
        if !self.connected {
            Err(Error::NotConnected)?
        }

        if self.readings_taken {
            Err(Error::ReadingsConsumed)?
        }

        self.readings_taken = true;
        self.driver.readings()
    }

    pub fn zero_log(&mut self) -> Result<(), Error> {
        self.session()?.zero_log()
    }

    pub fn patient_name(&mut self) -> Result<Option<String>, Error> {
        self.session()?.patient_name()
    }

    pub fn set_patient_name(&mut self, name: &str) -> Result<(), Error> {
        self.session()?.set_patient_name(name)?;

        if let Some(info) = &mut self.info {
            info.patient_name = Some(name.to_owned());
        }

        Ok(())
    }

    pub fn into_inner(self) -> D {
        self.driver
    }

    fn session(&mut self) -> Result<&mut D, Error> {
        if !self.connected {
            Err(Error::NotConnected)?
        }

        Ok(&mut self.driver)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::GlucoseReading;

    #[derive(Default)]
    struct Counting {
        info_calls: usize,
        connects: usize,
    }

    impl Driver for Counting {
        fn connect(&mut self) -> Result<(), Error> {
            self.connects += 1;
            Ok(())
        }

        fn meter_info(&mut self) -> Result<MeterInfo, Error> {
            self.info_calls += 1;
            Ok(MeterInfo::new("Counting meter"))
        }

        fn datetime(&mut self) -> Result<NaiveDateTime, Error> {
            Err(Error::NotImplemented("datetime"))
        }

        fn set_datetime(&mut self, t: NaiveDateTime) -> Result<NaiveDateTime, Error> {
            Ok(t)
        }

        fn readings(&mut self) -> Result<Readings<'_>, Error> {
            let t = NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap();

            Ok(Box::new(
                [100.0, 110.0]
                    .into_iter()
                    .map(move |v| Ok(Reading::from(GlucoseReading::new(t, v)))),
            ))
        }

        fn zero_log(&mut self) -> Result<(), Error> {
            Ok(())
        }
    }

    #[test]
    fn requires_connection() {
        let mut meter = Meter::new(Counting::default());

        assert!(matches!(meter.info(), Err(Error::NotConnected)));
        assert!(matches!(meter.readings(), Err(Error::NotConnected)));
        assert!(matches!(meter.zero_log(), Err(Error::NotConnected)));

        meter.disconnect().unwrap();
        assert_eq!(meter.into_inner().connects, 0);
    }

    #[test]
    fn caches_info() {
        let mut meter = Meter::new(Counting::default());
        meter.connect().unwrap();

        assert_eq!(meter.info().unwrap().model, "Counting meter");
        assert_eq!(meter.info().unwrap().serial_number, "N/A");
        assert_eq!(meter.into_inner().info_calls, 1);
    }

    #[test]
    fn readings_taken_once_per_connection() {
        let mut meter = Meter::new(Counting::default());
        meter.connect().unwrap();

        assert_eq!(meter.readings().unwrap().count(), 2);
        assert!(matches!(meter.readings(), Err(Error::ReadingsConsumed)));

        meter.disconnect().unwrap();
        assert!(matches!(meter.readings(), Err(Error::NotConnected)));

        meter.connect().unwrap();
        assert_eq!(meter.readings().unwrap().count(), 2);
    }

    #[test]
    fn unsupported_operations() {
        let mut meter = Meter::new(Box::new(Counting::default()) as Box<dyn Driver>);
        meter.connect().unwrap();

        assert!(matches!(
            meter.patient_name(),
            Err(Error::NotImplemented("patient name"))
        ));
        assert!(matches!(meter.datetime(), Err(Error::NotImplemented(_))));
        assert!(meter.set_datetime_now().is_ok());
    }

    #[test]
    fn paged_retrieval_stops_at_first_failure() {
        let t = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let mut requests = 0;

        let readings: Vec<_> = paged((0..3).map(|i| {
            requests += 1;
            match i {
                1 => Err(Error::InvalidDateTime),
                _ => Ok(Reading::from(GlucoseReading::new(t, 100.0))),
            }
        }))
        .collect();

        assert_eq!(readings.len(), 2);
        assert!(matches!(readings[1], Err(Error::InvalidDateTime)));
        assert_eq!(requests, 2);
    }
}
