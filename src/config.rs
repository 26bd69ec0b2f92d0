//! TOML configuration selecting and opening a meter.
//!
//! ```toml
//! [meter]
//! driver = "otultraeasy"
//! device = "/dev/ttyUSB0"
//! timeout_ms = 500
//! unit = "mg/dL"
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::Deserialize;

use crate::{
    Error, MeterInfo, Unit,
    avec::{Driver, DriverKind, Meter},
};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    pub meter: MeterConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MeterConfig {
    pub driver: DriverKind,
    #[serde(default)]
    pub device: Option<PathBuf>,
    /// Overrides the read timeout of the driver.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Unit readings are presented in, the meter's own unit when unset.
    #[serde(default)]
    pub unit: Option<Unit>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Error> {
        fs::read_to_string(path)?.parse()
    }

    pub fn timeout(&self) -> Duration {
        self.meter
            .timeout_ms
            .map_or(self.meter.driver.default_timeout(), Duration::from_millis)
    }

    /// Open the configured meter, not yet connected.
    pub fn open(&self) -> Result<Meter<Box<dyn Driver>>, Error> {
        let driver = self
            .meter
            .driver
            .open(self.meter.device.as_deref(), Some(self.timeout()))?;

        Ok(Meter::new(driver))
    }

    /// Unit readings are presented in for the given meter.
    pub fn unit(&self, info: &MeterInfo) -> Unit {
        self.meter.unit.unwrap_or(info.native_unit)
    }

    /// Render every reading of a connected meter as CSV in the configured unit.
    pub fn readings_csv<D: Driver>(&self, meter: &mut Meter<D>) -> Result<Vec<String>, Error> {
        let unit = self.unit(meter.info()?);

        meter.readings()?.map(|r| r.map(|r| r.as_csv(unit))).collect()
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(s)?)
    }
}
