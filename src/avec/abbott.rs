//! FreeStyle Optium and Freedom Lite over a serial line.

use std::io::{Read, Write};

use chrono::NaiveDateTime;
use log::{debug, info, warn};

use super::{Driver, Readings, transport::LineReader};
use crate::{
    Error, GlucoseReading, MeterInfo, Reading, Unit,
    sans::abbott::{self, DeviceInfo, MemoryDump, ReadingKind},
};

/// Serial handle sending `$`-prefixed text commands.
#[derive(Debug)]
struct Port<T> {
    inner: LineReader<T>,
}

impl<T: Read + Write> Port<T> {
    fn send(&mut self, command: &str) -> Result<(), Error> {
        debug!("Sending command {command:?}");
        self.inner.write_all(&abbott::encode_command(command))
    }

    fn read_lines(&mut self, n: usize) -> Result<Vec<String>, Error> {
        (0..n).map(|_| self.inner.read_line()).collect()
    }

    /// Read lines up to the `CMD OK` status line, which is kept.
    fn read_status(&mut self) -> Result<Vec<String>, Error> {
        let mut lines = Vec::new();

        loop {
            let line = self.inner.read_line()?;

            match line.as_str() {
                "CMD OK" => {
                    lines.push(line);
                    return Ok(lines);
                }
                "CMD Fail!" => Err(Error::invalid(format!("command failed after {lines:?}")))?,
                _ => lines.push(line),
            }
        }
    }

    fn read_memory(&mut self) -> Result<MemoryDump, Error> {
        let mut lines = self.read_lines(MemoryDump::HEADER_LINES)?;
        let remaining = MemoryDump::remaining(&lines)?;
        lines.extend(self.read_lines(remaining)?);

        Ok(MemoryDump { lines })
    }
}

/// Driver of the FreeStyle Optium.
#[derive(Debug)]
pub struct Optium<T> {
    port: Port<T>,
    device: DeviceInfo,
}

impl<T: Read + Write> Optium<T> {
    pub fn new(port: T) -> Self {
        Self {
            port: Port {
                inner: LineReader::new(port),
            },
            device: DeviceInfo::default(),
        }
    }

    pub fn into_inner(self) -> T {
        self.port.inner.into_inner()
    }

    fn colq(&mut self) -> Result<DeviceInfo, Error> {
        self.port.send("colq")?;
        abbott::parse_colq(&self.port.read_status()?)
    }
}

impl<T: Read + Write> Driver for Optium<T> {
    /// A memory dump wakes the meter up before the device information is
    /// requested; its content is discarded.
    fn connect(&mut self) -> Result<(), Error> {
        self.port.send("xmem")?;
        let dump = self.port.read_memory()?;
        debug!("Discarded {} lines of memory dump", dump.lines.len());

        self.device = self.colq()?;
        info!("Optium {} connected", self.device.serial_number);

        Ok(())
    }

    fn meter_info(&mut self) -> Result<MeterInfo, Error> {
        Ok(MeterInfo::new("Freestyle Optium glucometer")
            .with_serial_number(self.device.serial_number.clone())
            .with_version(format!("Software version: {}", self.device.version))
            .with_native_unit(self.device.unit))
    }

    fn datetime(&mut self) -> Result<NaiveDateTime, Error> {
        self.colq()?
            .clock
            .ok_or_else(|| Error::invalid("device information without clock"))
    }

    fn set_datetime(&mut self, t: NaiveDateTime) -> Result<NaiveDateTime, Error> {
        self.port.send(&abbott::set_datetime(t))?;
        self.port.read_status()?;

        self.datetime()
    }

    fn readings(&mut self) -> Result<Readings<'_>, Error> {
        self.port.send("xmem")?;
        let dump = self.port.read_memory()?;

        let readings = dump.readings()?.into_iter().filter_map(|r| match r.kind {
            ReadingKind::Glucose => Some(Ok(Reading::from(r.to_reading()))),
            ReadingKind::Ketone => {
                warn!("Skipping ketone reading at {}", r.timestamp);
                None
            }
        });

        Ok(Box::new(readings))
    }

    fn zero_log(&mut self) -> Result<(), Error> {
        Err(Error::NotImplemented("zero log"))
    }
}

/// Driver of the FreeStyle Freedom Lite, which reports everything in one
/// `mem` dump fetched on connection.
#[derive(Debug)]
pub struct FreedomLite<T> {
    port: Port<T>,
    serial_number: String,
    version: String,
    clock: Option<NaiveDateTime>,
    readings: Vec<GlucoseReading>,
}

impl<T: Read + Write> FreedomLite<T> {
    /// Lines of the `mem` dump before its readings.
    const HEADER_LINES: usize = 6;

    pub fn new(port: T) -> Self {
        Self {
            port: Port {
                inner: LineReader::new(port),
            },
            serial_number: String::new(),
            version: String::new(),
            clock: None,
            readings: Vec::new(),
        }
    }

    pub fn into_inner(self) -> T {
        self.port.inner.into_inner()
    }
}

impl<T: Read + Write> Driver for FreedomLite<T> {
    fn connect(&mut self) -> Result<(), Error> {
        self.port.send("mem")?;

        let header = self.port.read_lines(Self::HEADER_LINES)?;
        let count: usize = header[4]
            .trim()
            .parse()
            .map_err(|_| Error::invalid(format!("invalid record count {:?}", header[4])))?;

        self.serial_number = header[1].clone();
        self.version = header[2].clone();
        self.clock = Some(abbott::parse_clock_init(&header[3])?);
        self.readings = self
            .port
            .read_lines(count)?
            .iter()
            .map(|l| abbott::parse_freedom_reading(l))
            .collect::<Result<_, _>>()?;

        info!("Freedom Lite {} holds {count} readings", self.serial_number);
        Ok(())
    }

    fn meter_info(&mut self) -> Result<MeterInfo, Error> {
        Ok(MeterInfo::new("Freestyle Freedom Lite")
            .with_serial_number(self.serial_number.clone())
            .with_version(format!("Software version: {}", self.version))
            .with_native_unit(Unit::MgDl))
    }

    fn datetime(&mut self) -> Result<NaiveDateTime, Error> {
        self.clock.ok_or(Error::NotConnected)
    }

    fn set_datetime(&mut self, _: NaiveDateTime) -> Result<NaiveDateTime, Error> {
        Err(Error::NotImplemented("set datetime"))
    }

    fn readings(&mut self) -> Result<Readings<'_>, Error> {
        Ok(Box::new(
            self.readings.iter().cloned().map(|r| Ok(Reading::from(r))),
        ))
    }

    fn zero_log(&mut self) -> Result<(), Error> {
        Err(Error::NotImplemented("zero log"))
    }
}
