//! Byte transports the drivers are written against.
//!
//! Serial meters are driven over any `Read + Write` handle through a
//! [`LineReader`]; HID meters through the [`HidDevice`] trait, implemented
//! for hidraw nodes by [`HidRaw`]; SCSI meters through the [`BlockDevice`]
//! trait, which callers implement over their pass-through of choice.

use std::io::{self, BufRead, BufReader, Read, Write};

use log::debug;

use crate::{Error, sans::lifescan::Register};

pub const HID_REPORT_SIZE: usize = 64;

/// A USB HID device exchanging fixed-size reports.
pub trait HidDevice {
    /// Write an output report. The report id is not part of `report`.
    fn write_report(&mut self, report: &[u8; HID_REPORT_SIZE]) -> Result<(), Error>;

    /// Read an input report, zero padded.
    fn read_report(&mut self) -> Result<[u8; HID_REPORT_SIZE], Error>;
}

impl<H: HidDevice + ?Sized> HidDevice for Box<H> {
    fn write_report(&mut self, report: &[u8; HID_REPORT_SIZE]) -> Result<(), Error> {
        (**self).write_report(report)
    }

    fn read_report(&mut self) -> Result<[u8; HID_REPORT_SIZE], Error> {
        (**self).read_report()
    }
}

/// HID device behind a handle with hidraw semantics: every write is one
/// report prefixed by its id, every read returns at most one report.
#[derive(Debug)]
pub struct HidRaw<T> {
    inner: T,
}

impl<T> HidRaw<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Read + Write> HidDevice for HidRaw<T> {
    fn write_report(&mut self, report: &[u8; HID_REPORT_SIZE]) -> Result<(), Error> {
        debug!("HID write {}", hex::encode(report));

        let mut r = [0; HID_REPORT_SIZE + 1];
        r[1..].copy_from_slice(report);
        self.inner.write_all(&r)?;

        Ok(())
    }

    fn read_report(&mut self) -> Result<[u8; HID_REPORT_SIZE], Error> {
        let mut r = [0; HID_REPORT_SIZE];

        let n = self.inner.read(&mut r)?;
        if n == 0 {
            Err(io::Error::from(io::ErrorKind::UnexpectedEof))?
        }

        debug!("HID read {}", hex::encode(&r[..n]));
        Ok(r)
    }
}

/// A SCSI block device exchanging 512-byte registers.
pub trait BlockDevice {
    /// Vendor identification reported by an INQUIRY.
    fn vendor(&mut self) -> Result<String, Error>;

    fn read_block(&mut self, lba: u32) -> Result<Register, Error>;

    fn write_block(&mut self, lba: u32, block: &Register) -> Result<(), Error>;
}

impl<B: BlockDevice + ?Sized> BlockDevice for Box<B> {
    fn vendor(&mut self) -> Result<String, Error> {
        (**self).vendor()
    }

    fn read_block(&mut self, lba: u32) -> Result<Register, Error> {
        (**self).read_block(lba)
    }

    fn write_block(&mut self, lba: u32, block: &Register) -> Result<(), Error> {
        (**self).write_block(lba, block)
    }
}

/// Buffered serial handle offering line and fixed-size reads.
#[derive(Debug)]
pub struct LineReader<T> {
    inner: BufReader<T>,
}

impl<T: Read + Write> LineReader<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner: BufReader::new(inner),
        }
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    pub fn write_all(&mut self, r: &[u8]) -> Result<(), Error> {
        debug!("Serial write {}", hex::encode(r));

        let inner = self.inner.get_mut();
        inner.write_all(r)?;
        inner.flush()?;

        Ok(())
    }

    /// Read up to and including `terminator`.
    pub fn read_until(&mut self, terminator: u8) -> Result<Vec<u8>, Error> {
        let mut r = Vec::new();
        self.inner.read_until(terminator, &mut r)?;

        if r.last() != Some(&terminator) {
            Err(io::Error::from(io::ErrorKind::UnexpectedEof))?
        }

        debug!("Serial read {}", hex::encode(&r));
        Ok(r)
    }

    /// Read a CRLF-terminated line as text, without its terminator.
    pub fn read_line(&mut self) -> Result<String, Error> {
        let line = self.read_until(b'\n')?;

        let line = String::from_utf8(line)
            .map_err(|e| Error::invalid(format!("non-UTF-8 line {:?}", e.as_bytes())))?;

        Ok(line.trim_end_matches(['\r', '\n']).to_owned())
    }

    pub fn read_exact<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let mut r = [0; N];
        self.inner.read_exact(&mut r)?;

        debug!("Serial read {}", hex::encode(r));
        Ok(r)
    }

    pub fn read_vec(&mut self, n: usize) -> Result<Vec<u8>, Error> {
        let mut r = vec![0; n];
        self.inner.read_exact(&mut r)?;

        debug!("Serial read {}", hex::encode(&r));
        Ok(r)
    }
}

/// Line settings of a serial meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub parity: Parity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Open a serial port with 8 data bits and one stop bit.
///
/// _Requires Cargo feature `serial`._
#[cfg(feature = "serial")]
pub fn open_serial(
    path: &str,
    settings: SerialSettings,
    timeout: std::time::Duration,
) -> Result<Box<dyn serialport::SerialPort>, Error> {
    let parity = match settings.parity {
        Parity::None => serialport::Parity::None,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
    };

    log::info!("Opening {path} at {} baud", settings.baud_rate);

    serialport::new(path, settings.baud_rate)
        .timeout(timeout)
        .data_bits(serialport::DataBits::Eight)
        .stop_bits(serialport::StopBits::One)
        .parity(parity)
        .open()
        .map_err(|e| Error::ConnectionFailed(format!("unable to open {path}: {e}")))
}
