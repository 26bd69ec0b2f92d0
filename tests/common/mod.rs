#![allow(dead_code)]

use std::{
    collections::VecDeque,
    io::{self, Cursor, Read, Write},
};

use glucometer::{
    Error,
    avec::transport::{HID_REPORT_SIZE, HidDevice},
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Serial handle replaying a recorded meter output and recording the host's
/// writes for comparison.
pub struct Replay {
    input: Cursor<Vec<u8>>,
    pub written: Vec<u8>,
}

impl Replay {
    pub fn new(input: impl AsRef<[u8]>) -> Self {
        Self {
            input: Cursor::new(input.as_ref().to_vec()),
            written: Vec::new(),
        }
    }

    /// Bytes of the recording the host did not consume.
    pub fn unread(&self) -> usize {
        self.input.get_ref().len() - self.input.position() as usize
    }
}

impl Read for Replay {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for Replay {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// HID device replaying queued input reports.
#[derive(Default)]
pub struct ReplayHid {
    input: VecDeque<[u8; HID_REPORT_SIZE]>,
    pub written: Vec<[u8; HID_REPORT_SIZE]>,
}

impl ReplayHid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a report, zero padded.
    pub fn push(&mut self, report: &[u8]) -> &mut Self {
        let mut r = [0; HID_REPORT_SIZE];
        r[..report.len()].copy_from_slice(report);
        self.input.push_back(r);
        self
    }

    pub fn pending(&self) -> usize {
        self.input.len()
    }
}

impl HidDevice for ReplayHid {
    fn write_report(&mut self, report: &[u8; HID_REPORT_SIZE]) -> Result<(), Error> {
        self.written.push(*report);
        Ok(())
    }

    fn read_report(&mut self) -> Result<[u8; HID_REPORT_SIZE], Error> {
        self.input
            .pop_front()
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof).into())
    }
}

/// Check a CSV line renders exactly the five reading columns.
pub fn assert_csv_fields(line: &str) {
    let record = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(line.as_bytes())
        .into_records()
        .next()
        .unwrap()
        .unwrap();

    assert_eq!(record.len(), 5, "{line}");
}
