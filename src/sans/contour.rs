//! Bayer/Ascensia Contour HID reports and the download session of the
//! Contour USB and Contour Next One.
//!
//! Every HID report is `ABC | len | data | zero pad`, carrying at most 60
//! bytes of LIS1-A traffic. A read gathers reports until one carries less
//! than a full payload, or until the gathered bytes already form a complete
//! frame or control byte.
//!
//! The download session is a small state machine driven by single control
//! bytes: the host probes with EOT (or ACK) until the meter answers ENQ,
//! then acknowledges every data frame until the meter sends EOT.

use chrono::NaiveDateTime;
use either::Either;

use super::{
    FrameError,
    check::byte_sum_mod256,
    lis::{self, ACK, CR, ENQ, EOT, ETB, ETX, LF, NAK, STX},
};
use crate::{Error, GlucoseReading, MeasurementMethod, Unit};

pub const REPORT_SIZE: usize = 64;
pub const TAG: &[u8; 3] = b"ABC";
pub const MAX_DATA: usize = 60;

const HEADER_SIZE: usize = 4;

/// Probes sent while waiting for a header record.
pub const MAX_INFO_ATTEMPTS: usize = 32;

pub fn encode_report(data: &[u8]) -> Result<[u8; REPORT_SIZE], FrameError> {
    if data.len() > MAX_DATA {
        Err(FrameError::Length(data.len()))?
    }

    let mut r = [0; REPORT_SIZE];
    r[..3].copy_from_slice(TAG);
    r[3] = data.len() as u8;
    r[HEADER_SIZE..HEADER_SIZE + data.len()].copy_from_slice(data);

    Ok(r)
}

/// Whether gathered bytes end with a control byte or a frame trailer.
fn is_complete(block: &[u8]) -> bool {
    matches!(
        block,
        [.., ENQ | EOT | ACK | NAK] | [.., ETX | ETB, _, _, CR, LF]
    )
}

/// State token gathering report payloads into a block.
#[derive(Debug, Default)]
pub struct Block {
    data: Vec<u8>,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(mut self, report: &[u8]) -> Result<Either<Self, Vec<u8>>, Error> {
        if report.len() < HEADER_SIZE {
            Err(Error::invalid(format!(
                "report too short: {}",
                hex::encode(report)
            )))?
        }

        let len = report[3] as usize;
        if len > MAX_DATA {
            Err(FrameError::Length(len))?
        }

        let data = report
            .get(HEADER_SIZE..HEADER_SIZE + len)
            .ok_or(FrameError::Truncated)?;
        self.data.extend_from_slice(data);

        if len < MAX_DATA || is_complete(&self.data) {
            Ok(Either::Right(self.data))
        } else {
            Ok(Either::Left(self))
        }
    }
}

/// Validate a download frame `STX recno text CR (ETX|ETB) CC CR LF`.
///
/// `current` tracks the expected record number; it is taken from the first
/// frame received. A repeat of the previous frame yields `None`. Bytes
/// following the frame are ignored.
pub fn check_frame(frame: &[u8], current: &mut Option<u8>) -> Result<Option<String>, FrameError> {
    let [STX, recno @ b'0'..=b'7', rest @ ..] = frame else {
        Err(match frame.first() {
            Some(&STX) | None => FrameError::Truncated,
            Some(&other) => FrameError::StartMarker(other),
        })?
    };
    let recno = recno - b'0';

    let cr = rest
        .iter()
        .position(|&b| b == CR)
        .ok_or(FrameError::Truncated)?;
    let (text, trailer) = rest.split_at(cr);

    let [CR, end, c1, c2, CR, LF, ..] = *trailer else {
        Err(FrameError::Truncated)?
    };

    if end != ETX && end != ETB {
        Err(FrameError::EndMarker(end))?
    }

    let checksum = lis::latin1(&[c1, c2]);
    let found = checksum
        .bytes()
        .all(|c| matches!(c, b'0'..=b'9' | b'A'..=b'F'))
        .then(|| u8::from_str_radix(&checksum, 16).ok())
        .flatten()
        .ok_or_else(|| FrameError::MissingChecksum(checksum.clone()))?;

    let expected = *current.get_or_insert(recno);

    if (recno + 1) % 8 == expected {
        return Ok(None);
    }

    if recno != expected {
        Err(FrameError::Sequence {
            found: recno,
            expected,
        })?
    }

    // Record number through terminator.
    let calculated = byte_sum_mod256(&frame[1..2 + cr + 2]);
    if found != calculated {
        Err(FrameError::Checksum {
            found: found as u32,
            calculated: calculated as u32,
        })?
    }

    *current = Some((expected + 1) % 8);
    Ok(Some(lis::latin1(text)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Contour USB: the session opens with EOT probes and ends on EOT.
    ContourUsb,
    /// Contour Next One: the session opens with ACK and ends on the
    /// terminator record, which is acknowledged.
    NextOne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Establish,
    Data,
}

/// Outcome of one exchange of the download session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Control byte to send before the next read.
    pub reply: u8,
    /// Record carried by the frame just received.
    pub record: Option<String>,
}

/// State token of the download session.
#[derive(Debug)]
pub struct Sync {
    dialect: Dialect,
    mode: Mode,
    current: Option<u8>,
    probe: u8,
}

impl Sync {
    /// Start a session, returning the control byte to send first.
    pub fn new(dialect: Dialect) -> (Self, u8) {
        let first = match dialect {
            Dialect::ContourUsb => EOT,
            Dialect::NextOne => ACK,
        };

        let sync = Self {
            dialect,
            mode: Mode::Establish,
            current: None,
            probe: 0,
        };

        (sync, first)
    }

    /// Process a received block. The session ends with an optional last
    /// control byte to send.
    pub fn advance(mut self, block: &[u8]) -> Either<(Self, Step), Option<u8>> {
        if self.dialect == Dialect::ContourUsb {
            match (self.mode, block.last()) {
                (Mode::Establish, Some(&NAK)) => {
                    let reply = self.probe;
                    self.probe = self.probe.wrapping_add(1);
                    return self.step(reply, None);
                }
                (Mode::Establish, Some(&ENQ)) => {
                    self.current = None;
                    return self.step(ACK, None);
                }
                (Mode::Data, Some(&EOT)) => return Either::Right(None),
                _ => {}
            }
        }

        let Some(stx) = block.iter().position(|&b| b == STX) else {
            return self.step(NAK, None);
        };

        match check_frame(&block[stx..], &mut self.current) {
            Ok(record) => {
                if self.dialect == Dialect::NextOne
                    && record.as_deref().is_some_and(is_terminator)
                {
                    return Either::Right(Some(ACK));
                }

                self.mode = Mode::Data;
                self.step(ACK, record)
            }
            Err(e) => {
                log::debug!("Rejecting frame: {e}");
                self.step(NAK, None)
            }
        }
    }

    fn step(self, reply: u8, record: Option<String>) -> Either<(Self, Step), Option<u8>> {
        Either::Left((self, Step { reply, record }))
    }
}

/// Next One terminator record, `L|1|<word>|N`.
fn is_terminator(record: &str) -> bool {
    let mut fields = record.split('|');

    matches!(
        (fields.next(), fields.next(), fields.next(), fields.next()),
        (Some("L"), Some("1"), Some(word), Some(flag))
            if word.chars().all(|c| c.is_alphanumeric() || c == '_') && flag.starts_with('N')
    )
}

/// Meter identity carried by the header record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub product_code: String,
    /// Digital, analog and AGP (or RFE) versions.
    pub versions: [String; 3],
    pub serial_number: String,
    pub sku: Option<String>,
    pub unit: Unit,
    pub total: Option<u32>,
    pub datetime: NaiveDateTime,
}

impl Header {
    pub fn version(&self) -> String {
        self.versions.join(" - ")
    }
}

pub fn parse_header(record: &str) -> Result<Header, Error> {
    if !record.starts_with('H') {
        Err(Error::invalid(format!("expected header record, got {record:?}")))?
    }

    let delimiters = lis::Delimiters::from_header(record)?;
    let fields = lis::Fields::parse(&delimiters, record.get(6..).unwrap_or_default());

    let unit = match fields.components(3).find_map(|c| c.strip_prefix("U=")) {
        Some("0") => Unit::MgDl,
        Some(_) => Unit::MmolL,
        None => Err(Error::invalid(format!("no unit in header {record:?}")))?,
    };

    Ok(Header {
        product_code: fields.component(2, 0, 0)?.to_owned(),
        versions: [
            fields.component(2, 0, 1)?.to_owned(),
            fields.component(2, 1, 0)?.to_owned(),
            fields.component(2, 2, 0)?.to_owned(),
        ],
        serial_number: fields.component(2, 2, 1)?.to_owned(),
        sku: fields.component(2, 2, 2).ok().map(str::to_owned),
        unit,
        total: fields.field(4).ok().and_then(|t| t.parse().ok()),
        datetime: parse_timestamp(fields.field(11)?)?,
    })
}

/// Parse the answer to an EOT probe, which carries the header record
/// between EOT and ENQ once the meter is ready. Other answers yield `None`.
pub fn parse_info(block: &[u8]) -> Result<Option<Header>, Error> {
    let [EOT, .., ENQ] = block else {
        return Ok(None);
    };

    let stx = block
        .iter()
        .position(|&b| b == STX)
        .ok_or_else(|| Error::invalid(format!("no header frame in {}", hex::encode(block))))?;

    let text = check_frame(&block[stx..], &mut None)?
        .ok_or_else(|| Error::invalid("repeated header frame"))?;

    parse_header(&text).map(Some)
}

/// Parse `YYYYMMDDHHMM`, optionally followed by seconds.
pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime, Error> {
    let format = match s.len() {
        12 => "%Y%m%d%H%M",
        14 => "%Y%m%d%H%M%S",
        _ => Err(Error::InvalidDateTime)?,
    };

    NaiveDateTime::parse_from_str(s, format).map_err(|_| Error::InvalidDateTime)
}

/// Parse a result record `R|n|^^^test|value|unit^method||markers||datetime`.
///
/// The markers become the reading comment.
pub fn parse_result(record: &str) -> Result<GlucoseReading, Error> {
    let fields = lis::Fields::parse(&lis::Delimiters::default(), record);

    if fields.field(0)? != "R" {
        Err(Error::invalid(format!("expected result record, got {record:?}")))?
    }

    let value: u32 = fields
        .field(3)?
        .parse()
        .map_err(|_| Error::invalid(format!("invalid result value in {record:?}")))?;
    let unit: Unit = fields.field(4)?.parse()?;

    Ok(
        GlucoseReading::from_unit(parse_timestamp(fields.field(8)?)?, value as f64, unit)
            .with_comment(fields.field(6)?)
            .with_method(MeasurementMethod::BloodSample),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER_BLOCK: &[u8] = b"\x04\x021H|\\^&||7w3LBL|Bayer7390^01.24\\01.04\\09.02.20^7390-2336773^7403-|A=1^C=63^G=1^I=0200^R=0^S=1^U=0^V=10600^X=070070070070180130150250^Y=360126090050099050300089^Z=1|1714||||||1|201909221304\r\x17D7\r\n\x05";

    fn frame(recno: u8, text: &str, end: u8) -> Vec<u8> {
        let mut check = vec![b'0' + recno];
        check.extend_from_slice(text.as_bytes());
        check.extend([CR, end]);

        let mut r = vec![STX];
        r.extend_from_slice(&check);
        r.extend(format!("{:02X}\r\n", byte_sum_mod256(&check)).into_bytes());
        r
    }

    #[test]
    fn encodes_reports() {
        let report = encode_report(&[ACK]).unwrap();

        assert_eq!(report[..5], *b"ABC\x01\x06");
        assert!(report[5..].iter().all(|&b| b == 0));

        assert_eq!(encode_report(&[0; 61]), Err(FrameError::Length(61)));
    }

    #[test]
    fn gathers_blocks() {
        let mut full = b"ABC<".to_vec();
        full.extend([b' '; 60]);

        let Either::Left(block) = Block::new().advance(&full).unwrap() else {
            panic!("a full report must continue the block");
        };
        let Either::Right(data) = block.advance(b"ABC\x02  ").unwrap() else {
            panic!("a short report must end the block");
        };
        assert_eq!(data.len(), 62);

        assert!(Block::new().advance(b"123").is_err());
    }

    #[test]
    fn full_report_completing_a_frame_ends_the_block() {
        let text = "R".repeat(MAX_DATA - 8);
        let data = frame(1, &text, ETX);
        assert_eq!(data.len(), MAX_DATA);

        let mut report = b"ABC<".to_vec();
        report.extend(&data);

        assert_eq!(
            Block::new().advance(&report).unwrap().right(),
            Some(data)
        );
    }

    #[test]
    fn checks_frames() {
        let mut current = None;

        let text = check_frame(&frame(3, "P|1", ETB), &mut current).unwrap();
        assert_eq!(text.as_deref(), Some("P|1"));
        assert_eq!(current, Some(4));

        // Repeated frame.
        assert_eq!(check_frame(&frame(3, "P|1", ETB), &mut current), Ok(None));

        assert_eq!(
            check_frame(&frame(5, "P|1", ETB), &mut current),
            Err(FrameError::Sequence {
                found: 5,
                expected: 4
            })
        );

        let mut corrupt = frame(4, "P|1", ETB);
        corrupt[3] = b'2';
        assert!(matches!(
            check_frame(&corrupt, &mut current),
            Err(FrameError::Checksum { .. })
        ));
        assert_eq!(current, Some(4));
    }

    #[test]
    fn rejects_every_corrupted_frame_byte() {
        let text = "R|1|^^^Glucose|96|mg/dL^P||B/X||||202001161227";
        let valid = frame(1, text, ETX);

        let mut current = None;
        assert_eq!(
            check_frame(&valid, &mut current).unwrap().as_deref(),
            Some(text)
        );
        assert_eq!(current, Some(2));

        for i in 0..valid.len() {
            let mut corrupted = valid.clone();
            corrupted[i] ^= 0x01;
            assert!(check_frame(&corrupted, &mut None).is_err(), "byte {i}");
        }
    }

    #[test]
    fn reports_carry_their_payload() {
        for data in [&b"\x05"[..], b"\x021H|", &[b'R'; MAX_DATA - 1]] {
            let report = encode_report(data).unwrap();
            assert_eq!(
                Block::new().advance(&report).unwrap().right().as_deref(),
                Some(data)
            );

            let mut shortened = report;
            shortened[3] -= 1;
            assert_ne!(
                Block::new().advance(&shortened).unwrap().right().as_deref(),
                Some(data)
            );
        }
    }

    #[test]
    fn parses_info_record() {
        assert_eq!(parse_info(b"\x15").unwrap(), None);

        let header = parse_info(HEADER_BLOCK).unwrap().unwrap();

        assert_eq!(header.product_code, "Bayer7390");
        assert_eq!(header.version(), "01.24 - 01.04 - 09.02.20");
        assert_eq!(header.serial_number, "7390-2336773");
        assert_eq!(header.sku.as_deref(), Some("7403-"));
        assert_eq!(header.unit, Unit::MgDl);
        assert_eq!(header.total, Some(1714));
        assert_eq!(header.datetime.to_string(), "2019-09-22 13:04:00");
    }

    #[test]
    fn parses_next_one_header() {
        let header = parse_header(
            r"H|\^&||abc|Bayer7830^01.10\01.02\02.00^7830-1234567|A=1^C=0^R=0^S=0^U=1^V=20600^X=070250070130^a=0^J=0|5|||||P|1|20190922130459|",
        )
        .unwrap();

        assert_eq!(header.serial_number, "7830-1234567");
        assert_eq!(header.sku, None);
        assert_eq!(header.unit, Unit::MmolL);
        assert_eq!(header.datetime.to_string(), "2019-09-22 13:04:59");
    }

    #[test]
    fn parses_result_records() {
        let reading = parse_result("R|8|^^^Glucose|133|mg/dL^P||B/X||201202052034").unwrap();

        assert_eq!(reading.value, 133.0);
        assert_eq!(reading.comment, "B/X");
        assert_eq!(reading.timestamp.to_string(), "2012-02-05 20:34:00");

        assert!(parse_result("P|1").is_err());
        assert!(matches!(
            parse_result("R|8|^^^Glucose|133|mg/dL^P||B/X||2012"),
            Err(Error::InvalidDateTime)
        ));
    }

    #[test]
    fn contour_usb_session() {
        let (sync, first) = Sync::new(Dialect::ContourUsb);
        assert_eq!(first, EOT);

        // Probes cycle while the meter refuses.
        let Either::Left((sync, step)) = sync.advance(&[NAK]) else {
            panic!();
        };
        assert_eq!(step.reply, 0x00);
        let Either::Left((sync, step)) = sync.advance(&[NAK]) else {
            panic!();
        };
        assert_eq!(step.reply, 0x01);

        let Either::Left((sync, step)) = sync.advance(&[ENQ]) else {
            panic!();
        };
        assert_eq!(step, Step { reply: ACK, record: None });

        let Either::Left((sync, step)) = sync.advance(&frame(1, "H|\\^&", ETB)) else {
            panic!();
        };
        assert_eq!(step.reply, ACK);
        assert_eq!(step.record.as_deref(), Some("H|\\^&"));

        let mut corrupt = frame(2, "P|1", ETB);
        corrupt[4] = b'2';
        let Either::Left((sync, step)) = sync.advance(&corrupt) else {
            panic!();
        };
        assert_eq!(step, Step { reply: NAK, record: None });

        let Either::Left((sync, step)) = sync.advance(&frame(2, "P|1", ETB)) else {
            panic!();
        };
        assert_eq!(step.record.as_deref(), Some("P|1"));

        assert_eq!(sync.advance(&[EOT]).right(), Some(None));
    }

    #[test]
    fn next_one_session() {
        let (sync, first) = Sync::new(Dialect::NextOne);
        assert_eq!(first, ACK);

        let Either::Left((sync, step)) = sync.advance(b"garbage") else {
            panic!();
        };
        assert_eq!(step.reply, NAK);

        let Either::Left((sync, step)) =
            sync.advance(&frame(1, "R|1|^^^Glucose|100|mg/dL^P||||20190922130459", ETB))
        else {
            panic!();
        };
        assert_eq!(step.reply, ACK);
        assert!(step.record.is_some());

        assert_eq!(
            sync.advance(&frame(2, "L|1||N", ETX)).right(),
            Some(Some(ACK))
        );
    }
}
