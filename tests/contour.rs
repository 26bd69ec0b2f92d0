mod common;

use common::{ReplayHid, init_logger};
use glucometer::{
    Error, Reading, Unit,
    avec::{
        Meter,
        contour::{BayerContour, ContourUsb},
    },
    sans::{
        check::byte_sum_mod256,
        contour::{Dialect, MAX_DATA, encode_report},
        lis::{ACK, CR, ENQ, EOT, ETB, ETX, LF, STX},
    },
};

/// Queue a block of meter output, split into tagged reports.
fn push_block(hid: &mut ReplayHid, data: &[u8]) {
    for chunk in data.chunks(MAX_DATA) {
        let mut report = b"ABC".to_vec();
        report.push(chunk.len() as u8);
        report.extend_from_slice(chunk);
        hid.push(&report);
    }
}

/// LIS1-A frame `STX FN text end C1 C2 CR LF`.
fn lis_frame(number: u8, text: &str, end: u8) -> Vec<u8> {
    let mut checked = vec![b'0' + number];
    checked.extend_from_slice(text.as_bytes());
    checked.push(end);

    let mut r = vec![STX];
    r.extend_from_slice(&checked);
    r.extend(format!("{:02X}", byte_sum_mod256(&checked)).into_bytes());
    r.extend([CR, LF]);
    r
}

/// Download frame `STX FN text CR end C1 C2 CR LF`.
fn download_frame(number: u8, text: &str, end: u8) -> Vec<u8> {
    lis_frame(number, &format!("{text}\r"), end)
}

fn sent(hid: &ReplayHid) -> Vec<u8> {
    hid.written
        .iter()
        .map(|r| {
            assert_eq!(r[..4], *b"ABC\x01");
            r[4]
        })
        .collect()
}

#[test]
fn bayer_contour_reads_pushed_memory() {
    init_logger();

    let mut hid = ReplayHid::new();
    push_block(&mut hid, &[ENQ]);
    push_block(
        &mut hid,
        &lis_frame(
            1,
            concat!(
                r"H|\^&||abcdef|Bayer7390^01.26\01.05\08.02.20^7390-2408612^7397-|",
                "A=1^C=62^G=0^I=0200^R=0^S=1^U=1^V=10600^X=070070070070180130180250^",
                "Y=360126090050099050300089^Z=1|2000|||||P|1|201708242247\r",
                "P|1\r",
            ),
            ETB,
        ),
    );
    push_block(
        &mut hid,
        &lis_frame(
            2,
            concat!(
                "R|1|^^^Glucose|196|mg/dL^P||A/M0/T1||201504171154\r",
                "R|2|^^^Glucose|88|mg/dL^P||B/M0/T1||201504181907\r",
                "L|1||N\r",
            ),
            ETX,
        ),
    );
    push_block(&mut hid, &[EOT]);

    let mut meter = Meter::new(BayerContour::new(hid));
    meter.connect().unwrap();

    let info = meter.info().unwrap();
    assert_eq!(info.model, "Bayer Contour");
    assert_eq!(info.serial_number, "7390-2408612");
    assert_eq!(
        info.version_info,
        ["Software version: Bayer7390 DE: 01.26 AE: 01.05 GP: 08.02.20"]
    );
    assert_eq!(info.native_unit, Unit::MgDl);

    let readings: Vec<Reading> = meter.readings().unwrap().map(Result::unwrap).collect();
    let [Reading::Glucose(first), Reading::Glucose(second)] = readings.as_slice() else {
        panic!("two glucose readings expected, got {readings:?}");
    };
    assert_eq!(first.timestamp.to_string(), "2015-04-17 11:54:00");
    assert_eq!(first.value, 196.0);
    assert_eq!(second.value, 88.0);

    assert!(matches!(meter.datetime(), Err(Error::NotImplemented(_))));

    let hid = meter.into_inner().into_inner();
    assert_eq!(hid.pending(), 0);
    assert_eq!(sent(&hid), [ACK, ACK, ACK]);
}

#[test]
fn bayer_contour_rejects_unannounced_transfer() {
    let mut hid = ReplayHid::new();
    push_block(&mut hid, &lis_frame(1, "H|\\^&\r", ETX));

    let mut meter = Meter::new(BayerContour::new(hid));
    assert!(meter.connect().unwrap_err().is_invalid_response());
}

const HEADER: &str = concat!(
    r"H|\^&||7w3LBL|Bayer7390^01.24\01.04\09.02.20^7390-2336773^7403-|",
    "A=1^C=63^G=1^I=0200^R=0^S=1^U=0^V=10600^X=070070070070180130150250^",
    "Y=360126090050099050300089^Z=1|1714||||||1|201909221304",
);

fn info_block() -> Vec<u8> {
    let mut r = vec![EOT];
    r.extend(download_frame(1, HEADER, ETB));
    r.push(ENQ);
    r
}

#[test]
fn contour_usb_downloads_results() {
    init_logger();

    let mut hid = ReplayHid::new();
    push_block(&mut hid, &[ACK]);
    push_block(&mut hid, &info_block());

    push_block(&mut hid, &[ENQ]);
    push_block(&mut hid, &download_frame(1, HEADER, ETB));
    push_block(
        &mut hid,
        &download_frame(2, "R|1|^^^Glucose|133|mg/dL^P||B/X||201202052034", ETB),
    );
    push_block(
        &mut hid,
        &download_frame(3, "R|2|^^^Glucose|101|mg/dL^P||||201202061230", ETB),
    );
    push_block(&mut hid, &download_frame(4, "L|1||N", ETX));
    push_block(&mut hid, &[EOT]);

    let mut meter = Meter::new(ContourUsb::new(hid, Dialect::ContourUsb));
    meter.connect().unwrap();

    let info = meter.info().unwrap();
    assert_eq!(info.model, "Contour USB");
    assert_eq!(info.serial_number, "7390-2336773");
    assert_eq!(info.version_info, ["Meter versions: 01.24 - 01.04 - 09.02.20"]);
    assert_eq!(info.native_unit, Unit::MgDl);

    assert_eq!(meter.datetime().unwrap().to_string(), "2019-09-22 13:04:00");

    let mut readings = meter.readings().unwrap();

    let Some(Ok(Reading::Glucose(first))) = readings.next() else {
        panic!("glucose reading expected");
    };
    assert_eq!(first.value, 133.0);
    assert_eq!(first.comment, "B/X");
    assert_eq!(first.timestamp.to_string(), "2012-02-05 20:34:00");

    let Some(Ok(Reading::Glucose(second))) = readings.next() else {
        panic!("glucose reading expected");
    };
    assert_eq!(second.value, 101.0);
    assert_eq!(second.comment, "");
    assert!(readings.next().is_none());
    drop(readings);

    let hid = meter.into_inner().into_inner();
    assert_eq!(hid.pending(), 0);
    assert_eq!(sent(&hid), [EOT, EOT, EOT, ACK, ACK, ACK, ACK, ACK]);
}

#[test]
fn contour_usb_gives_up_without_header() {
    let mut hid = ReplayHid::new();
    for _ in 0..32 {
        push_block(&mut hid, &[ACK]);
    }

    let mut meter = Meter::new(ContourUsb::new(hid, Dialect::NextOne));
    meter.connect().unwrap();

    assert!(matches!(meter.info(), Err(Error::ConnectionFailed(_))));
}

#[test]
fn reports_carry_single_control_bytes() {
    assert_eq!(encode_report(&[EOT]).unwrap()[..5], *b"ABC\x01\x04");
}
