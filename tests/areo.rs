mod common;

use chrono::NaiveDate;
use common::{Replay, init_logger};
use glucometer::{
    Error, Meal, Reading, Unit,
    avec::{Meter, areo::Areo},
    sans::{areo, check::crc8_maxim},
};

/// Bracketed response carrying `content` lines.
fn raw_response(content: &[&[u8]]) -> Vec<u8> {
    let mut r = b"[\r\n".to_vec();
    for line in content {
        r.extend_from_slice(line);
        r.extend_from_slice(b"\r\n");
    }

    let checksum = crc8_maxim(&r);
    r.extend(format!("{checksum:02X}\r\n]\r\n").into_bytes());
    r
}

fn response(content: &[&str]) -> Vec<u8> {
    let content: Vec<&[u8]> = content.iter().map(|l| l.as_bytes()).collect();
    raw_response(&content)
}

const READINGS: [&str; 3] = [
    "Glu,104,mg/dL,02,200101,0830",
    "Ket,0.5,mmol/L,00,200101,0845",
    "Glu,187,mg/dL,08,200101,1245",
];

#[test]
fn reads_info_and_readings() {
    init_logger();

    let mut input = response(&["GlucoMen areo,1,2,SN12345 ,V1.02"]);
    input.extend(response(&READINGS));
    input.extend(response(&READINGS));

    let mut meter = Meter::new(Areo::new(Replay::new(input)));
    meter.connect().unwrap();

    let info = meter.info().unwrap();
    assert_eq!(info.model, "GlucoMen areo");
    assert_eq!(info.serial_number, "SN12345");
    assert_eq!(info.version_info, ["V1.02"]);
    assert_eq!(info.native_unit, Unit::MgDl);

    let readings: Vec<Reading> = meter.readings().unwrap().map(Result::unwrap).collect();
    let [Reading::Glucose(first), Reading::Glucose(second)] = readings.as_slice() else {
        panic!("two glucose readings expected, got {readings:?}");
    };
    assert_eq!(first.timestamp.to_string(), "2020-01-01 08:30:00");
    assert_eq!(first.value, 104.0);
    assert_eq!(first.meal, Meal::Before);
    assert_eq!(second.value, 187.0);
    assert_eq!(second.comment, "Exercise");

    let port = meter.into_inner().into_inner();
    assert_eq!(port.unread(), 0);
    assert_eq!(port.written, [0xA2, 0x80, 0x80]);
}

#[test]
fn reports_empty_memory() {
    init_logger();

    let mut input = response(&["GlucoMen areo,1,2,SN12345 ,V1.02"]);
    input.extend(raw_response(&[areo::NO_READINGS]));
    input.extend(raw_response(&[areo::NO_READINGS]));

    let mut meter = Meter::new(Areo::new(Replay::new(input)));
    meter.connect().unwrap();

    assert_eq!(meter.info().unwrap().native_unit, Unit::MgDl);
    assert_eq!(meter.readings().unwrap().count(), 0);
}

#[test]
fn sets_clock() {
    init_logger();

    let mut meter = Meter::new(Areo::new(Replay::new(b"P")));
    meter.connect().unwrap();

    let t = NaiveDate::from_ymd_opt(2021, 6, 7)
        .unwrap()
        .and_hms_opt(8, 9, 0)
        .unwrap();
    assert_eq!(meter.set_datetime(t).unwrap(), t);
    assert!(matches!(meter.datetime(), Err(Error::NotImplemented(_))));

    let port = meter.into_inner().into_inner();
    assert_eq!(port.written, areo::set_datetime(t));
    assert!(port.written.starts_with(&[0xC2, 0xA1]));
}

#[test]
fn clock_is_set_to_the_minute() {
    let mut meter = Meter::new(Areo::new(Replay::new(b"P")));
    meter.connect().unwrap();

    let t = NaiveDate::from_ymd_opt(2021, 6, 7)
        .unwrap()
        .and_hms_milli_opt(8, 9, 42, 500)
        .unwrap();
    let minute = NaiveDate::from_ymd_opt(2021, 6, 7)
        .unwrap()
        .and_hms_opt(8, 9, 0)
        .unwrap();
    assert_eq!(meter.set_datetime(t).unwrap(), minute);

    let port = meter.into_inner().into_inner();
    assert_eq!(port.written, areo::set_datetime(minute));
}

#[test]
fn rejects_refused_clock() {
    let mut meter = Meter::new(Areo::new(Replay::new(b"F")));
    meter.connect().unwrap();

    let t = NaiveDate::from_ymd_opt(2021, 6, 7)
        .unwrap()
        .and_hms_opt(8, 9, 0)
        .unwrap();
    assert!(meter.set_datetime(t).unwrap_err().is_invalid_response());
}

#[test]
fn rejects_corrupted_responses() {
    let mut input = response(&[READINGS[0]]);
    input[5] = b'5';

    let mut meter = Meter::new(Areo::new(Replay::new(input)));
    meter.connect().unwrap();

    assert!(matches!(
        meter.readings().err(),
        Some(Error::InvalidChecksum { .. })
    ));
}
