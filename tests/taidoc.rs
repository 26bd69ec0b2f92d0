mod common;

use chrono::NaiveDate;
use common::{Replay, init_logger};
use glucometer::{
    Error, Meal, Reading,
    avec::{Meter, taidoc::Td42xx},
};

const CONNECT: [u8; 16] = [
    0x51, 0x54, 0x00, 0x00, 0x00, 0x00, 0xa5, 0x4a, //
    0x51, 0x24, 0x77, 0x42, 0x00, 0x00, 0xa5, 0xd3,
];

const CONNECT_REQUESTS: [u8; 16] = [
    0x51, 0x22, 0x00, 0x00, 0x00, 0x00, 0xa3, 0x16, //
    0x51, 0x24, 0x00, 0x00, 0x00, 0x00, 0xa3, 0x18,
];

#[test]
fn reads_stored_readings() {
    init_logger();

    let mut input = CONNECT.to_vec();
    input.extend([
        0x51, 0x2b, 0x02, 0x00, 0x00, 0x00, 0xa5, 0x23, //
        0x51, 0x25, 0x6e, 0x26, 0x19, 0x0a, 0xa5, 0xd2, //
        0x51, 0x26, 0x69, 0x00, 0x00, 0x40, 0xa5, 0xc5, //
        0x51, 0x25, 0x6f, 0x26, 0x02, 0x13, 0xa5, 0xc5, //
        0x51, 0x26, 0xf0, 0x00, 0x00, 0x80, 0xa5, 0x8c,
    ]);

    let mut meter = Meter::new(Td42xx::new(Replay::new(input)));
    meter.connect().unwrap();

    assert_eq!(meter.info().unwrap().model, "TaiDoc TD-4277 glucometer");

    let readings: Vec<_> = meter.readings().unwrap().map(Result::unwrap).collect();
    let [Reading::Glucose(first), Reading::Glucose(second)] = &readings[..] else {
        panic!("two glucose readings expected, got {readings:?}");
    };

    assert_eq!(first.value, 105.0);
    assert_eq!(first.meal, Meal::Before);
    assert_eq!(first.timestamp.to_string(), "2019-03-14 10:25:00");
    assert_eq!(second.value, 240.0);
    assert_eq!(second.meal, Meal::After);
    assert_eq!(second.timestamp.to_string(), "2019-03-15 19:02:00");

    let port = meter.into_inner().into_inner();
    let mut expected = CONNECT_REQUESTS.to_vec();
    expected.extend([
        0x51, 0x2b, 0x00, 0x00, 0x00, 0x00, 0xa3, 0x1f, //
        0x51, 0x25, 0x00, 0x00, 0x00, 0x00, 0xa3, 0x19, //
        0x51, 0x26, 0x00, 0x00, 0x00, 0x00, 0xa3, 0x1a, //
        0x51, 0x25, 0x01, 0x00, 0x00, 0x00, 0xa3, 0x1a, //
        0x51, 0x26, 0x01, 0x00, 0x00, 0x00, 0xa3, 0x1b,
    ]);
    assert_eq!(port.written, expected);
}

#[test]
fn sets_clock_and_clears_memory() {
    let mut input = CONNECT.to_vec();
    input.extend([
        0x51, 0x33, 0x22, 0x28, 0x04, 0x03, 0xa5, 0x7a, //
        0x51, 0x52, 0x00, 0x00, 0x00, 0x00, 0xa5, 0x48,
    ]);

    let mut meter = Meter::new(Td42xx::new(Replay::new(input)));
    meter.connect().unwrap();

    let t = NaiveDate::from_ymd_opt(2020, 1, 2)
        .unwrap()
        .and_hms_opt(3, 4, 0)
        .unwrap();
    assert_eq!(meter.set_datetime(t).unwrap(), t);
    meter.zero_log().unwrap();

    let port = meter.into_inner().into_inner();
    assert_eq!(
        port.written[16..24],
        [0x51, 0x33, 0x22, 0x28, 0x04, 0x03, 0xa3, 0x78]
    );
}

#[test]
fn rejects_mismatched_response() {
    let mut input = CONNECT.to_vec();
    input.extend([0x51, 0x23, 0x00, 0x00, 0x00, 0x00, 0xa5, 0x19]);

    let mut meter = Meter::new(Td42xx::new(Replay::new(input)));
    meter.connect().unwrap();

    assert!(matches!(meter.zero_log(), Err(Error::InvalidResponse(_))));
}

#[test]
fn rejects_unknown_connect_response() {
    let input = [0x51, 0x23, 0x00, 0x00, 0x00, 0x00, 0xa5, 0x19];
    let mut meter = Meter::new(Td42xx::new(Replay::new(input)));

    assert!(matches!(meter.connect(), Err(Error::ConnectionFailed(_))));
    assert!(!meter.is_connected());
}

#[test]
fn stops_at_first_corrupted_record() {
    let mut input = CONNECT.to_vec();
    input.extend([
        0x51, 0x2b, 0x02, 0x00, 0x00, 0x00, 0xa5, 0x23, //
        0x51, 0x25, 0x6e, 0x26, 0x19, 0x0a, 0xa5, 0x00, //
        0x51, 0x25, 0x6f, 0x26, 0x02, 0x13, 0xa5, 0xc5, //
        0x51, 0x26, 0xf0, 0x00, 0x00, 0x80, 0xa5, 0x8c,
    ]);

    let mut meter = Meter::new(Td42xx::new(Replay::new(input)));
    meter.connect().unwrap();

    let readings: Vec<_> = meter.readings().unwrap().collect();
    let [Err(Error::InvalidChecksum { .. })] = readings.as_slice() else {
        panic!("a single checksum error expected, got {readings:?}");
    };

    let port = meter.into_inner().into_inner();
    assert_eq!(port.unread(), 16);
    assert_eq!(port.written.len(), CONNECT_REQUESTS.len() + 16);
}
