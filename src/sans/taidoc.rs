//! TaiDoc TD-42xx packets.
//!
//! Every packet is eight bytes: `0x51, command, message[4], direction,
//! checksum`, the checksum being the byte sum of the first seven.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use tartan_bitfield::bitfield;
use zerocopy::FromBytes;

use super::{FrameError, check::byte_sum_mod256};
use crate::{Error, Meal};

pub const START: u8 = 0x51;

pub const DIRECTION_IN: u8 = 0xA5;
pub const DIRECTION_OUT: u8 = 0xA3;

pub const PACKET_SIZE: usize = 8;

pub const CONNECT: u8 = 0x22;
pub const GET_DATETIME: u8 = 0x23;
pub const GET_MODEL: u8 = 0x24;
pub const GET_READING_DATETIME: u8 = 0x25;
pub const GET_READING_VALUE: u8 = 0x26;
pub const GET_READING_COUNT: u8 = 0x2B;
pub const SET_DATETIME: u8 = 0x33;
pub const CLEAR_MEMORY: u8 = 0x52;

/// Commands the meter may answer a connection request with.
pub const CONNECT_RESPONSES: [u8; 3] = [0x22, 0x24, 0x54];

pub const EMPTY_MESSAGE: [u8; 4] = [0; 4];

#[repr(C, packed)]
#[derive(FromBytes)]
struct RawPacket {
    start: u8,
    command: u8,
    message: [u8; 4],
    direction: u8,
    checksum: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    pub command: u8,
    pub message: [u8; 4],
}

impl Packet {
    pub fn new(command: u8, message: [u8; 4]) -> Self {
        Self { command, message }
    }

    /// Encode the packet for sending to the meter.
    pub fn encode(&self) -> [u8; PACKET_SIZE] {
        let [a, b, c, d] = self.message;
        let mut r = [START, self.command, a, b, c, d, DIRECTION_OUT, 0];
        r[7] = byte_sum_mod256(&r[..7]);
        r
    }

    /// Decode a packet received from the meter.
    pub fn decode(r: [u8; PACKET_SIZE]) -> Result<Self, FrameError> {
        let calculated = byte_sum_mod256(&r[..7]);
        let raw: RawPacket = zerocopy::transmute!(r);

        if raw.start != START {
            Err(FrameError::StartMarker(raw.start))?
        }

        if raw.direction != DIRECTION_IN && raw.direction != DIRECTION_OUT {
            Err(FrameError::EndMarker(raw.direction))?
        }

        if raw.checksum != calculated {
            Err(FrameError::Checksum {
                found: raw.checksum as u32,
                calculated: calculated as u32,
            })?
        }

        Ok(Self {
            command: raw.command,
            message: raw.message,
        })
    }
}

bitfield! {
    struct DayWord(u16) {
        [0..5] day: u8,
        [5..9] month: u8,
        [9..16] year: u8,
    }
}

/// Parse a `day_word[le16], minute, hour` timestamp, where the day word packs
/// years since 2000, month and day from the most significant bit down.
pub fn parse_datetime(message: [u8; 4]) -> Result<NaiveDateTime, Error> {
    let [lo, hi, minute, hour] = message;
    let day = DayWord(u16::from_le_bytes([lo, hi]));

    NaiveDate::from_ymd_opt(2000 + day.year() as i32, day.month() as u32, day.day() as u32)
        .and_then(|d| d.and_hms_opt(hour as u32, minute as u32, 0))
        .ok_or(Error::InvalidDateTime)
}

pub fn encode_datetime(t: NaiveDateTime) -> Result<[u8; 4], Error> {
    let year = t.year() - 2000;
    if !(0..128).contains(&year) {
        Err(Error::InvalidDateTime)?
    }

    let mut day = DayWord(0);
    day.set_year(year as u8);
    day.set_month(t.month() as u8);
    day.set_day(t.day() as u8);

    let [lo, hi] = day.0.to_le_bytes();
    Ok([lo, hi, t.minute() as u8, t.hour() as u8])
}

pub fn select_record(id: u16) -> [u8; 4] {
    let [lo, hi] = id.to_le_bytes();
    [lo, hi, 0x00, 0x00]
}

/// Model name, the hex digits of a little-endian word.
pub fn parse_model(message: [u8; 4]) -> String {
    format!("TD-{:x}", u16::from_le_bytes([message[0], message[1]]))
}

pub fn parse_count(message: [u8; 4]) -> u16 {
    u16::from_le_bytes([message[0], message[1]])
}

pub fn parse_value(message: [u8; 4]) -> Result<(u16, Meal), Error> {
    let [lo, hi, _, meal] = message;

    let meal = match meal {
        0x00 => Meal::None,
        0x40 => Meal::Before,
        0x80 => Meal::After,
        other => Err(Error::invalid(format!("unknown meal flag {other:#04x}")))?,
    };

    Ok((u16::from_le_bytes([lo, hi]), meal))
}
