//! Records of the FreeStyle Libre, Precision Neo and InsuLinx meters.
//!
//! Every record is a row of a multirecord reply. Libre rows share a common
//! header (device id, record type and timestamp); the remaining positions
//! depend on the query and on the record type.

use chrono::{NaiveDate, NaiveDateTime};
use csv::StringRecord;
use log::warn;

use super::fields::FromFields;
use crate::{
    Error, GlucoseReading, KetoneReading, MeasurementMethod, Reading, TimeAdjustment, Unit,
};

const TIME_ADJUSTMENT: u8 = 5;
const READING: u8 = 2;

/// Ketone values are reported in an idiosyncratic scale.
pub fn ketone_mmol(raw: u32) -> f64 {
    (raw as f64 + 1.0) / 2.0 / 10.0
}

/// Unit reported by `$uom?` on the Libre family.
pub fn parse_unit(message: &str) -> Result<Unit, Error> {
    match super::freestyle::reply_line(message) {
        "0" => Ok(Unit::MmolL),
        "1" => Ok(Unit::MgDl),
        other => Err(Error::InvalidGlucoseUnit(other.to_owned())),
    }
}

fn datetime(
    year: u32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
) -> Result<NaiveDateTime, Error> {
    NaiveDate::from_ymd_opt(2000 + year as i32, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .ok_or(Error::InvalidDateTime)
}

#[derive(Debug, Default, FromFields)]
struct Header {
    #[field(0)]
    device_id: Option<i64>,
    #[field(1)]
    kind: Option<u8>,
    #[field(2)]
    month: Option<u32>,
    #[field(3)]
    day: Option<u32>,
    #[field(4)]
    year: Option<u32>,
    #[field(5)]
    hour: Option<u32>,
    #[field(6)]
    minute: Option<u32>,
    #[field(7)]
    second: Option<u32>,
}

impl Header {
    fn parse(record: &StringRecord) -> Result<Option<(i64, u8, NaiveDateTime)>, Error> {
        let header = Header::from_fields(record.iter().take(8))?;

        let (
            Some(device_id),
            Some(kind),
            Some(month),
            Some(day),
            Some(year),
            Some(hour),
            Some(minute),
            Some(second),
        ) = (
            header.device_id,
            header.kind,
            header.month,
            header.day,
            header.year,
            header.hour,
            header.minute,
            header.second,
        )
        else {
            return Ok(None);
        };

        Ok(Some((
            device_id,
            kind,
            datetime(year, month, day, hour, minute, second)?,
        )))
    }
}

#[derive(Debug, Default, FromFields)]
struct HistoryEntry {
    #[field(13)]
    value: Option<u32>,
    #[field(15)]
    errors: Option<u32>,
}

/// Parse a `$history?` row: a sensor reading, or `None` for rows flagged
/// with errors or too short to carry a reading.
pub fn parse_history(record: &StringRecord) -> Result<Option<GlucoseReading>, Error> {
    let Some((device_id, _, timestamp)) = Header::parse(record)? else {
        return Ok(None);
    };

    let entry = HistoryEntry::from_fields(record.iter())?;
    let (Some(value), Some(0)) = (entry.value, entry.errors) else {
        return Ok(None);
    };

    Ok(Some(
        GlucoseReading::new(timestamp, value as f64)
            .with_comment("(Sensor)")
            .with_method(MeasurementMethod::Cgm)
            .with_extra("device_id", device_id),
    ))
}

#[derive(Debug, Default, FromFields)]
struct ReadingEntry {
    #[field(9)]
    reading_type: Option<u8>,
    #[field(12)]
    value: Option<u32>,
    #[field(15)]
    sport: Option<u8>,
    #[field(16)]
    medication: Option<u8>,
    #[field(17)]
    rapid_acting: Option<u8>,
    #[field(18)]
    long_acting: Option<u8>,
    #[field(19)]
    custom_comments: Option<u8>,
    #[field(23)]
    double_long_acting_insulin: Option<u32>,
    #[field(25)]
    food: Option<u8>,
    #[field(26)]
    carbs: Option<u32>,
    #[field(28)]
    errors: Option<u32>,
}

/// Present on reading records only when the rapid-acting flag is set.
#[derive(Debug, Default, FromFields)]
struct RapidInsulin {
    #[field(43)]
    double_rapid_acting_insulin: Option<u32>,
}

#[derive(Debug, Default, FromFields)]
struct TimeAdjustmentEntry {
    #[field(9)]
    month: Option<u32>,
    #[field(10)]
    day: Option<u32>,
    #[field(11)]
    year: Option<u32>,
    #[field(12)]
    hour: Option<u32>,
    #[field(13)]
    minute: Option<u32>,
    #[field(14)]
    second: Option<u32>,
}

const CUSTOM_COMMENTS: usize = 29;

/// Parse an `$arresult?` row. Only readings and clock changes are exposed;
/// other record types, and readings flagged with errors, yield `None`.
pub fn parse_arresult(record: &StringRecord) -> Result<Option<Reading>, Error> {
    let Some((device_id, kind, timestamp)) = Header::parse(record)? else {
        return Ok(None);
    };

    match kind {
        READING => parse_reading(record, device_id, timestamp),
        TIME_ADJUSTMENT => {
            let entry = TimeAdjustmentEntry::from_fields(record.iter().take(15))?;

            let (Some(month), Some(day), Some(year), Some(hour), Some(minute), Some(second)) = (
                entry.month,
                entry.day,
                entry.year,
                entry.hour,
                entry.minute,
                entry.second,
            ) else {
                warn!("Ignoring truncated time adjustment record");
                return Ok(None);
            };

            let old = datetime(year, month, day, hour, minute, second)?;
            Ok(Some(
                TimeAdjustment::new(timestamp, old)
                    .with_extra("device_id", device_id)
                    .into(),
            ))
        }
        _ => Ok(None),
    }
}

fn parse_reading(
    record: &StringRecord,
    device_id: i64,
    timestamp: NaiveDateTime,
) -> Result<Option<Reading>, Error> {
    let entry = ReadingEntry::from_fields(record.iter().take(CUSTOM_COMMENTS))?;

    let (
        Some(reading_type),
        Some(value),
        Some(sport),
        Some(medication),
        Some(rapid_acting),
        Some(long_acting),
        Some(custom_comments),
        Some(double_long_acting_insulin),
        Some(food),
        Some(carbs),
        Some(errors),
    ) = (
        entry.reading_type,
        entry.value,
        entry.sport,
        entry.medication,
        entry.rapid_acting,
        entry.long_acting,
        entry.custom_comments,
        entry.double_long_acting_insulin,
        entry.food,
        entry.carbs,
        entry.errors,
    )
    else {
        warn!("Ignoring truncated reading record");
        return Ok(None);
    };

    let rapid_insulin = if rapid_acting != 0 {
        RapidInsulin::from_fields(record.iter())?.double_rapid_acting_insulin
    } else {
        None
    };

    if errors != 0 {
        return Ok(None);
    }

    let mut comments = vec![
        match reading_type {
            0 => "(Blood)",
            1 => "(Ketone)",
            2 => "(Scan)",
            _ => return Ok(None),
        }
        .to_owned(),
    ];

    for i in 0..6 {
        if custom_comments & (1 << i) != 0 {
            comments.push(record.get(CUSTOM_COMMENTS + i).unwrap_or_default().to_owned());
        }
    }

    if sport != 0 {
        comments.push("Sport".to_owned());
    }

    if medication != 0 {
        comments.push("Medication".to_owned());
    }

    if food != 0 {
        comments.push(match carbs {
            0 => "Food".to_owned(),
            grams => format!("Food ({grams} g)"),
        });
    }

    if long_acting != 0 {
        comments.push(match double_long_acting_insulin {
            0 => "Long-acting insulin".to_owned(),
            units => format!("Long-acting insulin ({:.1})", units as f64 / 2.0),
        });
    }

    if rapid_acting != 0 {
        comments.push(match rapid_insulin {
            Some(units) => format!("Rapid-acting insulin ({:.1})", units as f64 / 2.0),
            None => "Rapid-acting insulin".to_owned(),
        });
    }

    let comment = comments.join("; ");

    let reading: Reading = match reading_type {
        1 => KetoneReading::new(timestamp, ketone_mmol(value))
            .with_comment(comment)
            .with_extra("device_id", device_id)
            .into(),
        2 => GlucoseReading::new(timestamp, value as f64)
            .with_comment(comment)
            .with_method(MeasurementMethod::Cgm)
            .with_extra("device_id", device_id)
            .into(),
        _ => GlucoseReading::new(timestamp, value as f64)
            .with_comment(comment)
            .with_extra("device_id", device_id)
            .into(),
    };

    Ok(Some(reading))
}

#[derive(Debug, Default, FromFields)]
struct NeoEntry {
    #[field(0)]
    kind: Option<u8>,
    #[field(2)]
    month: Option<u32>,
    #[field(3)]
    day: Option<u32>,
    #[field(4)]
    year: Option<u32>,
    #[field(5)]
    hour: Option<u32>,
    #[field(6)]
    minute: Option<u32>,
    #[field(8)]
    value: Option<u32>,
}

/// Parse a Precision Neo `$result?` row; type `7` is glucose, type `9`
/// ketone, anything else is skipped.
pub fn parse_neo_result(record: &StringRecord) -> Result<Option<Reading>, Error> {
    if !matches!(record.get(0), Some("7" | "9")) {
        return Ok(None);
    }

    let entry = NeoEntry::from_fields(record.iter().take(9))?;
    let (Some(kind), Some(month), Some(day), Some(year), Some(hour), Some(minute), Some(value)) = (
        entry.kind,
        entry.month,
        entry.day,
        entry.year,
        entry.hour,
        entry.minute,
        entry.value,
    ) else {
        Err(Error::invalid(format!(
            "result record of {} fields",
            record.len()
        )))?
    };

    let timestamp = datetime(year, month, day, hour, minute, 0)?;

    Ok(Some(match kind {
        9 => KetoneReading::new(timestamp, ketone_mmol(value)).into(),
        _ => GlucoseReading::new(timestamp, value as f64).into(),
    }))
}

/// Number of fields of an InsuLinx result.
const INSULINX_FIELDS: usize = 16;

#[derive(Debug, Default, FromFields)]
struct InsulinxEntry {
    #[field(2)]
    month: Option<u32>,
    #[field(3)]
    day: Option<u32>,
    #[field(4)]
    year: Option<u32>,
    #[field(5)]
    hour: Option<u32>,
    #[field(6)]
    minute: Option<u32>,
    #[field(13)]
    value: Option<u32>,
}

/// Parse an InsuLinx `$result?` row; only type `0` carries a glucose
/// reading.
pub fn parse_insulinx_result(record: &StringRecord) -> Result<Option<GlucoseReading>, Error> {
    if record.get(0) != Some("0") {
        return Ok(None);
    }

    if record.len() != INSULINX_FIELDS {
        Err(Error::invalid(format!(
            "result record of {} fields, {INSULINX_FIELDS} expected",
            record.len()
        )))?
    }

    let entry = InsulinxEntry::from_fields(record.iter())?;
    let (Some(month), Some(day), Some(year), Some(hour), Some(minute), Some(value)) = (
        entry.month,
        entry.day,
        entry.year,
        entry.hour,
        entry.minute,
        entry.value,
    ) else {
        Err(Error::invalid("incomplete result record"))?
    };

    Ok(Some(GlucoseReading::new(
        datetime(year, month, day, hour, minute, 0)?,
        value as f64,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Meal;

    fn record(fields: &str) -> StringRecord {
        StringRecord::from(fields.split(',').collect::<Vec<_>>())
    }

    /// A reading row of 44 fields, with the given overrides.
    fn arresult(overrides: &[(usize, &str)]) -> StringRecord {
        let mut fields = vec!["0"; 44];
        fields[..8].copy_from_slice(&["1234", "2", "3", "15", "18", "10", "20", "30"]);
        for &(i, v) in overrides {
            fields[i] = v;
        }
        StringRecord::from(fields)
    }

    #[test]
    fn ketone_scale() {
        assert!((ketone_mmol(10) - 0.55).abs() < 1e-9);
    }

    #[test]
    fn libre_units() {
        assert_eq!(parse_unit("0\r\n").unwrap(), Unit::MmolL);
        assert_eq!(parse_unit("1\r\n").unwrap(), Unit::MgDl);
        assert!(matches!(
            parse_unit("2\r\n"),
            Err(Error::InvalidGlucoseUnit(_))
        ));
    }

    #[test]
    fn history_rows() {
        let reading = parse_history(&record("1234,3,3,15,18,10,20,30,0,0,0,0,0,104,0,0"))
            .unwrap()
            .unwrap();

        assert_eq!(reading.timestamp.to_string(), "2018-03-15 10:20:30");
        assert_eq!(reading.value, 104.0);
        assert_eq!(reading.comment, "(Sensor)");
        assert_eq!(reading.measure_method, MeasurementMethod::Cgm);
        assert_eq!(reading.meal, Meal::None);

        assert!(parse_history(&record("1234,3,3,15,18,10,20,30,0,0,0,0,0,104,0,1"))
            .unwrap()
            .is_none());
        assert!(parse_history(&record("1234,3,3,15,18,10,20,30"))
            .unwrap()
            .is_none());
        assert!(parse_history(&record("1234,3,x,15,18,10,20,30")).is_err());
    }

    #[test]
    fn scan_readings() {
        let reading = parse_arresult(&arresult(&[(9, "2"), (12, "120")]))
            .unwrap()
            .unwrap();

        let Reading::Glucose(reading) = reading else {
            panic!("expected a glucose reading");
        };
        assert_eq!(reading.value, 120.0);
        assert_eq!(reading.comment, "(Scan)");
        assert_eq!(reading.measure_method, MeasurementMethod::Cgm);
    }

    #[test]
    fn ketone_readings() {
        let reading = parse_arresult(&arresult(&[(9, "1"), (12, "10")]))
            .unwrap()
            .unwrap();

        let Reading::Ketone(reading) = reading else {
            panic!("expected a ketone reading");
        };
        assert!((reading.value - 0.55).abs() < 1e-9);
        assert_eq!(reading.comment, "(Ketone)");
    }

    #[test]
    fn reading_comments() {
        let reading = parse_arresult(&arresult(&[
            (9, "0"),
            (12, "95"),
            (15, "1"),
            (16, "1"),
            (17, "1"),
            (18, "1"),
            (19, "5"),
            (23, "7"),
            (25, "1"),
            (26, "40"),
            (29, "Coffee"),
            (30, "Unused"),
            (31, "Late"),
            (43, "9"),
        ]))
        .unwrap()
        .unwrap();

        let Reading::Glucose(reading) = reading else {
            panic!("expected a glucose reading");
        };
        assert_eq!(reading.measure_method, MeasurementMethod::BloodSample);
        assert_eq!(
            reading.comment,
            "(Blood); Coffee; Late; Sport; Medication; Food (40 g); \
             Long-acting insulin (3.5); Rapid-acting insulin (4.5)"
        );
    }

    #[test]
    fn rapid_insulin_without_dose() {
        let full = arresult(&[(9, "0"), (17, "1"), (25, "1")]);
        let mut fields: Vec<&str> = full.iter().collect();
        fields.truncate(40);

        let reading = parse_arresult(&StringRecord::from(fields)).unwrap().unwrap();
        let Reading::Glucose(reading) = reading else {
            panic!("expected a glucose reading");
        };
        assert_eq!(reading.comment, "(Blood); Food; Rapid-acting insulin");
    }

    #[test]
    fn skipped_records() {
        assert!(parse_arresult(&arresult(&[(9, "2"), (28, "1")]))
            .unwrap()
            .is_none());
        assert!(parse_arresult(&arresult(&[(9, "3")])).unwrap().is_none());
        assert!(parse_arresult(&arresult(&[(1, "6")])).unwrap().is_none());
    }

    #[test]
    fn time_adjustments() {
        let reading = parse_arresult(&arresult(&[
            (1, "5"),
            (9, "3"),
            (10, "15"),
            (11, "18"),
            (12, "9"),
            (13, "20"),
            (14, "30"),
        ]))
        .unwrap()
        .unwrap();

        let Reading::TimeAdjustment(adjustment) = reading else {
            panic!("expected a time adjustment");
        };
        assert_eq!(adjustment.timestamp.to_string(), "2018-03-15 10:20:30");
        assert_eq!(adjustment.old_timestamp.to_string(), "2018-03-15 09:20:30");
    }

    #[test]
    fn neo_results() {
        let reading = parse_neo_result(&record("7,1,3,15,18,10,20,0,123,0"))
            .unwrap()
            .unwrap();
        assert_eq!(reading.timestamp().to_string(), "2018-03-15 10:20:00");

        let Some(Reading::Ketone(ketone)) =
            parse_neo_result(&record("9,2,3,15,18,10,20,0,10")).unwrap()
        else {
            panic!("expected a ketone reading");
        };
        assert!((ketone.value - 0.55).abs() < 1e-9);

        assert!(parse_neo_result(&record("8,2,3")).unwrap().is_none());
        assert!(parse_neo_result(&record("7,2,3")).is_err());
    }

    #[test]
    fn insulinx_results() {
        let reading =
            parse_insulinx_result(&record("0,1,3,15,18,10,20,0,0,0,0,0,0,142,0,0"))
                .unwrap()
                .unwrap();
        assert_eq!(reading.value, 142.0);

        assert!(parse_insulinx_result(&record("0,1,3,15,18,10,20,0,0,0,0,0,0,142,0"))
            .is_err());
        assert!(parse_insulinx_result(&record("1,1,3"))
            .unwrap()
            .is_none());
    }
}
