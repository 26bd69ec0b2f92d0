//! CSV reports written by Accu-Chek meters in mass-storage "Reports" mode.
//!
//! A report starts with a title line, then `serial;date;time;...`, then a
//! `;`-separated table with a header row.

use chrono::NaiveDateTime;
use csv::StringRecord;

use crate::{Error, GlucoseReading, Meal, Unit};

const DATETIME_FORMAT: &str = "%d.%m.%Y %H:%M";

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub serial_number: String,
    /// Unit of the first reading, if any.
    pub unit: Option<Unit>,
    pub readings: Vec<GlucoseReading>,
}

/// Positions of the columns in use. Header names are trimmed, as some
/// carry trailing padding.
struct Columns {
    date: usize,
    time: usize,
    result: usize,
    unit: usize,
    before_meal: usize,
    after_meal: usize,
}

impl Columns {
    fn from_headers(headers: &StringRecord) -> Result<Self, Error> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| Error::invalid(format!("report lacks a {name:?} column")))
        };

        Ok(Self {
            date: find("Date")?,
            time: find("Time")?,
            result: find("Result")?,
            unit: find("Unit")?,
            before_meal: find("Before meal")?,
            after_meal: find("After meal")?,
        })
    }
}

fn column<'r>(row: &'r StringRecord, i: usize) -> &'r str {
    row.get(i).unwrap_or_default()
}

fn parse_row(columns: &Columns, row: &StringRecord) -> Result<Option<GlucoseReading>, Error> {
    let result = column(row, columns.result);
    if result.is_empty() {
        return Ok(None);
    }

    let datetime = format!(
        "{} {}",
        column(row, columns.date),
        column(row, columns.time)
    );
    let timestamp = NaiveDateTime::parse_from_str(&datetime, DATETIME_FORMAT)
        .map_err(|_| Error::InvalidDateTime)?;

    let value: f64 = result
        .parse()
        .map_err(|_| Error::invalid(format!("invalid result {result:?}")))?;
    let unit: Unit = column(row, columns.unit).parse()?;

    let meal = match (
        !column(row, columns.before_meal).is_empty(),
        !column(row, columns.after_meal).is_empty(),
    ) {
        (true, true) => Err(Error::invalid(format!(
            "reading at {timestamp} both before and after meal"
        )))?,
        (true, false) => Meal::Before,
        (false, true) => Meal::After,
        (false, false) => Meal::None,
    };

    Ok(Some(
        GlucoseReading::from_unit(timestamp, value, unit).with_meal(meal),
    ))
}

pub fn parse_report(text: &str) -> Result<Report, Error> {
    let mut lines = text.splitn(3, '\n');

    let (Some(_), Some(identity), Some(table)) = (lines.next(), lines.next(), lines.next()) else {
        Err(Error::invalid("truncated report"))?
    };

    let serial_number = identity.split(';').next().unwrap_or_default().trim().to_owned();

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .quoting(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(table.as_bytes());

    let malformed = |e: csv::Error| Error::invalid(format!("malformed report ({e})"));

    let columns = Columns::from_headers(reader.headers().map_err(malformed)?)?;

    let mut report = Report {
        serial_number,
        unit: None,
        readings: Vec::new(),
    };

    for row in reader.records() {
        let row = row.map_err(malformed)?;

        if report.unit.is_none() {
            report.unit = column(&row, columns.unit).parse().ok();
        }

        if let Some(reading) = parse_row(&columns, &row)? {
            report.readings.push(reading);
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "Accu-Chek Mobile;Export;;;;;;;;\r\n\
        UI00123456;17.04.2015;12:00;;;;;;;\r\n\
        Date;Time;Result;Unit;Temperature warning;Out of target range;Other;Before meal;After meal;Control test   \r\n\
        16.04.2015;08:15;6.2;mmol/l;;;;X;;\r\n\
        16.04.2015;13:40;;mmol/l;;;;;;\r\n\
        16.04.2015;14:05;9.0;mmol/l;;X;;;X;\r\n";

    #[test]
    fn parses_report() {
        let report = parse_report(REPORT).unwrap();

        assert_eq!(report.serial_number, "UI00123456");
        assert_eq!(report.unit, Some(Unit::MmolL));
        assert_eq!(report.readings.len(), 2);

        let first = &report.readings[0];
        assert_eq!(first.timestamp.to_string(), "2015-04-16 08:15:00");
        assert_eq!(first.value, 111.6);
        assert_eq!(first.meal, Meal::Before);

        assert_eq!(report.readings[1].meal, Meal::After);
        assert_eq!(report.readings[1].value, 162.0);
    }

    #[test]
    fn rejects_conflicting_meal_flags() {
        let report = REPORT.replace("6.2;mmol/l;;;;X;;", "6.2;mmol/l;;;;X;X;");
        assert!(parse_report(&report).unwrap_err().is_invalid_response());
    }

    #[test]
    fn rejects_missing_columns() {
        let report = REPORT.replace("Before meal", "Pre");
        assert!(parse_report(&report).is_err());
        assert!(parse_report("title only").is_err());
    }
}
