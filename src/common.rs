//! Readings, units and meter descriptions shared by every driver.
//!
//! Glucose values are always stored in mg/dL and converted on output, while
//! ketone values are stored and reported in mmol/L.

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::NaiveDateTime;
use serde::Deserialize;

use crate::Error;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Glucose concentration unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Unit {
    #[default]
    #[serde(rename = "mg/dL", alias = "mgdl", alias = "mg/dl")]
    MgDl,
    #[serde(rename = "mmol/L", alias = "mmoll", alias = "mmol/l")]
    MmolL,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MgDl => "mg/dL",
            Self::MmolL => "mmol/L",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Unit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mg/dl" | "mgdl" => Ok(Self::MgDl),
            "mmol/l" | "mmoll" => Ok(Self::MmolL),
            _ => Err(Error::InvalidGlucoseUnit(s.to_owned())),
        }
    }
}

/// Convert a glucose value between units.
///
/// Conversions to mmol/L are rounded to two decimals, conversions to mg/dL
/// to one.
pub fn convert_glucose_unit(value: f64, from: Unit, to: Unit) -> f64 {
    match (from, to) {
        (Unit::MgDl, Unit::MgDl) | (Unit::MmolL, Unit::MmolL) => value,
        (Unit::MgDl, Unit::MmolL) => round(value / 18.0, 2),
        (Unit::MmolL, Unit::MgDl) => round(value * 18.0, 1),
    }
}

fn round(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Relation of a reading to a meal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Meal {
    #[default]
    None,
    Before,
    After,
}

impl Meal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Before => "Before Meal",
            Self::After => "After Meal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MeasurementMethod {
    #[default]
    BloodSample,
    Cgm,
    Time,
}

impl MeasurementMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BloodSample => "blood sample",
            Self::Cgm => "CGM",
            Self::Time => "time",
        }
    }
}

/// Device-specific value attached to a reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraValue {
    Int(i64),
    Text(String),
}

impl From<i64> for ExtraValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for ExtraValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for ExtraValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

pub type Extra = BTreeMap<String, ExtraValue>;

#[derive(Debug, Clone, PartialEq)]
pub struct GlucoseReading {
    pub timestamp: NaiveDateTime,
    /// Value in mg/dL.
    pub value: f64,
    pub meal: Meal,
    pub comment: String,
    pub measure_method: MeasurementMethod,
    pub extra: Extra,
}

impl GlucoseReading {
    pub fn new(timestamp: NaiveDateTime, value: f64) -> Self {
        Self {
            timestamp,
            value,
            meal: Meal::None,
            comment: String::new(),
            measure_method: MeasurementMethod::BloodSample,
            extra: Extra::new(),
        }
    }

    /// Build a reading from a value expressed in `unit`.
    pub fn from_unit(timestamp: NaiveDateTime, value: f64, unit: Unit) -> Self {
        Self::new(timestamp, convert_glucose_unit(value, unit, Unit::MgDl))
    }

    pub fn with_meal(mut self, meal: Meal) -> Self {
        self.meal = meal;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn with_method(mut self, method: MeasurementMethod) -> Self {
        self.measure_method = method;
        self
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<ExtraValue>) -> Self {
        self.extra.insert(key.to_owned(), value.into());
        self
    }

    pub fn value_as(&self, unit: Unit) -> f64 {
        convert_glucose_unit(self.value, Unit::MgDl, unit)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KetoneReading {
    pub timestamp: NaiveDateTime,
    /// Value in mmol/L.
    pub value: f64,
    pub comment: String,
    pub extra: Extra,
}

impl KetoneReading {
    pub fn new(timestamp: NaiveDateTime, value: f64) -> Self {
        Self {
            timestamp,
            value,
            comment: String::new(),
            extra: Extra::new(),
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<ExtraValue>) -> Self {
        self.extra.insert(key.to_owned(), value.into());
        self
    }
}

/// Change of the meter clock recorded in its log.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeAdjustment {
    /// Clock value after the change.
    pub timestamp: NaiveDateTime,
    pub old_timestamp: NaiveDateTime,
    pub extra: Extra,
}

impl TimeAdjustment {
    pub fn new(timestamp: NaiveDateTime, old_timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            old_timestamp,
            extra: Extra::new(),
        }
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<ExtraValue>) -> Self {
        self.extra.insert(key.to_owned(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Glucose(GlucoseReading),
    Ketone(KetoneReading),
    TimeAdjustment(TimeAdjustment),
}

impl Reading {
    pub fn timestamp(&self) -> NaiveDateTime {
        match self {
            Self::Glucose(r) => r.timestamp,
            Self::Ketone(r) => r.timestamp,
            Self::TimeAdjustment(r) => r.timestamp,
        }
    }

    pub fn measure_method(&self) -> MeasurementMethod {
        match self {
            Self::Glucose(r) => r.measure_method,
            Self::Ketone(_) => MeasurementMethod::BloodSample,
            Self::TimeAdjustment(_) => MeasurementMethod::Time,
        }
    }

    /// Render the reading as one line of comma-separated, quoted fields.
    ///
    /// Glucose values are converted to `unit`; ketone values never are.
    /// Comments are emitted verbatim, embedded quotes included.
    pub fn as_csv(&self, unit: Unit) -> String {
        match self {
            Self::Glucose(r) => format!(
                r#""{}","{:.2}","{}","{}","{}""#,
                r.timestamp.format(TIMESTAMP_FORMAT),
                r.value_as(unit),
                r.meal.as_str(),
                r.measure_method.as_str(),
                r.comment,
            ),
            Self::Ketone(r) => format!(
                r#""{}","{:.2}","","{}","{}""#,
                r.timestamp.format(TIMESTAMP_FORMAT),
                r.value,
                MeasurementMethod::BloodSample.as_str(),
                r.comment,
            ),
            Self::TimeAdjustment(r) => format!(
                r#""{}","","","{}","{}""#,
                r.timestamp.format(TIMESTAMP_FORMAT),
                MeasurementMethod::Time.as_str(),
                r.old_timestamp.format(TIMESTAMP_FORMAT),
            ),
        }
    }
}

impl From<GlucoseReading> for Reading {
    fn from(r: GlucoseReading) -> Self {
        Self::Glucose(r)
    }
}

impl From<KetoneReading> for Reading {
    fn from(r: KetoneReading) -> Self {
        Self::Ketone(r)
    }
}

impl From<TimeAdjustment> for Reading {
    fn from(r: TimeAdjustment) -> Self {
        Self::TimeAdjustment(r)
    }
}

/// Identity of a connected meter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeterInfo {
    pub model: String,
    pub serial_number: String,
    pub version_info: Vec<String>,
    pub native_unit: Unit,
    pub patient_name: Option<String>,
}

impl MeterInfo {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            serial_number: "N/A".to_owned(),
            version_info: Vec::new(),
            native_unit: Unit::MgDl,
            patient_name: None,
        }
    }

    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = serial_number.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version_info.push(version.into());
        self
    }

    pub fn with_native_unit(mut self, unit: Unit) -> Self {
        self.native_unit = unit;
        self
    }

    pub fn with_patient_name(mut self, name: Option<String>) -> Self {
        self.patient_name = name;
        self
    }
}

impl fmt::Display for MeterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let version = if self.version_info.is_empty() {
            "N/A".to_owned()
        } else {
            self.version_info.join("\n    ")
        };

        writeln!(f, "{}", self.model)?;
        writeln!(f, "Serial Number: {}", self.serial_number)?;
        writeln!(f, "Version Information:")?;
        writeln!(f, "    {version}")?;
        write!(f, "Native Unit: {}", self.native_unit)?;

        if let Some(name) = &self.patient_name {
            write!(f, "\nPatient Name: {name}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn timestamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2018, 1, 1)
            .unwrap()
            .and_hms_opt(0, 30, 45)
            .unwrap()
    }

    #[test]
    fn converts_units() {
        assert_eq!(convert_glucose_unit(100.0, Unit::MgDl, Unit::MmolL), 5.56);
        assert_eq!(convert_glucose_unit(5.56, Unit::MmolL, Unit::MgDl), 100.1);
        assert_eq!(convert_glucose_unit(10.0, Unit::MmolL, Unit::MgDl), 180.0);
        assert_eq!(convert_glucose_unit(42.0, Unit::MgDl, Unit::MgDl), 42.0);
        assert_eq!(convert_glucose_unit(42.0, Unit::MmolL, Unit::MmolL), 42.0);
    }

    #[test]
    fn parses_units() {
        assert_eq!("mg/dL".parse::<Unit>().unwrap(), Unit::MgDl);
        assert_eq!("MMOL/L".parse::<Unit>().unwrap(), Unit::MmolL);
        assert!(matches!(
            "mg".parse::<Unit>(),
            Err(Error::InvalidGlucoseUnit(_))
        ));
    }

    #[test]
    fn displays_meter_info_without_serial() {
        let info = MeterInfo::new("Test Meter").with_version("1.0");

        assert_eq!(
            info.to_string(),
            "Test Meter\nSerial Number: N/A\nVersion Information:\n    1.0\nNative Unit: mg/dL"
        );
    }

    #[test]
    fn displays_patient_name() {
        let info = MeterInfo::new("Test Meter")
            .with_serial_number("1234")
            .with_version("1.0")
            .with_version("2.0")
            .with_native_unit(Unit::MmolL)
            .with_patient_name(Some("Jane".to_owned()));

        assert_eq!(
            info.to_string(),
            "Test Meter\nSerial Number: 1234\nVersion Information:\n    1.0\n    2.0\nNative Unit: mmol/L\nPatient Name: Jane"
        );
    }

    #[test]
    fn reading_method_follows_kind() {
        let ketone: Reading = KetoneReading::new(timestamp(), 0.1).into();
        let adjustment: Reading = TimeAdjustment::new(timestamp(), timestamp()).into();

        assert_eq!(ketone.measure_method(), MeasurementMethod::BloodSample);
        assert_eq!(adjustment.measure_method(), MeasurementMethod::Time);
    }
}
