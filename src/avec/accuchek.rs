//! Accu-Chek meters in "Reports" mode, read from their mounted volume.

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::NaiveDateTime;
use log::{debug, info};

use super::{Driver, Readings};
use crate::{
    Error, MeterInfo, Reading, Unit,
    sans::accuchek::{self, Report},
};

/// Driver reading the CSV report a meter exposes as `<MODEL>/Reports/*.csv`
/// below its mount point.
#[derive(Debug)]
pub struct AccuChek {
    path: PathBuf,
    report: Option<Report>,
}

impl AccuChek {
    /// Locate the report below the mount point `root`.
    pub fn open(root: &Path) -> Result<Self, Error> {
        if !root.is_dir() {
            Err(Error::ConnectionFailed(format!(
                "{} is not a mounted meter",
                root.display()
            )))?
        }

        let path = find_report(root)?.ok_or_else(|| {
            Error::ConnectionFailed(format!("no report file found in {}", root.display()))
        })?;

        debug!("Using report {}", path.display());
        Ok(Self { path, report: None })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Model named by the directory holding `Reports`.
    pub fn model(&self) -> String {
        self.path
            .parent()
            .and_then(Path::parent)
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn report(&self) -> Result<&Report, Error> {
        self.report.as_ref().ok_or(Error::NotConnected)
    }
}

fn find_report(root: &Path) -> Result<Option<PathBuf>, Error> {
    let mut reports = Vec::new();

    for model in fs::read_dir(root)? {
        let dir = model?.path().join("Reports");
        if !dir.is_dir() {
            continue;
        }

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();

            if path.extension().is_some_and(|e| e == "csv") {
                reports.push(path);
            }
        }
    }

    reports.sort();
    Ok(reports.into_iter().next())
}

impl Driver for AccuChek {
    fn connect(&mut self) -> Result<(), Error> {
        let text = fs::read_to_string(&self.path)?;
        let report = accuchek::parse_report(&text)?;

        info!(
            "Report {} holds {} readings",
            self.path.display(),
            report.readings.len()
        );
        self.report = Some(report);

        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), Error> {
        self.report = None;
        Ok(())
    }

    fn meter_info(&mut self) -> Result<MeterInfo, Error> {
        let report = self.report()?;

        Ok(MeterInfo::new(format!("{} glucometer", self.model()))
            .with_serial_number(report.serial_number.clone())
            .with_native_unit(report.unit.unwrap_or(Unit::MgDl)))
    }

    fn datetime(&mut self) -> Result<NaiveDateTime, Error> {
        Err(Error::NotImplemented("datetime"))
    }

    fn set_datetime(&mut self, _: NaiveDateTime) -> Result<NaiveDateTime, Error> {
        Err(Error::NotImplemented("set datetime"))
    }

    fn readings(&mut self) -> Result<Readings<'_>, Error> {
        let readings = self.report()?.readings.clone();
        Ok(Box::new(readings.into_iter().map(|r| Ok(Reading::from(r)))))
    }

    fn zero_log(&mut self) -> Result<(), Error> {
        Err(Error::NotImplemented("zero log"))
    }
}
