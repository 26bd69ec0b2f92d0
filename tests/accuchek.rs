mod common;

use std::{
    fs,
    path::{Path, PathBuf},
};

use common::{assert_csv_fields, init_logger};
use glucometer::{
    Error, Meal, Reading, Unit,
    avec::{Meter, accuchek::AccuChek},
};

const REPORT: &str = concat!(
    "Accu-Chek Aviva Connect;Export;;;;;;;;\r\n",
    "UI00123456;17.04.2015;12:00;;;;;;;\r\n",
    "Date;Time;Result;Unit;Temperature warning;Out of target range;Other;Before meal;After meal;Control test\r\n",
    "16.04.2015;08:15;112;mg/dL;;;;X;;\r\n",
    "16.04.2015;13:40;;mg/dL;;;;;;\r\n",
    "16.04.2015;14:05;162;mg/dL;;X;;;X;\r\n",
);

/// Mount point laid out as `<root>/<model>/Reports/<file>`.
struct Volume {
    root: PathBuf,
}

impl Volume {
    fn new(name: &str, files: &[(&str, &str)]) -> Self {
        let root = std::env::temp_dir().join(format!(
            "glucometer-accuchek-{name}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&root);

        let reports = root.join("Aviva Connect").join("Reports");
        fs::create_dir_all(&reports).unwrap();

        for (file, content) in files {
            fs::write(reports.join(file), content).unwrap();
        }

        Self { root }
    }

    fn path(&self) -> &Path {
        &self.root
    }
}

impl Drop for Volume {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

#[test]
fn reads_report() {
    init_logger();

    let volume = Volume::new("report", &[("notes.txt", "not a report"), ("DiaryU.csv", REPORT)]);

    let mut meter = Meter::new(AccuChek::open(volume.path()).unwrap());
    assert!(matches!(meter.info(), Err(Error::NotConnected)));

    meter.connect().unwrap();

    let info = meter.info().unwrap();
    assert_eq!(info.model, "Aviva Connect glucometer");
    assert_eq!(info.serial_number, "UI00123456");
    assert_eq!(info.native_unit, Unit::MgDl);

    let readings: Vec<Reading> = meter.readings().unwrap().map(Result::unwrap).collect();
    let [Reading::Glucose(before), Reading::Glucose(after)] = readings.as_slice() else {
        panic!("two glucose readings expected, got {readings:?}");
    };
    assert_eq!(before.timestamp.to_string(), "2015-04-16 08:15:00");
    assert_eq!(before.value, 112.0);
    assert_eq!(before.meal, Meal::Before);
    assert_eq!(after.value, 162.0);
    assert_eq!(after.meal, Meal::After);

    for reading in &readings {
        assert_csv_fields(&reading.as_csv(Unit::MgDl));
    }

    assert!(matches!(meter.datetime(), Err(Error::NotImplemented(_))));
    assert!(matches!(meter.zero_log(), Err(Error::NotImplemented(_))));
}

#[test]
fn picks_first_report_by_name() {
    let second = REPORT.replace("UI00123456", "UI00999999");
    let volume = Volume::new("sorted", &[("b.csv", second.as_str()), ("a.csv", REPORT)]);

    let driver = AccuChek::open(volume.path()).unwrap();
    assert_eq!(driver.path().file_name().unwrap(), "a.csv");
    assert_eq!(driver.model(), "Aviva Connect");
}

#[test]
fn rejects_volumes_without_report() {
    let volume = Volume::new("empty", &[("notes.txt", "not a report")]);
    assert!(matches!(
        AccuChek::open(volume.path()),
        Err(Error::ConnectionFailed(_))
    ));

    assert!(matches!(
        AccuChek::open(&volume.path().join("missing")),
        Err(Error::ConnectionFailed(_))
    ));
}
