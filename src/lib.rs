//! Drivers and protocol decoders for blood glucose meters.
//!
//! Glucometer speaks the wire protocols of several meter families: LifeScan
//! OneTouch (serial text, binary link-control packets and SCSI register
//! frames), Abbott FreeStyle (HID text commands and serial text dumps),
//! Bayer/Ascensia Contour (LIS1-A/LIS2-A2 over HID), TaiDoc, SD CodeFree,
//! GlucoMen areo and the CSV reports Accu-Chek meters expose as mass storage.
//! Every driver yields the same [`Reading`] values and [`MeterInfo`]
//! description.
//!
//! Most users should begin with the [`avec`] module, which pairs each driver
//! with a transport and exposes a connection-scoped [`avec::Meter`]. The
//! frame codecs, checksums and session state machines underneath are
//! available in the [`sans`] module for applications bringing their own I/O.
//! Sessions described in a TOML file can be loaded through [`config`].
//!
//! ## Cargo Features
//!
//! The following crate feature flags are available:
//!
//! - `serial`: open serial-attached meters through `serialport` with the
//!   line settings each driver requires.

extern crate self as glucometer;

pub mod avec;
pub mod common;
pub mod config;
mod error;
pub mod sans;

pub use common::{
    ExtraValue, GlucoseReading, KetoneReading, Meal, MeasurementMethod, MeterInfo, Reading,
    TimeAdjustment, Unit, convert_glucose_unit,
};
pub use error::Error;
