//! Positional fields of comma-separated records.
//!
//! Record layouts are described by deriving [`FromFields`] on a struct whose
//! fields carry a `#[field(N)]` attribute naming their zero-based position.
//! Plain fields must be `Option<T>` where `T: FromStr`; they stay `None` when
//! the record is too short to carry them. A closure may be supplied to handle
//! the raw text instead:
//!
//! ```ignore
//! #[derive(Default, FromFields)]
//! struct Entry {
//!     #[field(0)]
//!     kind: Option<u8>,
//!     #[field(4, |year, s| *year = s.parse::<i32>().ok().map(|y| y + 2000))]
//!     year: Option<i32>,
//! }
//! ```

use std::str::FromStr;

pub use glucometer_derive::FromFields;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unable to parse field {index} ({value:?}).")]
pub struct FieldError {
    pub index: usize,
    pub value: String,
}

pub trait FromFields: Default {
    fn add_field(&mut self, index: usize, value: &str) -> Result<(), FieldError>;

    fn from_fields<'a>(fields: impl IntoIterator<Item = &'a str>) -> Result<Self, FieldError> {
        let mut record = Self::default();

        for (index, value) in fields.into_iter().enumerate() {
            record.add_field(index, value)?;
        }

        Ok(record)
    }

    fn parse_field<T: FromStr>(index: usize, value: &str) -> Result<T, FieldError> {
        value.trim().parse().map_err(|_| FieldError {
            index,
            value: value.to_owned(),
        })
    }
}
