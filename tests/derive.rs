#![allow(dead_code)]

use csv::StringRecord;
use glucometer::sans::fields::{FieldError, FromFields};

#[derive(Debug, Default, FromFields)]
struct Entry {
    #[field(0)]
    kind: Option<u8>,
    #[field(2)]
    value: Option<u32>,
    #[field(3, |year, s| *year = s.parse::<i32>().ok().map(|y| y + 2000))]
    year: Option<i32>,
    #[field(5, |comment, s| comment.push_str(s.trim()))]
    comment: String,
    unused: bool,
}

#[test]
fn fills_fields_by_position() {
    let entry = Entry::from_fields("7,ignored, 123 ,19,x,  Meal ".split(',')).unwrap();

    assert_eq!(entry.kind, Some(7));
    assert_eq!(entry.value, Some(123));
    assert_eq!(entry.year, Some(2019));
    assert_eq!(entry.comment, "Meal");
    assert!(!entry.unused);
}

#[test]
fn leaves_missing_fields_unset() {
    let entry = Entry::from_fields(["9"]).unwrap();

    assert_eq!(entry.kind, Some(9));
    assert_eq!(entry.value, None);
    assert_eq!(entry.year, None);
    assert!(entry.comment.is_empty());
}

#[test]
fn reports_unparsable_fields() {
    let record = StringRecord::from(vec!["7", "", "12a"]);

    assert_eq!(
        Entry::from_fields(record.iter()).unwrap_err(),
        FieldError {
            index: 2,
            value: "12a".to_owned()
        }
    );

    // Handlers decide for themselves what to make of bad input.
    let entry = Entry::from_fields(["7", "", "1", "two"]).unwrap();
    assert_eq!(entry.year, None);
}
