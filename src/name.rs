//! Snapshot name stamps.
//!
//! Snapshots taken by this daemon are named `YYYYMMDDHHMM`; the 8-digit
//! `YYYYMMDD` form from earlier releases is still recognised. Anything
//! else is a foreign snapshot: eligible for replication streaming, never
//! destroyed unless `clean_all` says so.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

const STAMP_FORMAT: &str = "%Y%m%d%H%M";
const LEGACY_FORMAT: &str = "%Y%m%d";

/// Render the snapshot name for an instant (minute resolution).
pub fn format_stamp(t: NaiveDateTime) -> String {
    t.format(STAMP_FORMAT).to_string()
}

/// Parse a managed snapshot name back to an instant. The legacy 8-digit
/// form resolves to midnight of its day.
pub fn parse_stamp(name: &str) -> Option<NaiveDateTime> {
    if !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match name.len() {
        12 => NaiveDateTime::parse_from_str(name, STAMP_FORMAT).ok(),
        8 => NaiveDate::parse_from_str(name, LEGACY_FORMAT)
            .ok()
            .map(|d| d.and_time(NaiveTime::MIN)),
        _ => None,
    }
}

/// True when the name matches either managed convention.
pub fn is_managed(name: &str) -> bool {
    parse_stamp(name).is_some()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    #[test]
    fn stamp_round_trip() {
        let t = at(2024, 6, 15, 10, 30);
        assert_eq!(format_stamp(t), "202406151030");
        assert_eq!(parse_stamp("202406151030"), Some(t));
    }

    #[test]
    fn legacy_form_resolves_to_midnight() {
        assert_eq!(parse_stamp("20240615"), Some(at(2024, 6, 15, 0, 0)));
    }

    #[test]
    fn foreign_names_are_rejected() {
        for name in [
            "manual-before-migration",
            "2024061510",    // 10 digits
            "2024061",       // 7 digits
            "202413010000",  // month 13
            "202406320000",  // day 32
            "202406152460",  // hour 24
            "20240615103Z",
            "",
        ] {
            assert!(parse_stamp(name).is_none(), "{name:?} must be foreign");
            assert!(!is_managed(name));
        }
    }
}
