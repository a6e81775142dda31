//! Retention schema strings.
//!
//! A schema like `2k24h7d3w11m4y` is an ordered vector of buckets: keep
//! days, hours, days, weeks (7d), months (30d) and years (360d), in that
//! fixed order. Absent units are zero; out-of-order or repeated units
//! are a configuration error. The canonical rendering omits zero units.

use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Keep,
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

impl Unit {
    pub const ORDER: [Unit; 6] = [
        Unit::Keep,
        Unit::Hours,
        Unit::Days,
        Unit::Weeks,
        Unit::Months,
        Unit::Years,
    ];

    pub fn letter(self) -> char {
        match self {
            Unit::Keep => 'k',
            Unit::Hours => 'h',
            Unit::Days => 'd',
            Unit::Weeks => 'w',
            Unit::Months => 'm',
            Unit::Years => 'y',
        }
    }

    fn from_letter(c: char) -> Option<Unit> {
        Unit::ORDER.into_iter().find(|u| u.letter() == c)
    }

    /// Width of one bucket of this unit.
    pub fn length(self) -> Duration {
        match self {
            Unit::Keep | Unit::Days => Duration::days(1),
            Unit::Hours => Duration::hours(1),
            Unit::Weeks => Duration::days(7),
            Unit::Months => Duration::days(30),
            Unit::Years => Duration::days(360),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchemaError {
    #[error("unexpected character '{0}' in schema")]
    UnexpectedChar(char),

    #[error("unit '{0}' out of order or repeated")]
    OutOfOrder(char),

    #[error("count without a unit letter")]
    DanglingCount,

    #[error("unit '{0}' without a count")]
    MissingCount(char),

    #[error("count too large in schema")]
    Overflow,
}

/// Parsed retention schema: bucket counts per unit, in fixed unit order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    counts: [u32; 6],
}

impl Schema {
    pub fn count(&self, unit: Unit) -> u32 {
        self.counts[unit as usize]
    }

    /// All units in order with their counts, zeroes included.
    pub fn units(&self) -> impl Iterator<Item = (Unit, u32)> + '_ {
        Unit::ORDER.into_iter().map(|u| (u, self.counts[u as usize]))
    }

    /// A schema with no buckets at all: everything older than the
    /// reference instant becomes a destruction candidate.
    pub fn is_empty(&self) -> bool {
        self.counts.iter().all(|&c| c == 0)
    }
}

impl FromStr for Schema {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut schema = Schema::default();
        // Units must appear in ORDER; `next_unit` is the first still
        // allowed to appear.
        let mut next_unit = 0usize;
        let mut count: Option<u32> = None;
        for c in s.chars() {
            if let Some(digit) = c.to_digit(10) {
                let sofar = count.unwrap_or(0);
                count = Some(
                    sofar
                        .checked_mul(10)
                        .and_then(|v| v.checked_add(digit))
                        .ok_or(SchemaError::Overflow)?,
                );
            } else if let Some(unit) = Unit::from_letter(c) {
                let n = count.take().ok_or(SchemaError::MissingCount(c))?;
                let slot = unit as usize;
                if slot < next_unit {
                    return Err(SchemaError::OutOfOrder(c));
                }
                schema.counts[slot] = n;
                next_unit = slot + 1;
            } else {
                return Err(SchemaError::UnexpectedChar(c));
            }
        }
        if count.is_some() {
            return Err(SchemaError::DanglingCount);
        }
        Ok(schema)
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (unit, count) in self.units() {
            if count > 0 {
                write!(f, "{count}{}", unit.letter())?;
            }
        }
        Ok(())
    }
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_schema() {
        let schema: Schema = "2k24h7d3w11m4y".parse().unwrap();
        assert_eq!(schema.count(Unit::Keep), 2);
        assert_eq!(schema.count(Unit::Hours), 24);
        assert_eq!(schema.count(Unit::Days), 7);
        assert_eq!(schema.count(Unit::Weeks), 3);
        assert_eq!(schema.count(Unit::Months), 11);
        assert_eq!(schema.count(Unit::Years), 4);
    }

    #[test]
    fn absent_units_are_zero() {
        let schema: Schema = "7d4w".parse().unwrap();
        assert_eq!(schema.count(Unit::Keep), 0);
        assert_eq!(schema.count(Unit::Hours), 0);
        assert_eq!(schema.count(Unit::Days), 7);
        assert_eq!(schema.count(Unit::Weeks), 4);
        assert_eq!(schema.count(Unit::Years), 0);
    }

    #[test]
    fn canonical_form_omits_zero_units() {
        for (input, canonical) in [
            ("2k24h7d3w11m4y", "2k24h7d3w11m4y"),
            ("0k24h7d0w0m0y", "24h7d"),
            ("7d4w", "7d4w"),
            ("0k0h0d0w0m0y", ""),
        ] {
            let schema: Schema = input.parse().unwrap();
            assert_eq!(schema.to_string(), canonical, "from {input:?}");
        }
    }

    #[test]
    fn canonical_form_reparses() {
        let schema: Schema = "0k24h7d0w2m0y".parse().unwrap();
        let again: Schema = schema.to_string().parse().unwrap();
        assert_eq!(schema, again);
    }

    #[test]
    fn unit_order_is_enforced() {
        assert_eq!(
            "7d24h".parse::<Schema>().unwrap_err(),
            SchemaError::OutOfOrder('h')
        );
        assert_eq!(
            "2k2k".parse::<Schema>().unwrap_err(),
            SchemaError::OutOfOrder('k')
        );
    }

    #[test]
    fn malformed_schemas_are_rejected() {
        assert_eq!(
            "7x".parse::<Schema>().unwrap_err(),
            SchemaError::UnexpectedChar('x')
        );
        assert_eq!("7".parse::<Schema>().unwrap_err(), SchemaError::DanglingCount);
        assert_eq!(
            "d".parse::<Schema>().unwrap_err(),
            SchemaError::MissingCount('d')
        );
    }

    #[test]
    fn empty_schema() {
        let schema: Schema = "".parse().unwrap();
        assert!(schema.is_empty());
        let zero: Schema = "0d0w0m0y".parse().unwrap();
        assert!(zero.is_empty());
    }
}
