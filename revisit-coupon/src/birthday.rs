use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::CouponError;

/// Month and day of birth, with the year when the member gave one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BirthDate {
    year: Option<i32>,
    month: u32,
    day: u32,
}

impl BirthDate {
    pub fn new(year: Option<i32>, month: u32, day: u32) -> Result<Self, CouponError> {
        if !(1..=12).contains(&month) || day == 0 || day > days_in_month(year, month) {
            let shown = match year {
                Some(y) => format!("{:04}-{:02}-{:02}", y, month, day),
                None => format!("--{:02}-{:02}", month, day),
            };
            return Err(CouponError::InvalidBirthDate(shown));
        }
        Ok(Self { year, month, day })
    }

    pub fn year(&self) -> Option<i32> {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    /// Exact month/day match against `date`.
    pub fn falls_on(&self, date: NaiveDate) -> bool {
        self.month == date.month() && self.day == date.day()
    }

    /// Like [`falls_on`](Self::falls_on), but a Feb 29 birthday is also
    /// observed on Feb 28 in common years.
    pub fn observed_on(&self, date: NaiveDate) -> bool {
        if self.falls_on(date) {
            return true;
        }
        self.month == 2
            && self.day == 29
            && date.month() == 2
            && date.day() == 28
            && !is_leap_year(date.year())
    }
}

fn is_leap_year(year: i32) -> bool {
    NaiveDate::from_ymd_opt(year, 2, 29).is_some()
}

fn days_in_month(year: Option<i32>, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if year.map_or(true, is_leap_year) {
                29
            } else {
                28
            }
        }
        _ => 0,
    }
}

fn is_separator(c: char) -> bool {
    matches!(c, '-' | '.' | '/' | ' ')
}

fn number<T: FromStr>(part: &str, raw: &str) -> Result<T, CouponError> {
    if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
        return Err(CouponError::InvalidBirthDate(raw.to_string()));
    }
    part.parse()
        .map_err(|_| CouponError::InvalidBirthDate(raw.to_string()))
}

impl FromStr for BirthDate {
    type Err = CouponError;

    /// Accepts `YYYY-MM-DD`, `YYYYMMDD`, `YYMMDD`, `MM-DD`, `MMDD` and the
    /// stored `--MM-DD` form. Two-digit years are dropped since the century
    /// is ambiguous and only month and day matter for coupons.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.contains(is_separator) {
            let parts: Vec<&str> = raw.split(is_separator).filter(|p| !p.is_empty()).collect();
            return match parts.as_slice() {
                [y, m, d] => {
                    let year = if y.len() == 4 { Some(number(y, raw)?) } else { None };
                    if y.len() != 4 && y.len() != 2 {
                        return Err(CouponError::InvalidBirthDate(raw.to_string()));
                    }
                    BirthDate::new(year, number(m, raw)?, number(d, raw)?)
                }
                [m, d] => BirthDate::new(None, number(m, raw)?, number(d, raw)?),
                _ => Err(CouponError::InvalidBirthDate(raw.to_string())),
            };
        }

        if !raw.chars().all(|c| c.is_ascii_digit()) {
            return Err(CouponError::InvalidBirthDate(raw.to_string()));
        }
        match raw.len() {
            8 => BirthDate::new(
                Some(number(&raw[0..4], raw)?),
                number(&raw[4..6], raw)?,
                number(&raw[6..8], raw)?,
            ),
            6 => BirthDate::new(None, number(&raw[2..4], raw)?, number(&raw[4..6], raw)?),
            4 => BirthDate::new(None, number(&raw[0..2], raw)?, number(&raw[2..4], raw)?),
            _ => Err(CouponError::InvalidBirthDate(raw.to_string())),
        }
    }
}

impl fmt::Display for BirthDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.year {
            Some(year) => write!(f, "{:04}-{:02}-{:02}", year, self.month, self.day),
            None => write!(f, "--{:02}-{:02}", self.month, self.day),
        }
    }
}

impl Serialize for BirthDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BirthDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
