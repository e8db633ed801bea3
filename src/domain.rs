use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::RasffError;

/// Identifier of one notification as published by the portal, e.g. `2019.3265`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReferenceId(String);

impl ReferenceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ReferenceId {
    type Err = RasffError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty() && !trimmed.chars().any(char::is_whitespace);
        if !is_valid {
            return Err(RasffError::InvalidReference(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub reference: ReferenceId,
    pub country: String,
    pub date: NaiveDate,
    pub subject: String,
    pub risk: String,
    pub action: String,
    pub distribution_status: String,
    pub product_category: String,
    pub product: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hazard {
    pub reference: ReferenceId,
    pub substance: String,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Origin {
    pub reference: ReferenceId,
    pub country: String,
}

/// Records that can be counted per country.
pub trait CountryKeyed {
    fn country(&self) -> &str;
}

impl CountryKeyed for Alert {
    fn country(&self) -> &str {
        &self.country
    }
}

impl CountryKeyed for Origin {
    fn country(&self) -> &str {
        &self.country
    }
}

impl<T: CountryKeyed> CountryKeyed for &T {
    fn country(&self) -> &str {
        (*self).country()
    }
}

/// Exclusive upper bound on notification dates: the first day of `year`/`month`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndBoundary {
    first_excluded: NaiveDate,
}

impl EndBoundary {
    pub fn new(year: i32, month: u32) -> Result<Self, RasffError> {
        let first_excluded = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
            RasffError::InvalidConfig(format!("end boundary {year}-{month} is not a valid month"))
        })?;
        Ok(Self { first_excluded })
    }

    pub fn admits(&self, date: NaiveDate) -> bool {
        date < self.first_excluded
    }

    pub fn first_excluded(&self) -> NaiveDate {
        self.first_excluded
    }
}

/// Closed date interval, both endpoints included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Interval {
    start: NaiveDate,
    end: NaiveDate,
}

impl Interval {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, RasffError> {
        if start > end {
            return Err(RasffError::InvalidInterval { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Strips a trailing parenthesized country code: `"Denmark (DA)"` becomes `"Denmark"`.
pub fn sanitize_country(country: &str) -> String {
    let trimmed = country.trim();
    if trimmed.ends_with(')') {
        if let Some(open) = trimmed.rfind('(') {
            return trimmed[..open].trim().to_string();
        }
    }
    trimmed.to_string()
}
