//! Time ranges and cadence for climate data alignment.
//!
//! The archive serves monthly-mean reanalysis, so ranges are expressed at
//! month resolution. Daily-native variables are aggregated onto the monthly
//! cadence by the aligner.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// A calendar month, the atomic unit of the pipeline's time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Self {
        debug_assert!((1..=12).contains(&month));
        Self { year, month }
    }

    /// The following calendar month.
    pub fn next(self) -> Self {
        if self.month == 12 {
            Self::new(self.year + 1, 1)
        } else {
            Self::new(self.year, self.month + 1)
        }
    }

    /// First day of the month.
    pub fn first_day(self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).expect("valid year-month")
    }

    /// Check whether a date falls inside this month.
    pub fn contains_date(self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }
}

impl std::fmt::Display for YearMonth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Inclusive range of calendar months.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: YearMonth,
    pub end: YearMonth,
}

impl TimeRange {
    pub fn new(start: YearMonth, end: YearMonth) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// Number of months in the range.
    pub fn len(&self) -> usize {
        let months = (self.end.year - self.start.year) * 12
            + (self.end.month as i32 - self.start.month as i32)
            + 1;
        months.max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    /// Iterate the months of the range in order.
    pub fn months(&self) -> impl Iterator<Item = YearMonth> + '_ {
        let mut current = Some(self.start);
        let end = self.end;
        std::iter::from_fn(move || {
            let ym = current?;
            if ym > end {
                current = None;
                return None;
            }
            current = Some(ym.next());
            Some(ym)
        })
    }

    /// Split into consecutive sub-ranges of at most `max_months` each.
    ///
    /// Upstream archives cap the span of a single request; large ranges are
    /// issued as sequential sub-requests.
    pub fn chunks(&self, max_months: usize) -> Vec<TimeRange> {
        debug_assert!(max_months > 0);
        let mut out = Vec::new();
        let mut start = self.start;
        while start <= self.end {
            let mut end = start;
            for _ in 1..max_months {
                if end == self.end {
                    break;
                }
                end = end.next();
            }
            let end = end.min(self.end);
            out.push(TimeRange::new(start, end));
            start = end.next();
        }
        out
    }

    pub fn contains(&self, ym: YearMonth) -> bool {
        ym >= self.start && ym <= self.end
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        let ym = YearMonth::new(date.year(), date.month());
        self.contains(ym)
    }

    /// Signature fragment for cache keys.
    pub fn signature(&self) -> String {
        format!("{}_{}", self.start, self.end)
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Native or target time step of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Daily,
    Monthly,
}
