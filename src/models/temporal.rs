//! Valid-time periods at day precision.
//!
//! Hierarchy facts carry a *valid time*: the calendar interval during which
//! the fact is true in the real world. Periods are half-open day intervals
//! `[effective_date, end_date)` — true from `effective_date`, superseded at
//! `end_date`. An open-ended fact uses the far-future sentinel date
//! (9999-12-31) as its end.
//!
//! | Operation | Question Answered |
//! |-----------|-------------------|
//! | [`ValidPeriod::contains`] | Is the fact true on this date? |
//! | [`ValidPeriod::intersect`] | On which dates are two facts both true? |
//!
//! Interval intersection is what gives a multi-edge ancestry path its
//! validity window: the path holds only on dates where every edge along it
//! holds.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Returns the far-future sentinel used for open-ended periods.
#[must_use]
pub fn end_of_time() -> NaiveDate {
    NaiveDate::from_ymd_opt(9999, 12, 31).unwrap_or(NaiveDate::MAX)
}

/// A half-open valid-time interval `[effective_date, end_date)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidPeriod {
    /// First day on which the fact holds (inclusive).
    pub effective_date: NaiveDate,
    /// First day on which the fact no longer holds (exclusive).
    pub end_date: NaiveDate,
}

impl ValidPeriod {
    /// Creates a bounded period.
    #[must_use]
    pub const fn between(effective_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            effective_date,
            end_date,
        }
    }

    /// Creates an open-ended period starting at `effective_date`.
    #[must_use]
    pub fn open_from(effective_date: NaiveDate) -> Self {
        Self {
            effective_date,
            end_date: end_of_time(),
        }
    }

    /// Checks whether the period covers the given date.
    ///
    /// Uses half-open semantics: `effective_date <= date < end_date`.
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.effective_date <= date && date < self.end_date
    }

    /// Checks whether the period is open-ended (ends at the sentinel).
    #[must_use]
    pub fn is_open_ended(&self) -> bool {
        self.end_date >= end_of_time()
    }

    /// Checks whether the period contains at least one day.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.effective_date >= self.end_date
    }

    /// Returns the intersection of two periods, or `None` when they share no day.
    ///
    /// The intersection starts at the later of the two starts and ends at the
    /// earlier of the two ends.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let effective_date = self.effective_date.max(other.effective_date);
        let end_date = self.end_date.min(other.end_date);
        if effective_date >= end_date {
            return None;
        }
        Some(Self {
            effective_date,
            end_date,
        })
    }

    /// Ends this period at the given date.
    ///
    /// Used when a fact is superseded: the open-ended period is closed at the
    /// supersession date.
    #[must_use]
    pub const fn close_at(self, end_date: NaiveDate) -> Self {
        Self {
            effective_date: self.effective_date,
            end_date,
        }
    }
}

impl fmt::Display for ValidPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_open_ended() {
            write!(f, "[{}, ∞)", self.effective_date)
        } else {
            write!(f, "[{}, {})", self.effective_date, self.end_date)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_contains_half_open() {
        let p = ValidPeriod::between(d("2024-01-01"), d("2024-06-01"));
        assert!(!p.contains(d("2023-12-31")));
        assert!(p.contains(d("2024-01-01")));
        assert!(p.contains(d("2024-05-31")));
        assert!(!p.contains(d("2024-06-01"))); // End is exclusive
    }

    #[test]
    fn test_open_ended() {
        let p = ValidPeriod::open_from(d("2024-01-01"));
        assert!(p.is_open_ended());
        assert!(p.contains(d("9999-12-30")));
        assert!(!p.contains(d("9999-12-31")));
    }

    #[test]
    fn test_intersect_takes_later_start_and_earlier_end() {
        let a = ValidPeriod::between(d("2024-01-01"), d("2024-09-01"));
        let b = ValidPeriod::between(d("2024-06-01"), d("2024-12-01"));

        let overlap = a.intersect(&b).unwrap();
        assert_eq!(overlap.effective_date, d("2024-06-01"));
        assert_eq!(overlap.end_date, d("2024-09-01"));
    }

    #[test]
    fn test_intersect_disjoint_is_none() {
        let a = ValidPeriod::between(d("2024-01-01"), d("2024-06-01"));
        let b = ValidPeriod::between(d("2024-06-01"), d("2024-12-01"));
        assert!(a.intersect(&b).is_none());
    }

    #[test]
    fn test_intersect_open_ended_pair() {
        let a = ValidPeriod::open_from(d("2024-01-01"));
        let b = ValidPeriod::open_from(d("2024-06-01"));

        let overlap = a.intersect(&b).unwrap();
        assert_eq!(overlap.effective_date, d("2024-06-01"));
        assert!(overlap.is_open_ended());
    }

    #[test]
    fn test_close_at() {
        let p = ValidPeriod::open_from(d("2024-01-01")).close_at(d("2024-03-01"));
        assert!(!p.is_open_ended());
        assert!(p.contains(d("2024-02-29")));
        assert!(!p.contains(d("2024-03-01")));
    }

    #[test]
    fn test_display() {
        let p = ValidPeriod::between(d("2024-01-01"), d("2024-06-01"));
        assert_eq!(p.to_string(), "[2024-01-01, 2024-06-01)");
        assert_eq!(
            ValidPeriod::open_from(d("2024-01-01")).to_string(),
            "[2024-01-01, ∞)"
        );
    }
}
