//! Work item enumeration: months in a date range crossed with taxi types.

use crate::types::{ArtifactFormat, Category, Period, WorkItem};
use chrono::NaiveDate;

/// Inclusive calendar range
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateRange {
    /// First day (normalized to the first of its month when enumerating)
    pub start: NaiveDate,
    /// Last day, compared against the first day of each month
    pub end: NaiveDate,
}

impl DateRange {
    /// Create a range
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }
}

/// Months touched by `range`, oldest first
///
/// A month is included when its first day is not after `range.end`, so
/// `2019-01-15..2019-02-01` yields January and February. An end before the start
/// yields nothing.
pub fn months_between(range: &DateRange) -> Vec<Period> {
    let mut months = Vec::new();
    let mut current = Period::of(range.start);
    while let Some(first_day) = current.first_day() {
        if first_day > range.end {
            break;
        }
        months.push(current);
        current = current.next();
    }
    months
}

/// Every (category, month) pair to process, category-major then chronological
///
/// Repeated categories are enumerated once.
pub fn enumerate(
    range: &DateRange,
    categories: &[Category],
    format: ArtifactFormat,
) -> Vec<WorkItem> {
    let months = months_between(range);
    let mut seen: Vec<&Category> = Vec::with_capacity(categories.len());
    let mut items = Vec::with_capacity(categories.len() * months.len());

    for category in categories {
        if seen.contains(&category) {
            continue;
        }
        seen.push(category);
        items.extend(
            months
                .iter()
                .map(|period| WorkItem::new(category.clone(), *period, format)),
        );
    }

    items
}
