//! Recurrence detection across note dates.
//!
//! Two qualifying dates belong to distinct episodes when they are more than
//! `min_interval_days` apart; they count as a recurrence when they are also no more than
//! `max_interval_days` apart.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::Mention;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeInterval {
    pub min_days: i64,
    pub max_days: i64,
}

impl EpisodeInterval {
    pub fn new(min_days: i64, max_days: i64) -> Self {
        Self { min_days, max_days }
    }
}

/// First pair `(i, j)`, `i < j`, in list order whose day gap falls in `(min, max]`.
///
/// `dates` must be chronological. Pairs are scanned with `i` outer and `j` inner; once a
/// gap for `i` exceeds the maximum, later `j` cannot qualify for that `i`.
pub fn find_recurrence(dates: &[NaiveDate], interval: EpisodeInterval) -> Option<(usize, usize)> {
    for i in 0..dates.len() {
        for j in (i + 1)..dates.len() {
            let gap = (dates[j] - dates[i]).num_days();
            if gap <= interval.min_days {
                continue;
            }
            if gap > interval.max_days {
                break;
            }
            return Some((i, j));
        }
    }
    None
}

/// Evidence of the first recurring pair: the earlier date's mentions, then the later's.
pub fn has_recurrence(
    dated: &[(NaiveDate, Vec<Arc<Mention>>)],
    interval: EpisodeInterval,
) -> Option<Vec<Arc<Mention>>> {
    let dates: Vec<NaiveDate> = dated.iter().map(|(d, _)| *d).collect();
    let (i, j) = find_recurrence(&dates, interval)?;
    let mut evidence = dated[i].1.clone();
    evidence.extend(dated[j].1.iter().cloned());
    Some(evidence)
}
