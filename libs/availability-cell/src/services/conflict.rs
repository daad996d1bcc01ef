use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AvailabilityError;
use crate::models::AvailabilityRecord;
use crate::store::AvailabilityStore;

/// Half-open `[s1, e1)` vs `[s2, e2)`. Touching windows (`e1 == s2`) do not overlap.
pub fn ranges_overlap(s1: NaiveTime, e1: NaiveTime, s2: NaiveTime, e2: NaiveTime) -> bool {
    s1 < e2 && s2 < e1
}

#[derive(Clone)]
pub struct ConflictDetector {
    store: Arc<dyn AvailabilityStore>,
}

impl ConflictDetector {
    pub fn new(store: Arc<dyn AvailabilityStore>) -> Self {
        Self { store }
    }

    pub async fn find_conflicts(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        exclude_id: Option<Uuid>,
    ) -> Result<Vec<AvailabilityRecord>, AvailabilityError> {
        debug!(
            "Checking conflicts for provider {} on {} from {} to {}",
            provider_id, date, start_time, end_time
        );

        let existing = self.store.find_on_date(provider_id, date).await?;

        let conflicts: Vec<AvailabilityRecord> = existing
            .into_iter()
            .filter(|record| Some(record.id) != exclude_id)
            .filter(|record| ranges_overlap(start_time, end_time, record.start_time, record.end_time))
            .collect();

        if !conflicts.is_empty() {
            warn!(
                "Conflict detected for provider {} on {} - {} overlapping windows",
                provider_id,
                date,
                conflicts.len()
            );
        }

        Ok(conflicts)
    }

    pub async fn has_conflict(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        exclude_id: Option<Uuid>,
    ) -> Result<bool, AvailabilityError> {
        let conflicts = self
            .find_conflicts(provider_id, date, start_time, end_time, exclude_id)
            .await?;
        Ok(!conflicts.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(value: &str) -> NaiveTime {
        NaiveTime::parse_from_str(value, "%H:%M").unwrap()
    }

    #[test]
    fn detects_all_overlap_shapes() {
        let (s, e) = (t("09:00"), t("17:00"));
        // starts inside
        assert!(ranges_overlap(t("10:00"), t("18:00"), s, e));
        // ends inside
        assert!(ranges_overlap(t("08:00"), t("10:00"), s, e));
        // contains
        assert!(ranges_overlap(t("08:00"), t("18:00"), s, e));
        // contained
        assert!(ranges_overlap(t("10:00"), t("11:00"), s, e));
        // identical
        assert!(ranges_overlap(s, e, s, e));
    }

    #[test]
    fn touching_windows_do_not_conflict() {
        assert!(!ranges_overlap(t("09:00"), t("10:00"), t("10:00"), t("11:00")));
        assert!(!ranges_overlap(t("10:00"), t("11:00"), t("09:00"), t("10:00")));
        assert!(!ranges_overlap(t("06:00"), t("07:00"), t("09:00"), t("10:00")));
    }

    #[test]
    fn overlap_is_symmetric() {
        let marks = ["08:00", "09:00", "09:30", "10:00", "12:00", "17:00"];
        for a in 0..marks.len() {
            for b in (a + 1)..marks.len() {
                for c in 0..marks.len() {
                    for d in (c + 1)..marks.len() {
                        let (s1, e1, s2, e2) = (t(marks[a]), t(marks[b]), t(marks[c]), t(marks[d]));
                        assert_eq!(ranges_overlap(s1, e1, s2, e2), ranges_overlap(s2, e2, s1, e1));
                    }
                }
            }
        }
    }
}
