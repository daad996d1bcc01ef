use std::sync::Arc;

use chrono::{DateTime, Days, Months, NaiveDate, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AvailabilityError;
use crate::models::{AvailabilityRecord, DateRange, RecurrencePattern};
use crate::services::conflict::ConflictDetector;
use crate::services::time::TimeConverter;
use crate::store::AvailabilityStore;

impl RecurrencePattern {
    /// Date `steps` periods after `anchor`. Monthly steps keep the anchor's
    /// day-of-month and clamp to the last day of shorter months, so
    /// Jan 31 gives Feb 29 (leap year) and then Mar 31.
    pub fn advance(&self, anchor: NaiveDate, steps: u32) -> Option<NaiveDate> {
        match self {
            RecurrencePattern::Daily => anchor.checked_add_days(Days::new(steps as u64)),
            RecurrencePattern::Weekly => anchor.checked_add_days(Days::new(steps as u64 * 7)),
            RecurrencePattern::Monthly => anchor.checked_add_months(Months::new(steps)),
        }
    }
}

/// Every occurrence date from `start` through `end`, both inclusive.
pub fn occurrence_dates(start: NaiveDate, end: NaiveDate, pattern: RecurrencePattern) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut step = 0;

    while let Some(cursor) = pattern.advance(start, step) {
        if cursor > end {
            break;
        }
        dates.push(cursor);
        step += 1;
    }

    dates
}

/// Concrete, non-recurring copies of `template`, one window per date.
pub fn build_occurrences(
    template: &AvailabilityRecord,
    dates: &[NaiveDate],
    group_id: Uuid,
    converter: &TimeConverter,
    now: DateTime<Utc>,
) -> Vec<AvailabilityRecord> {
    dates
        .iter()
        .map(|date| {
            let mut occurrence = template.clone();
            occurrence.id = Uuid::new_v4();
            occurrence.date = *date;
            // Offsets differ across DST boundaries, so each date converts on its own.
            occurrence.utc_start_time = converter.to_utc(*date, template.start_time, &template.timezone);
            occurrence.utc_end_time = converter.to_utc(*date, template.end_time, &template.timezone);
            occurrence.is_recurring = false;
            occurrence.recurrence_pattern = None;
            occurrence.recurrence_end_date = None;
            occurrence.recurrence_group_id = Some(group_id);
            occurrence.current_appointments = 0;
            occurrence.created_at = now;
            occurrence.updated_at = now;
            occurrence
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ExpansionOutcome {
    pub group_id: Uuid,
    pub created: Vec<AvailabilityRecord>,
    pub skipped: usize,
    pub date_range: DateRange,
    pub total_capacity: u64,
}

#[derive(Clone)]
pub struct RecurrenceExpander {
    store: Arc<dyn AvailabilityStore>,
    detector: ConflictDetector,
    converter: TimeConverter,
}

impl RecurrenceExpander {
    pub fn new(store: Arc<dyn AvailabilityStore>, detector: ConflictDetector, converter: TimeConverter) -> Self {
        Self { store, detector, converter }
    }

    /// Expands and persists the series. Conflicting occurrences are skipped,
    /// never fatal; the outcome lists exactly what was stored.
    pub async fn expand(
        &self,
        template: &AvailabilityRecord,
        pattern: RecurrencePattern,
        end_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<ExpansionOutcome, AvailabilityError> {
        let group_id = Uuid::new_v4();
        let dates = occurrence_dates(template.date, end_date, pattern);
        let candidates = build_occurrences(template, &dates, group_id, &self.converter, now);

        debug!(
            "Expanding {:?} series for provider {}: {} candidate occurrences",
            pattern,
            template.provider_id,
            candidates.len()
        );

        let mut admitted = Vec::with_capacity(candidates.len());
        let mut skipped = 0;

        for occurrence in candidates {
            let conflicting = self
                .detector
                .has_conflict(
                    occurrence.provider_id,
                    occurrence.date,
                    occurrence.start_time,
                    occurrence.end_time,
                    None,
                )
                .await?;

            if conflicting {
                debug!("Skipping occurrence on {}: conflicts with existing availability", occurrence.date);
                skipped += 1;
            } else {
                admitted.push(occurrence);
            }
        }

        let inserted = self.store.bulk_insert(admitted).await?;
        skipped += inserted.skipped;

        let total_capacity = inserted
            .inserted
            .iter()
            .map(|record| record.max_appointments_per_slot as u64)
            .sum();

        info!(
            "Created {} occurrences ({} skipped) for provider {}",
            inserted.inserted.len(),
            skipped,
            template.provider_id
        );

        Ok(ExpansionOutcome {
            group_id,
            created: inserted.inserted,
            skipped,
            date_range: DateRange { start: template.date, end: end_date },
            total_capacity,
        })
    }
}
