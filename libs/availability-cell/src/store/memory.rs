use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::AvailabilityError;
use crate::models::{AvailabilityPatch, AvailabilityRecord, DeleteOutcome, ProviderSummary};
use crate::services::booking::{apply_booking, apply_cancellation, next_status};
use crate::services::conflict::ranges_overlap;
use crate::store::{
    AvailabilityStore, BulkInsertOutcome, CounterOutcome, ProviderDirectory, ProviderFilter, SearchFilter,
};

/// Process-local store. One write guard spans every check-then-write
/// sequence, which makes each operation serializable.
#[derive(Clone, Default)]
pub struct InMemoryAvailabilityStore {
    records: Arc<RwLock<HashMap<Uuid, AvailabilityRecord>>>,
}

impl InMemoryAvailabilityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

fn overlaps_existing(
    records: &HashMap<Uuid, AvailabilityRecord>,
    candidate: &AvailabilityRecord,
) -> bool {
    records.values().any(|existing| {
        existing.id != candidate.id
            && existing.provider_id == candidate.provider_id
            && existing.date == candidate.date
            && ranges_overlap(
                candidate.start_time,
                candidate.end_time,
                existing.start_time,
                existing.end_time,
            )
    })
}

fn sorted(mut records: Vec<AvailabilityRecord>) -> Vec<AvailabilityRecord> {
    records.sort_by(|a, b| (a.date, a.start_time).cmp(&(b.date, b.start_time)));
    records
}

#[async_trait]
impl AvailabilityStore for InMemoryAvailabilityStore {
    async fn create(&self, record: AvailabilityRecord) -> Result<AvailabilityRecord, AvailabilityError> {
        let mut records = self.records.write().await;

        if overlaps_existing(&records, &record) {
            return Err(AvailabilityError::Conflict(format!(
                "Provider already has availability overlapping {} {}-{}",
                record.date,
                record.start_time.format("%H:%M"),
                record.end_time.format("%H:%M")
            )));
        }

        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AvailabilityRecord>, AvailabilityError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn find_by_provider(
        &self,
        provider_id: Uuid,
        filter: &ProviderFilter,
    ) -> Result<Vec<AvailabilityRecord>, AvailabilityError> {
        let records = self.records.read().await;
        Ok(sorted(
            records
                .values()
                .filter(|record| record.provider_id == provider_id && filter.matches(record))
                .cloned()
                .collect(),
        ))
    }

    async fn find_on_date(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilityRecord>, AvailabilityError> {
        let records = self.records.read().await;
        Ok(sorted(
            records
                .values()
                .filter(|record| record.provider_id == provider_id && record.date == date)
                .cloned()
                .collect(),
        ))
    }

    async fn update_by_id(
        &self,
        id: Uuid,
        patch: &AvailabilityPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<AvailabilityRecord>, AvailabilityError> {
        let mut records = self.records.write().await;

        let Some(existing) = records.get(&id) else {
            return Ok(None);
        };

        let mut updated = existing.clone();
        patch.apply_to(&mut updated, now);

        if updated.max_appointments_per_slot < updated.current_appointments {
            return Err(AvailabilityError::field(
                "max_appointments_per_slot",
                format!(
                    "cannot be lower than the {} appointments already booked",
                    updated.current_appointments
                ),
            ));
        }
        updated.status = next_status(
            updated.status,
            updated.current_appointments,
            updated.max_appointments_per_slot,
        );

        if patch.touches_time_range() && overlaps_existing(&records, &updated) {
            return Err(AvailabilityError::Conflict(
                "Updated time range overlaps existing availability".to_string(),
            ));
        }

        records.insert(id, updated.clone());
        Ok(Some(updated))
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, AvailabilityError> {
        let mut records = self.records.write().await;

        match records.get(&id) {
            None => Ok(false),
            Some(record) if record.current_appointments > 0 => Err(AvailabilityError::Conflict(format!(
                "Cannot delete availability with {} active appointments",
                record.current_appointments
            ))),
            Some(_) => {
                records.remove(&id);
                Ok(true)
            }
        }
    }

    async fn delete_series(&self, group_id: Uuid) -> Result<DeleteOutcome, AvailabilityError> {
        let mut records = self.records.write().await;

        let members: Vec<(Uuid, u32)> = records
            .values()
            .filter(|record| record.recurrence_group_id == Some(group_id))
            .map(|record| (record.id, record.current_appointments))
            .collect();

        let mut outcome = DeleteOutcome { deleted_count: 0, retained_count: 0 };
        for (id, appointments) in members {
            if appointments > 0 {
                outcome.retained_count += 1;
            } else {
                records.remove(&id);
                outcome.deleted_count += 1;
            }
        }

        Ok(outcome)
    }

    async fn search(&self, filter: &SearchFilter) -> Result<Vec<AvailabilityRecord>, AvailabilityError> {
        let records = self.records.read().await;
        Ok(sorted(
            records
                .values()
                .filter(|record| filter.matches(record))
                .cloned()
                .collect(),
        ))
    }

    async fn bulk_insert(&self, records: Vec<AvailabilityRecord>) -> Result<BulkInsertOutcome, AvailabilityError> {
        let mut stored = self.records.write().await;
        let mut outcome = BulkInsertOutcome::default();

        for record in records {
            if overlaps_existing(&stored, &record) {
                debug!("Skipping occurrence on {}: overlaps existing window", record.date);
                outcome.skipped += 1;
                continue;
            }
            stored.insert(record.id, record.clone());
            outcome.inserted.push(record);
        }

        Ok(outcome)
    }

    async fn try_increment(
        &self,
        id: Uuid,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<CounterOutcome, AvailabilityError> {
        let mut records = self.records.write().await;

        let Some(record) = records.get_mut(&id) else {
            return Ok(CounterOutcome::Missing);
        };

        Ok(match apply_booking(record, today, now) {
            Ok(()) => CounterOutcome::Applied(record.clone()),
            Err(reason) => CounterOutcome::Rejected(reason),
        })
    }

    async fn try_decrement(&self, id: Uuid, now: DateTime<Utc>) -> Result<CounterOutcome, AvailabilityError> {
        let mut records = self.records.write().await;

        let Some(record) = records.get_mut(&id) else {
            return Ok(CounterOutcome::Missing);
        };

        Ok(match apply_cancellation(record, now) {
            Ok(()) => CounterOutcome::Applied(record.clone()),
            Err(reason) => CounterOutcome::Rejected(reason),
        })
    }
}

#[derive(Clone, Default)]
pub struct InMemoryProviderDirectory {
    providers: Arc<RwLock<HashMap<Uuid, ProviderSummary>>>,
}

impl InMemoryProviderDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, provider: ProviderSummary) {
        self.providers.write().await.insert(provider.id, provider);
    }
}

#[async_trait]
impl ProviderDirectory for InMemoryProviderDirectory {
    async fn find_many(&self, ids: &[Uuid]) -> Result<Vec<ProviderSummary>, AvailabilityError> {
        let providers = self.providers.read().await;
        Ok(ids.iter().filter_map(|id| providers.get(id).cloned()).collect())
    }
}
