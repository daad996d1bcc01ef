use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Method, Url};
use serde_json::{json, Value};
use tracing::{debug, error, warn};
use uuid::Uuid;

use shared_database::supabase::{ApiError, SupabaseClient};

use crate::error::AvailabilityError;
use crate::models::{AvailabilityPatch, AvailabilityRecord, DeleteOutcome, ProviderSummary};
use crate::services::booking::{apply_booking, apply_cancellation, next_status, BookingRejection};
use crate::services::conflict::ranges_overlap;
use crate::store::{
    AvailabilityStore, BulkInsertOutcome, CounterOutcome, ProviderDirectory, ProviderFilter, SearchFilter,
};

const AVAILABILITY_PATH: &str = "/rest/v1/provider_availability";
const PROVIDERS_PATH: &str = "/rest/v1/providers";
const CHRONOLOGICAL: (&str, &str) = ("order", "date.asc,start_time.asc");

/// Compare-and-swap attempts before a write gives up on a contended row.
pub const MAX_CAS_ATTEMPTS: usize = 5;

/// Encodes PostgREST filters (`col=op.value`) into a query string.
fn query_string<K: AsRef<str>, V: AsRef<str>>(params: &[(K, V)]) -> String {
    match Url::parse_with_params(
        "http://localhost/",
        params.iter().map(|(key, value)| (key.as_ref(), value.as_ref())),
    ) {
        Ok(url) => url.query().unwrap_or_default().to_string(),
        Err(_) => String::new(),
    }
}

fn storage_error(context: &str, err: anyhow::Error) -> AvailabilityError {
    if let Some(api) = err.downcast_ref::<ApiError>() {
        if api.is_conflict() {
            warn!("{}: storage reported a conflicting row", context);
            return AvailabilityError::Conflict("Availability overlaps an existing window".to_string());
        }
    }
    error!("{}: {}", context, err);
    AvailabilityError::Database(format!("{}: {}", context, err))
}

fn parse_rows(rows: Vec<Value>) -> Result<Vec<AvailabilityRecord>, AvailabilityError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(AvailabilityError::from))
        .collect()
}

/// Mutable columns of a record, as sent in PATCH bodies.
fn mutable_columns(record: &AvailabilityRecord) -> Result<Value, AvailabilityError> {
    let mut body = serde_json::to_value(record)?;
    if let Some(object) = body.as_object_mut() {
        object.remove("id");
        object.remove("provider_id");
        object.remove("created_at");
    }
    Ok(body)
}

/// PostgREST-backed store for the `provider_availability` table.
///
/// Overlap checks read the provider's day before writing; the table is
/// expected to carry an exclusion constraint so a racing insert fails with
/// 409 instead of landing. Counter and record updates are compare-and-swap
/// PATCHes keyed on the observed `current_appointments` and `status`.
#[derive(Clone)]
pub struct SupabaseAvailabilityStore {
    supabase: SupabaseClient,
}

impl SupabaseAvailabilityStore {
    pub fn new(supabase: SupabaseClient) -> Self {
        Self { supabase }
    }

    async fn select(&self, params: &[(String, String)]) -> Result<Vec<AvailabilityRecord>, AvailabilityError> {
        let path = format!("{}?{}", AVAILABILITY_PATH, query_string(params));
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await
            .map_err(|e| storage_error("Failed to query availability", e))?;
        parse_rows(rows)
    }

    async fn insert(&self, record: &AvailabilityRecord) -> Result<AvailabilityRecord, AvailabilityError> {
        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                AVAILABILITY_PATH,
                None,
                Some(serde_json::to_value(record)?),
                Some(SupabaseClient::representation_headers()),
            )
            .await
            .map_err(|e| storage_error("Failed to insert availability", e))?;

        parse_rows(rows)?
            .into_iter()
            .next()
            .ok_or_else(|| AvailabilityError::database("Insert returned no rows"))
    }

    /// PATCH guarded by the values observed when the change was computed.
    /// `Ok(None)` means another writer got there first.
    async fn swap(
        &self,
        observed: &AvailabilityRecord,
        body: Value,
    ) -> Result<Option<AvailabilityRecord>, AvailabilityError> {
        let guard = [
            ("id".to_string(), format!("eq.{}", observed.id)),
            (
                "current_appointments".to_string(),
                format!("eq.{}", observed.current_appointments),
            ),
            ("status".to_string(), format!("eq.{}", observed.status.as_str())),
        ];
        let path = format!("{}?{}", AVAILABILITY_PATH, query_string(&guard));

        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                None,
                Some(body),
                Some(SupabaseClient::representation_headers()),
            )
            .await
            .map_err(|e| storage_error("Failed to update availability", e))?;

        Ok(parse_rows(rows)?.into_iter().next())
    }

    async fn overlaps_existing(&self, candidate: &AvailabilityRecord) -> Result<bool, AvailabilityError> {
        let existing = self.find_on_date(candidate.provider_id, candidate.date).await?;
        Ok(existing.iter().any(|record| {
            record.id != candidate.id
                && ranges_overlap(
                    candidate.start_time,
                    candidate.end_time,
                    record.start_time,
                    record.end_time,
                )
        }))
    }

    /// Read, mutate locally, swap; repeated while other writers keep winning.
    async fn update_counter<F>(&self, id: Uuid, mutate: F) -> Result<CounterOutcome, AvailabilityError>
    where
        F: Fn(&mut AvailabilityRecord) -> Result<(), BookingRejection> + Send + Sync,
    {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let Some(observed) = self.find_by_id(id).await? else {
                return Ok(CounterOutcome::Missing);
            };

            let mut next = observed.clone();
            if let Err(reason) = mutate(&mut next) {
                return Ok(CounterOutcome::Rejected(reason));
            }

            let body = json!({
                "current_appointments": next.current_appointments,
                "status": next.status,
                "updated_at": next.updated_at,
            });

            if let Some(stored) = self.swap(&observed, body).await? {
                return Ok(CounterOutcome::Applied(stored));
            }
            debug!("Counter update on {} lost a race (attempt {})", id, attempt);
        }

        warn!("Giving up counter update on {} after {} attempts", id, MAX_CAS_ATTEMPTS);
        Err(AvailabilityError::Conflict(
            "Slot is being modified concurrently, please retry".to_string(),
        ))
    }
}

#[async_trait]
impl AvailabilityStore for SupabaseAvailabilityStore {
    async fn create(&self, record: AvailabilityRecord) -> Result<AvailabilityRecord, AvailabilityError> {
        if self.overlaps_existing(&record).await? {
            return Err(AvailabilityError::Conflict(format!(
                "Provider already has availability overlapping {} {}-{}",
                record.date,
                record.start_time.format("%H:%M"),
                record.end_time.format("%H:%M")
            )));
        }
        self.insert(&record).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AvailabilityRecord>, AvailabilityError> {
        let params = [
            ("id".to_string(), format!("eq.{}", id)),
            ("limit".to_string(), "1".to_string()),
        ];
        Ok(self.select(&params).await?.into_iter().next())
    }

    async fn find_by_provider(
        &self,
        provider_id: Uuid,
        filter: &ProviderFilter,
    ) -> Result<Vec<AvailabilityRecord>, AvailabilityError> {
        let mut params = vec![("provider_id".to_string(), format!("eq.{}", provider_id))];
        params.extend(filter.to_query_params());
        params.push((CHRONOLOGICAL.0.to_string(), CHRONOLOGICAL.1.to_string()));
        self.select(&params).await
    }

    async fn find_on_date(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilityRecord>, AvailabilityError> {
        let params = [
            ("provider_id".to_string(), format!("eq.{}", provider_id)),
            ("date".to_string(), format!("eq.{}", date)),
            ("order".to_string(), "start_time.asc".to_string()),
        ];
        self.select(&params).await
    }

    async fn update_by_id(
        &self,
        id: Uuid,
        patch: &AvailabilityPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<AvailabilityRecord>, AvailabilityError> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let Some(observed) = self.find_by_id(id).await? else {
                return Ok(None);
            };

            let mut updated = observed.clone();
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

            if patch.touches_time_range() && self.overlaps_existing(&updated).await? {
                return Err(AvailabilityError::Conflict(
                    "Updated time range overlaps existing availability".to_string(),
                ));
            }

            if let Some(stored) = self.swap(&observed, mutable_columns(&updated)?).await? {
                return Ok(Some(stored));
            }
            debug!("Update of {} raced a booking (attempt {})", id, attempt);
        }

        Err(AvailabilityError::Conflict(
            "Availability is being modified concurrently, please retry".to_string(),
        ))
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, AvailabilityError> {
        let Some(existing) = self.find_by_id(id).await? else {
            return Ok(false);
        };
        if existing.current_appointments > 0 {
            return Err(AvailabilityError::Conflict(format!(
                "Cannot delete availability with {} active appointments",
                existing.current_appointments
            )));
        }

        let guard = [
            ("id".to_string(), format!("eq.{}", id)),
            ("current_appointments".to_string(), "eq.0".to_string()),
        ];
        let path = format!("{}?{}", AVAILABILITY_PATH, query_string(&guard));
        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::DELETE,
                &path,
                None,
                None,
                Some(SupabaseClient::representation_headers()),
            )
            .await
            .map_err(|e| storage_error("Failed to delete availability", e))?;

        if !rows.is_empty() {
            return Ok(true);
        }

        // Nothing matched the guard: either gone already or booked meanwhile.
        match self.find_by_id(id).await? {
            Some(record) => Err(AvailabilityError::Conflict(format!(
                "Cannot delete availability with {} active appointments",
                record.current_appointments
            ))),
            None => Ok(false),
        }
    }

    async fn delete_series(&self, group_id: Uuid) -> Result<DeleteOutcome, AvailabilityError> {
        let guard = [
            ("recurrence_group_id".to_string(), format!("eq.{}", group_id)),
            ("current_appointments".to_string(), "eq.0".to_string()),
        ];
        let path = format!("{}?{}", AVAILABILITY_PATH, query_string(&guard));
        let deleted: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::DELETE,
                &path,
                None,
                None,
                Some(SupabaseClient::representation_headers()),
            )
            .await
            .map_err(|e| storage_error("Failed to delete availability series", e))?;

        let remaining = self
            .select(&[("recurrence_group_id".to_string(), format!("eq.{}", group_id))])
            .await?;

        Ok(DeleteOutcome {
            deleted_count: deleted.len(),
            retained_count: remaining.len(),
        })
    }

    async fn search(&self, filter: &SearchFilter) -> Result<Vec<AvailabilityRecord>, AvailabilityError> {
        let mut params = filter.to_query_params();
        params.push((CHRONOLOGICAL.0.to_string(), CHRONOLOGICAL.1.to_string()));
        let records = self.select(&params).await?;
        // Price ceiling and capacity are not expressible as plain column filters.
        Ok(records.into_iter().filter(|record| filter.matches(record)).collect())
    }

    async fn bulk_insert(&self, records: Vec<AvailabilityRecord>) -> Result<BulkInsertOutcome, AvailabilityError> {
        let mut outcome = BulkInsertOutcome::default();

        for record in records {
            if self.overlaps_existing(&record).await? {
                debug!("Skipping occurrence on {}: overlaps existing window", record.date);
                outcome.skipped += 1;
                continue;
            }
            match self.insert(&record).await {
                Ok(stored) => outcome.inserted.push(stored),
                Err(AvailabilityError::Conflict(_)) => {
                    debug!("Skipping occurrence on {}: rejected by storage constraint", record.date);
                    outcome.skipped += 1;
                }
                Err(e) => {
                    error!(
                        "Bulk insert stopped after {} records: {}",
                        outcome.inserted.len(),
                        e
                    );
                    return Err(e);
                }
            }
        }

        Ok(outcome)
    }

    async fn try_increment(
        &self,
        id: Uuid,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<CounterOutcome, AvailabilityError> {
        self.update_counter(id, |record| apply_booking(record, today, now))
            .await
    }

    async fn try_decrement(&self, id: Uuid, now: DateTime<Utc>) -> Result<CounterOutcome, AvailabilityError> {
        self.update_counter(id, |record| apply_cancellation(record, now))
            .await
    }
}

/// Provider lookup for search joins, reading the `providers` table.
#[derive(Clone)]
pub struct SupabaseProviderDirectory {
    supabase: SupabaseClient,
}

impl SupabaseProviderDirectory {
    pub fn new(supabase: SupabaseClient) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl ProviderDirectory for SupabaseProviderDirectory {
    async fn find_many(&self, ids: &[Uuid]) -> Result<Vec<ProviderSummary>, AvailabilityError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let list = ids.iter().map(Uuid::to_string).collect::<Vec<_>>().join(",");
        let params = [
            ("id".to_string(), format!("in.({})", list)),
            (
                "select".to_string(),
                "id,name,specialization,clinic_name,city,address,rating".to_string(),
            ),
        ];
        let path = format!("{}?{}", PROVIDERS_PATH, query_string(&params));

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await
            .map_err(|e| storage_error("Failed to load providers", e))?;

        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(AvailabilityError::from))
            .collect()
    }
}
