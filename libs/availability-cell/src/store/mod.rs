//! Persistence collaborators for availability records and provider lookup.
//!
//! Every check-then-write sequence (overlap check + insert, capacity check +
//! counter update, appointment check + delete) must be atomic per record
//! inside the implementation; callers never read-modify-write on their own.

pub mod memory;
pub mod supabase;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::AvailabilityError;
use crate::models::{
    AppointmentType, AvailabilityPatch, AvailabilityRecord, AvailabilityStatus, DeleteOutcome,
    LocationType, ProviderSummary,
};
use crate::services::booking::BookingRejection;

pub use memory::{InMemoryAvailabilityStore, InMemoryProviderDirectory};
pub use supabase::{SupabaseAvailabilityStore, SupabaseProviderDirectory};

/// Result of an atomic counter update.
#[derive(Debug, Clone, PartialEq)]
pub enum CounterOutcome {
    Applied(AvailabilityRecord),
    Rejected(BookingRejection),
    Missing,
}

#[derive(Debug, Clone, Default)]
pub struct BulkInsertOutcome {
    pub inserted: Vec<AvailabilityRecord>,
    /// Records refused at insert time because an overlapping window appeared.
    pub skipped: usize,
}

/// Provider-facing retrieval filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderFilter {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub status: Option<AvailabilityStatus>,
    pub appointment_type: Option<AppointmentType>,
}

impl ProviderFilter {
    pub fn matches(&self, record: &AvailabilityRecord) -> bool {
        self.start_date.is_none_or(|start| record.date >= start)
            && self.end_date.is_none_or(|end| record.date <= end)
            && self.status.is_none_or(|status| record.status == status)
            && self.appointment_type.is_none_or(|kind| record.appointment_type == kind)
    }

    /// PostgREST query parameters, one entry per active filter.
    pub fn to_query_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(start) = self.start_date {
            params.push(("date".to_string(), format!("gte.{}", start)));
        }
        if let Some(end) = self.end_date {
            params.push(("date".to_string(), format!("lte.{}", end)));
        }
        if let Some(status) = self.status {
            params.push(("status".to_string(), format!("eq.{}", status.as_str())));
        }
        if let Some(kind) = self.appointment_type {
            params.push(("appointment_type".to_string(), format!("eq.{}", kind.as_str())));
        }
        params
    }
}

/// Storage-level part of public search. Specialization/location text
/// matching happens after the provider join and is not part of this filter.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchFilter {
    pub date: Option<NaiveDate>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub appointment_type: Option<AppointmentType>,
    pub location_type: Option<LocationType>,
    pub insurance_accepted: Option<bool>,
    pub max_price: Option<f64>,
    pub timezone: Option<String>,
    pub available_only: bool,
}

impl Default for SearchFilter {
    fn default() -> Self {
        Self {
            date: None,
            start_date: None,
            end_date: None,
            appointment_type: None,
            location_type: None,
            insurance_accepted: None,
            max_price: None,
            timezone: None,
            available_only: true,
        }
    }
}

impl SearchFilter {
    pub fn matches(&self, record: &AvailabilityRecord) -> bool {
        self.date.is_none_or(|date| record.date == date)
            && self.start_date.is_none_or(|start| record.date >= start)
            && self.end_date.is_none_or(|end| record.date <= end)
            && self.appointment_type.is_none_or(|kind| record.appointment_type == kind)
            && self.location_type.is_none_or(|kind| record.location.location_type == kind)
            && self
                .insurance_accepted
                .is_none_or(|accepted| record.pricing.insurance_accepted == accepted)
            && self.max_price.is_none_or(|max| record.pricing.base_fee <= max)
            && self.timezone.as_ref().is_none_or(|tz| &record.timezone == tz)
            && (!self.available_only || record.is_available())
    }

    /// PostgREST query parameters. `max_price` lives inside a JSON column and
    /// is compared as text there, so it is left to [`SearchFilter::matches`].
    pub fn to_query_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(date) = self.date {
            params.push(("date".to_string(), format!("eq.{}", date)));
        }
        if let Some(start) = self.start_date {
            params.push(("date".to_string(), format!("gte.{}", start)));
        }
        if let Some(end) = self.end_date {
            params.push(("date".to_string(), format!("lte.{}", end)));
        }
        if let Some(kind) = self.appointment_type {
            params.push(("appointment_type".to_string(), format!("eq.{}", kind.as_str())));
        }
        if let Some(kind) = self.location_type {
            params.push(("location->>type".to_string(), format!("eq.{}", kind.as_str())));
        }
        if let Some(accepted) = self.insurance_accepted {
            params.push(("pricing->>insurance_accepted".to_string(), format!("eq.{}", accepted)));
        }
        if let Some(ref tz) = self.timezone {
            params.push(("timezone".to_string(), format!("eq.{}", tz)));
        }
        if self.available_only {
            params.push(("status".to_string(), "eq.available".to_string()));
        }
        params
    }
}

#[async_trait]
pub trait AvailabilityStore: Send + Sync {
    /// Inserts unless an overlapping window exists for the same provider/date.
    async fn create(&self, record: AvailabilityRecord) -> Result<AvailabilityRecord, AvailabilityError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AvailabilityRecord>, AvailabilityError>;

    async fn find_by_provider(
        &self,
        provider_id: Uuid,
        filter: &ProviderFilter,
    ) -> Result<Vec<AvailabilityRecord>, AvailabilityError>;

    /// Every record of one provider on one date, regardless of status.
    async fn find_on_date(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilityRecord>, AvailabilityError>;

    /// Applies the patch and re-derives status. Re-checks overlap when the
    /// patch moves the window. `Ok(None)` when the id is unknown.
    async fn update_by_id(
        &self,
        id: Uuid,
        patch: &AvailabilityPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<AvailabilityRecord>, AvailabilityError>;

    /// Refuses with `Conflict` while the record holds appointments.
    async fn delete_by_id(&self, id: Uuid) -> Result<bool, AvailabilityError>;

    /// Deletes every member of a recurrence series without appointments.
    async fn delete_series(&self, group_id: Uuid) -> Result<DeleteOutcome, AvailabilityError>;

    async fn search(&self, filter: &SearchFilter) -> Result<Vec<AvailabilityRecord>, AvailabilityError>;

    /// Inserts each record on its own; earlier inserts survive later failures.
    async fn bulk_insert(&self, records: Vec<AvailabilityRecord>) -> Result<BulkInsertOutcome, AvailabilityError>;

    /// `today` gates past windows; `now` stamps `updated_at`.
    async fn try_increment(
        &self,
        id: Uuid,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<CounterOutcome, AvailabilityError>;

    async fn try_decrement(&self, id: Uuid, now: DateTime<Utc>) -> Result<CounterOutcome, AvailabilityError>;
}

#[async_trait]
pub trait ProviderDirectory: Send + Sync {
    async fn find_many(&self, ids: &[Uuid]) -> Result<Vec<ProviderSummary>, AvailabilityError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::sample_record;

    #[test]
    fn provider_filter_translates_each_field() {
        let filter = ProviderFilter {
            start_date: NaiveDate::from_ymd_opt(2024, 12, 1),
            end_date: NaiveDate::from_ymd_opt(2024, 12, 31),
            status: Some(AvailabilityStatus::Booked),
            appointment_type: Some(AppointmentType::FollowUp),
        };

        let params = filter.to_query_params();
        assert!(params.contains(&("date".to_string(), "gte.2024-12-01".to_string())));
        assert!(params.contains(&("date".to_string(), "lte.2024-12-31".to_string())));
        assert!(params.contains(&("status".to_string(), "eq.booked".to_string())));
        assert!(params.contains(&("appointment_type".to_string(), "eq.follow_up".to_string())));
    }

    #[test]
    fn search_filter_defaults_to_available_only() {
        let filter = SearchFilter::default();
        let mut record = sample_record(1);
        assert!(filter.matches(&record));

        record.current_appointments = 1;
        record.status = AvailabilityStatus::Booked;
        assert!(!filter.matches(&record));

        let everything = SearchFilter { available_only: false, ..SearchFilter::default() };
        assert!(everything.matches(&record));
    }

    #[test]
    fn search_filter_applies_price_ceiling_and_insurance() {
        let mut record = sample_record(1);
        record.pricing.base_fee = 120.0;
        record.pricing.insurance_accepted = true;

        let cheap = SearchFilter { max_price: Some(100.0), ..SearchFilter::default() };
        assert!(!cheap.matches(&record));

        let fits = SearchFilter {
            max_price: Some(120.0),
            insurance_accepted: Some(true),
            ..SearchFilter::default()
        };
        assert!(fits.matches(&record));
        assert!(!fits.to_query_params().iter().any(|(key, _)| key.contains("base_fee")));
    }
}
