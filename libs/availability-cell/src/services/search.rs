use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, instrument};
use uuid::Uuid;

use shared_config::SchedulingConfig;

use crate::error::AvailabilityError;
use crate::models::{
    AvailabilityCounts, AvailabilityRecord, AvailabilityStatus, AvailabilityView, DateBucket, Pagination,
    ProviderAvailabilityQuery, ProviderAvailabilityResponse, ProviderGroup, ProviderSummary, SearchCriteria,
    SearchResponse, SlotSummary, SortBy, SortOrder,
};
use crate::services::clock::Clock;
use crate::services::time::{format_time, TimeConverter};
use crate::store::{AvailabilityStore, ProviderDirectory, ProviderFilter, SearchFilter};

/// Page number and size after defaults and clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub fn resolve(page: Option<u32>, limit: Option<u32>, settings: &SchedulingConfig) -> Self {
        let max = settings.max_page_limit.max(1);
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(settings.default_page_limit).clamp(1, max),
        }
    }

    pub fn apply<T>(&self, items: Vec<T>) -> (Vec<T>, Pagination) {
        let total_items = items.len();
        let total_pages = total_items.div_ceil(self.limit as usize) as u32;
        let skip = (self.page as usize - 1).saturating_mul(self.limit as usize);

        let page_items = items.into_iter().skip(skip).take(self.limit as usize).collect();
        (
            page_items,
            Pagination {
                page: self.page,
                limit: self.limit,
                total_items,
                total_pages,
            },
        )
    }
}

pub fn project(record: AvailabilityRecord, converter: &TimeConverter, today: NaiveDate) -> AvailabilityView {
    let start = converter.utc_to_local(record.utc_start_time, &record.timezone);
    let end = converter.utc_to_local(record.utc_end_time, &record.timezone);
    let is_available = record.is_available();
    let can_be_booked = record.can_be_booked(today);

    AvailabilityView {
        local_date: start.date,
        local_start_time: start.time,
        local_end_time: end.time,
        is_available,
        can_be_booked,
        record,
    }
}

pub fn summarize(record: &AvailabilityRecord, converter: &TimeConverter) -> SlotSummary {
    let start = converter.utc_to_local(record.utc_start_time, &record.timezone);
    let end = converter.utc_to_local(record.utc_end_time, &record.timezone);

    SlotSummary {
        id: record.id,
        provider_id: record.provider_id,
        date: record.date,
        start_time: format_time(record.start_time),
        end_time: format_time(record.end_time),
        local_start_time: start.time,
        local_end_time: end.time,
        timezone: record.timezone.clone(),
        status: record.status,
        current_appointments: record.current_appointments,
        max_appointments_per_slot: record.max_appointments_per_slot,
        is_available: record.is_available(),
        appointment_type: record.appointment_type,
        location: record.location.clone(),
        pricing: record.pricing.clone(),
    }
}

pub fn count_statuses(records: &[AvailabilityRecord]) -> AvailabilityCounts {
    let mut counts = AvailabilityCounts {
        total_slots: records.len(),
        ..Default::default()
    };
    for record in records {
        if record.is_available() {
            counts.available_slots += 1;
        }
        match record.status {
            AvailabilityStatus::Booked => counts.booked_slots += 1,
            AvailabilityStatus::Cancelled => counts.cancelled_slots += 1,
            _ => {}
        }
    }
    counts
}

/// Groups records (already sorted by date and start) into per-date buckets.
pub fn bucket_by_date(records: &[AvailabilityRecord], converter: &TimeConverter) -> Vec<DateBucket> {
    let mut buckets: BTreeMap<NaiveDate, Vec<SlotSummary>> = BTreeMap::new();
    for record in records {
        buckets.entry(record.date).or_default().push(summarize(record, converter));
    }
    buckets
        .into_iter()
        .map(|(date, slots)| DateBucket { date, slots })
        .collect()
}

/// Case-insensitive substring match; a missing haystack never matches.
fn contains_ignore_case(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|value| value.to_lowercase().contains(&needle.to_lowercase()))
}

fn matches_specialization(provider: Option<&ProviderSummary>, needle: &str) -> bool {
    contains_ignore_case(provider.map(|p| p.specialization.as_str()), needle)
}

fn matches_location(record: &AvailabilityRecord, provider: Option<&ProviderSummary>, needle: &str) -> bool {
    contains_ignore_case(record.location.address.as_deref(), needle)
        || contains_ignore_case(record.location.room_number.as_deref(), needle)
        || provider.is_some_and(|p| {
            contains_ignore_case(p.city.as_deref(), needle)
                || contains_ignore_case(p.address.as_deref(), needle)
                || contains_ignore_case(p.clinic_name.as_deref(), needle)
        })
}

fn compare_slots(a: &SlotSummary, b: &SlotSummary, sort_by: SortBy) -> Ordering {
    let chronological = (a.date, &a.start_time).cmp(&(b.date, &b.start_time));
    match sort_by {
        SortBy::Price => a
            .pricing
            .base_fee
            .total_cmp(&b.pricing.base_fee)
            .then(chronological),
        SortBy::Date | SortBy::Provider => chronological,
    }
}

fn provider_name(group: &ProviderGroup) -> String {
    group
        .provider
        .as_ref()
        .map(|p| p.name.to_lowercase())
        .unwrap_or_default()
}

/// Sorts slots inside each group, then groups by their first slot
/// (or by provider name).
pub fn sort_groups(groups: &mut [ProviderGroup], sort_by: SortBy, order: SortOrder) {
    let directed = |ordering: Ordering| match order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    };

    for group in groups.iter_mut() {
        group.slots.sort_by(|a, b| directed(compare_slots(a, b, sort_by)));
    }

    groups.sort_by(|a, b| {
        let ordering = match sort_by {
            SortBy::Provider => directed(provider_name(a).cmp(&provider_name(b))),
            _ => match (a.slots.first(), b.slots.first()) {
                (Some(x), Some(y)) => directed(compare_slots(x, y, sort_by)),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        };
        ordering.then(a.provider_id.cmp(&b.provider_id))
    });
}

impl SearchCriteria {
    pub fn to_filter(&self) -> SearchFilter {
        SearchFilter {
            date: self.date,
            start_date: self.start_date,
            end_date: self.end_date,
            appointment_type: self.appointment_type,
            location_type: self.location_type,
            insurance_accepted: self.insurance_accepted,
            max_price: self.max_price,
            timezone: self.timezone.clone(),
            available_only: self.available_only.unwrap_or(true),
        }
    }
}

impl ProviderAvailabilityQuery {
    pub fn to_filter(&self) -> ProviderFilter {
        ProviderFilter {
            start_date: self.start_date,
            end_date: self.end_date,
            status: self.status,
            appointment_type: self.appointment_type,
        }
    }
}

/// Read side of the scheduling engine: provider retrieval and public search.
#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<dyn AvailabilityStore>,
    directory: Arc<dyn ProviderDirectory>,
    converter: TimeConverter,
    clock: Arc<dyn Clock>,
    settings: SchedulingConfig,
}

impl QueryEngine {
    pub fn new(
        store: Arc<dyn AvailabilityStore>,
        directory: Arc<dyn ProviderDirectory>,
        converter: TimeConverter,
        clock: Arc<dyn Clock>,
        settings: SchedulingConfig,
    ) -> Self {
        Self {
            store,
            directory,
            converter,
            clock,
            settings,
        }
    }

    pub fn project(&self, record: AvailabilityRecord) -> AvailabilityView {
        project(record, &self.converter, self.clock.today())
    }

    #[instrument(skip(self, query))]
    pub async fn provider_availability(
        &self,
        provider_id: Uuid,
        query: &ProviderAvailabilityQuery,
    ) -> Result<ProviderAvailabilityResponse, AvailabilityError> {
        if let (Some(start), Some(end)) = (query.start_date, query.end_date) {
            if end < start {
                return Err(AvailabilityError::field("end_date", "must not be before start_date"));
            }
        }

        let page = PageRequest::resolve(query.page, query.limit, &self.settings);
        let mut records = self.store.find_by_provider(provider_id, &query.to_filter()).await?;
        records.sort_by(|a, b| (a.date, a.start_time).cmp(&(b.date, b.start_time)));

        let summary = count_statuses(&records);
        let (availability, pagination) = page.apply(bucket_by_date(&records, &self.converter));

        debug!(
            "Provider {} has {} records across {} dates",
            provider_id, summary.total_slots, pagination.total_items
        );

        Ok(ProviderAvailabilityResponse {
            provider_id,
            availability,
            summary,
            pagination,
        })
    }

    #[instrument(skip(self, criteria))]
    pub async fn search(&self, criteria: &SearchCriteria) -> Result<SearchResponse, AvailabilityError> {
        if let (Some(start), Some(end)) = (criteria.start_date, criteria.end_date) {
            if end < start {
                return Err(AvailabilityError::field("end_date", "must not be before start_date"));
            }
        }
        if criteria.max_price.is_some_and(|price| !price.is_finite() || price < 0.0) {
            return Err(AvailabilityError::field("max_price", "must be a non-negative amount"));
        }

        let page = PageRequest::resolve(criteria.page, criteria.limit, &self.settings);
        let filter = criteria.to_filter();

        let records: Vec<AvailabilityRecord> = self
            .store
            .search(&filter)
            .await?
            .into_iter()
            .filter(|record| filter.matches(record))
            .collect();

        let mut provider_ids: Vec<Uuid> = records.iter().map(|r| r.provider_id).collect();
        provider_ids.sort();
        provider_ids.dedup();

        let providers: HashMap<Uuid, ProviderSummary> = if provider_ids.is_empty() {
            HashMap::new()
        } else {
            self.directory
                .find_many(&provider_ids)
                .await?
                .into_iter()
                .map(|p| (p.id, p))
                .collect()
        };

        let specialization = criteria.specialization.as_deref().filter(|s| !s.trim().is_empty());
        let location = criteria.location.as_deref().filter(|s| !s.trim().is_empty());

        let mut grouped: HashMap<Uuid, Vec<SlotSummary>> = HashMap::new();
        for record in &records {
            let provider = providers.get(&record.provider_id);
            if specialization.is_some_and(|needle| !matches_specialization(provider, needle)) {
                continue;
            }
            if location.is_some_and(|needle| !matches_location(record, provider, needle)) {
                continue;
            }
            grouped
                .entry(record.provider_id)
                .or_default()
                .push(summarize(record, &self.converter));
        }

        let total_slots = grouped.values().map(Vec::len).sum();
        let mut groups: Vec<ProviderGroup> = grouped
            .into_iter()
            .map(|(provider_id, slots)| ProviderGroup {
                provider_id,
                provider: providers.get(&provider_id).cloned(),
                total_slots: slots.len(),
                slots,
            })
            .collect();

        sort_groups(
            &mut groups,
            criteria.sort_by.unwrap_or_default(),
            criteria.sort_order.unwrap_or_default(),
        );

        let (providers, pagination) = page.apply(groups);
        debug!(
            "Search matched {} slots across {} providers",
            total_slots, pagination.total_items
        );

        Ok(SearchResponse {
            providers,
            total_slots,
            pagination,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::sample_record;

    fn settings() -> SchedulingConfig {
        SchedulingConfig {
            default_page_limit: 20,
            max_page_limit: 100,
            max_recurrence_days: 366,
        }
    }

    #[test]
    fn page_request_defaults_and_clamps() {
        assert_eq!(PageRequest::resolve(None, None, &settings()), PageRequest { page: 1, limit: 20 });
        assert_eq!(
            PageRequest::resolve(Some(0), Some(500), &settings()),
            PageRequest { page: 1, limit: 100 }
        );
        assert_eq!(PageRequest::resolve(Some(3), Some(0), &settings()).limit, 1);
    }

    #[test]
    fn pagination_reports_totals_and_slices() {
        let page = PageRequest { page: 2, limit: 2 };
        let (items, pagination) = page.apply(vec![1, 2, 3, 4, 5]);
        assert_eq!(items, vec![3, 4]);
        assert_eq!(pagination.total_items, 5);
        assert_eq!(pagination.total_pages, 3);

        let (beyond, _) = PageRequest { page: 9, limit: 2 }.apply(vec![1, 2, 3]);
        assert!(beyond.is_empty());
    }

    #[test]
    fn counts_use_capacity_for_available() {
        let open = sample_record(2);
        let mut full = sample_record(1);
        full.current_appointments = 1;
        full.status = AvailabilityStatus::Booked;
        let mut cancelled = sample_record(1);
        cancelled.status = AvailabilityStatus::Cancelled;
        let mut inconsistent = sample_record(1);
        inconsistent.current_appointments = 1;

        let counts = count_statuses(&[open, full, cancelled, inconsistent]);
        assert_eq!(
            counts,
            AvailabilityCounts {
                total_slots: 4,
                available_slots: 1,
                booked_slots: 1,
                cancelled_slots: 1,
            }
        );
    }

    #[test]
    fn buckets_group_by_date_and_project_local_times() {
        let first = sample_record(1);
        let mut second = sample_record(1);
        second.start_time = chrono::NaiveTime::from_hms_opt(18, 0, 0).unwrap();
        let mut later = sample_record(1);
        later.date = later.date.succ_opt().unwrap();

        let buckets = bucket_by_date(&[first, second, later], &TimeConverter::default());
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].slots.len(), 2);
        assert_eq!(buckets[0].slots[0].local_start_time, "09:00");
        assert_eq!(buckets[0].slots[0].local_end_time, "17:00");
    }

    #[test]
    fn substring_match_ignores_case_and_missing_data() {
        assert!(contains_ignore_case(Some("Pediatric Cardiology"), "cardio"));
        assert!(!contains_ignore_case(None, "cardio"));
        assert!(!contains_ignore_case(Some("Dermatology"), "cardio"));
    }

    #[test]
    fn groups_sort_by_price_descending() {
        let converter = TimeConverter::default();
        let mut cheap = sample_record(1);
        cheap.pricing.base_fee = 50.0;
        let mut pricey = sample_record(1);
        pricey.pricing.base_fee = 150.0;

        let mut groups: Vec<ProviderGroup> = [cheap, pricey]
            .iter()
            .map(|record| ProviderGroup {
                provider_id: record.provider_id,
                provider: None,
                slots: vec![summarize(record, &converter)],
                total_slots: 1,
            })
            .collect();

        sort_groups(&mut groups, SortBy::Price, SortOrder::Desc);
        assert_eq!(groups[0].slots[0].pricing.base_fee, 150.0);

        sort_groups(&mut groups, SortBy::Price, SortOrder::Asc);
        assert_eq!(groups[0].slots[0].pricing.base_fee, 50.0);
    }
}
