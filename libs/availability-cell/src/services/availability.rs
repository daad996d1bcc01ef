use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::{AppConfig, SchedulingConfig, StoreBackend};
use shared_database::supabase::SupabaseClient;

use crate::error::AvailabilityError;
use crate::models::{
    AvailabilityRecord, AvailabilityStatus, AvailabilityView, CreateAvailabilityOutcome, CreateAvailabilityRequest,
    DeleteOutcome, ProviderAvailabilityQuery, ProviderAvailabilityResponse, RecurrenceSummary, SearchCriteria,
    SearchResponse, SlotCheck, UpdateAvailabilityRequest,
};
use crate::services::booking::BookingStateMachine;
use crate::services::clock::{Clock, SystemClock};
use crate::services::conflict::ConflictDetector;
use crate::services::recurrence::RecurrenceExpander;
use crate::services::search::QueryEngine;
use crate::services::time::{format_time, generate_time_slots, TimeConverter, TimeSlot};
use crate::services::validation::{validate_create, validate_update, ValidatedCreate};
use crate::store::{
    AvailabilityStore, InMemoryAvailabilityStore, InMemoryProviderDirectory, ProviderDirectory,
    SupabaseAvailabilityStore, SupabaseProviderDirectory,
};

/// Sub-slot preview of one availability window.
#[derive(Debug, Clone, Serialize)]
pub struct TimeSlotPreview {
    pub availability_id: Uuid,
    pub date: chrono::NaiveDate,
    pub timezone: String,
    pub slot_duration: u32,
    pub break_duration: u32,
    pub slots: Vec<TimeSlot>,
}

/// Entry point for the HTTP layer. Owns the collaborators and wires the
/// detector, expander, booking machine and query engine over one store.
#[derive(Clone)]
pub struct AvailabilityService {
    store: Arc<dyn AvailabilityStore>,
    converter: TimeConverter,
    clock: Arc<dyn Clock>,
    detector: ConflictDetector,
    expander: RecurrenceExpander,
    booking: BookingStateMachine,
    queries: QueryEngine,
    settings: SchedulingConfig,
}

impl AvailabilityService {
    pub fn new(
        store: Arc<dyn AvailabilityStore>,
        directory: Arc<dyn ProviderDirectory>,
        converter: TimeConverter,
        clock: Arc<dyn Clock>,
        settings: SchedulingConfig,
    ) -> Self {
        let detector = ConflictDetector::new(store.clone());
        let expander = RecurrenceExpander::new(store.clone(), detector.clone(), converter.clone());
        let booking = BookingStateMachine::new(store.clone(), clock.clone());
        let queries = QueryEngine::new(
            store.clone(),
            directory,
            converter.clone(),
            clock.clone(),
            settings.clone(),
        );

        Self {
            store,
            converter,
            clock,
            detector,
            expander,
            booking,
            queries,
            settings,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let (store, directory): (Arc<dyn AvailabilityStore>, Arc<dyn ProviderDirectory>) =
            match config.effective_store() {
                StoreBackend::Supabase => {
                    info!("Using Supabase availability store");
                    let client = SupabaseClient::new(config);
                    (
                        Arc::new(SupabaseAvailabilityStore::new(client.clone())),
                        Arc::new(SupabaseProviderDirectory::new(client)),
                    )
                }
                StoreBackend::Memory => {
                    if config.availability_store == StoreBackend::Supabase {
                        warn!("Supabase store requested but not configured, falling back to in-memory store");
                    } else {
                        info!("Using in-memory availability store");
                    }
                    (
                        Arc::new(InMemoryAvailabilityStore::new()),
                        Arc::new(InMemoryProviderDirectory::new()),
                    )
                }
            };

        Self::new(
            store,
            directory,
            TimeConverter::default(),
            Arc::new(SystemClock),
            config.scheduling.clone(),
        )
    }

    fn template_from(&self, validated: ValidatedCreate) -> AvailabilityRecord {
        let now = self.clock.now();
        let (recurrence_pattern, recurrence_end_date) = match validated.recurrence {
            Some((pattern, end)) => (Some(pattern), Some(end)),
            None => (None, None),
        };

        AvailabilityRecord {
            id: Uuid::new_v4(),
            provider_id: validated.provider_id,
            date: validated.date,
            start_time: validated.start_time,
            end_time: validated.end_time,
            utc_start_time: self
                .converter
                .to_utc(validated.date, validated.start_time, &validated.timezone),
            utc_end_time: self
                .converter
                .to_utc(validated.date, validated.end_time, &validated.timezone),
            timezone: validated.timezone,
            is_recurring: recurrence_pattern.is_some(),
            recurrence_pattern,
            recurrence_end_date,
            recurrence_group_id: None,
            slot_duration: validated.slot_duration,
            break_duration: validated.break_duration,
            status: AvailabilityStatus::Available,
            max_appointments_per_slot: validated.max_appointments_per_slot,
            current_appointments: 0,
            appointment_type: validated.appointment_type,
            location: validated.location,
            pricing: validated.pricing,
            special_requirements: validated.special_requirements,
            notes: validated.notes,
            created_at: now,
            updated_at: now,
        }
    }

    async fn require(&self, id: Uuid) -> Result<AvailabilityRecord, AvailabilityError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| AvailabilityError::not_found(id))
    }

    #[instrument(skip(self, request), fields(provider_id = ?request.provider_id, date = %request.date))]
    pub async fn create_availability(
        &self,
        request: CreateAvailabilityRequest,
    ) -> Result<CreateAvailabilityOutcome, AvailabilityError> {
        let validated = validate_create(&request, self.clock.today(), self.settings.max_recurrence_days)?;
        let recurrence = validated.recurrence;
        let template = self.template_from(validated);

        if let Some((pattern, end_date)) = recurrence {
            let outcome = self
                .expander
                .expand(&template, pattern, end_date, self.clock.now())
                .await?;

            let summary = RecurrenceSummary {
                created_count: outcome.created.len(),
                skipped_count: outcome.skipped,
                occurrences: outcome
                    .created
                    .into_iter()
                    .map(|record| self.queries.project(record))
                    .collect(),
                date_range: outcome.date_range,
                total_capacity: outcome.total_capacity,
                recurrence_group_id: outcome.group_id,
            };
            return Ok(CreateAvailabilityOutcome::Recurring { summary });
        }

        if self
            .detector
            .has_conflict(template.provider_id, template.date, template.start_time, template.end_time, None)
            .await?
        {
            return Err(AvailabilityError::Conflict(format!(
                "Provider already has availability overlapping {} {}-{}",
                template.date,
                format_time(template.start_time),
                format_time(template.end_time)
            )));
        }

        let created = self.store.create(template).await?;
        info!("Created availability {} for provider {}", created.id, created.provider_id);

        Ok(CreateAvailabilityOutcome::Single {
            availability: self.queries.project(created),
        })
    }

    #[instrument(skip(self))]
    pub async fn get_availability(&self, id: Uuid) -> Result<AvailabilityView, AvailabilityError> {
        let record = self.require(id).await?;
        Ok(self.queries.project(record))
    }

    pub async fn get_availability_by_provider(
        &self,
        provider_id: Uuid,
        query: &ProviderAvailabilityQuery,
    ) -> Result<ProviderAvailabilityResponse, AvailabilityError> {
        self.queries.provider_availability(provider_id, query).await
    }

    pub async fn search_availability(&self, criteria: &SearchCriteria) -> Result<SearchResponse, AvailabilityError> {
        self.queries.search(criteria).await
    }

    #[instrument(skip(self, request))]
    pub async fn update_availability(
        &self,
        id: Uuid,
        request: UpdateAvailabilityRequest,
    ) -> Result<AvailabilityView, AvailabilityError> {
        let existing = self.require(id).await?;
        let mut patch = validate_update(&request, &existing, self.clock.today())?;

        if let Some(max) = patch.max_appointments_per_slot {
            if max < existing.current_appointments {
                return Err(AvailabilityError::field(
                    "max_appointments_per_slot",
                    format!(
                        "cannot be lower than the {} appointments already booked",
                        existing.current_appointments
                    ),
                ));
            }
        }

        if patch.touches_time_range() || patch.timezone.is_some() {
            let date = patch.date.unwrap_or(existing.date);
            let start = patch.start_time.unwrap_or(existing.start_time);
            let end = patch.end_time.unwrap_or(existing.end_time);
            let timezone = patch.timezone.clone().unwrap_or_else(|| existing.timezone.clone());

            if patch.touches_time_range() {
                let conflicts = self
                    .detector
                    .find_conflicts(existing.provider_id, date, start, end, Some(id))
                    .await?;
                if !conflicts.is_empty() {
                    return Err(AvailabilityError::Conflict(format!(
                        "Updated window overlaps {} existing availability record(s)",
                        conflicts.len()
                    )));
                }
            }

            patch.utc_start_time = Some(self.converter.to_utc(date, start, &timezone));
            patch.utc_end_time = Some(self.converter.to_utc(date, end, &timezone));
        }

        let updated = self
            .store
            .update_by_id(id, &patch, self.clock.now())
            .await?
            .ok_or_else(|| AvailabilityError::not_found(id))?;

        info!("Updated availability {}", id);
        Ok(self.queries.project(updated))
    }

    /// Deletes one record, or with `delete_recurring` every member of its
    /// series that holds no appointments.
    #[instrument(skip(self))]
    pub async fn delete_availability(
        &self,
        id: Uuid,
        delete_recurring: bool,
    ) -> Result<DeleteOutcome, AvailabilityError> {
        let existing = self.require(id).await?;

        if delete_recurring {
            if let Some(group_id) = existing.recurrence_group_id {
                let outcome = self.store.delete_series(group_id).await?;
                info!(
                    "Deleted {} occurrences of series {} ({} retained with appointments)",
                    outcome.deleted_count, group_id, outcome.retained_count
                );
                return Ok(outcome);
            }
            debug!("Availability {} is not part of a series, deleting it alone", id);
        }

        if !self.store.delete_by_id(id).await? {
            return Err(AvailabilityError::not_found(id));
        }

        info!("Deleted availability {}", id);
        Ok(DeleteOutcome {
            deleted_count: 1,
            retained_count: 0,
        })
    }

    pub async fn check_slot_availability(&self, id: Uuid) -> Result<SlotCheck, AvailabilityError> {
        let record = self.require(id).await?;

        Ok(SlotCheck {
            is_available: record.is_available(),
            can_be_booked: record.can_be_booked(self.clock.today()),
            current_appointments: record.current_appointments,
            max_appointments: record.max_appointments_per_slot,
            remaining_capacity: record.remaining_capacity(),
            status: record.status,
        })
    }

    pub async fn get_time_slots(&self, id: Uuid) -> Result<TimeSlotPreview, AvailabilityError> {
        let record = self.require(id).await?;
        let slots = generate_time_slots(
            &format_time(record.start_time),
            &format_time(record.end_time),
            record.slot_duration,
            record.break_duration,
        )?;

        Ok(TimeSlotPreview {
            availability_id: record.id,
            date: record.date,
            timezone: record.timezone,
            slot_duration: record.slot_duration,
            break_duration: record.break_duration,
            slots,
        })
    }

    pub async fn book_slot(&self, id: Uuid) -> Result<AvailabilityView, AvailabilityError> {
        let record = self.booking.book_slot(id).await?;
        Ok(self.queries.project(record))
    }

    pub async fn cancel_slot(&self, id: Uuid) -> Result<AvailabilityView, AvailabilityError> {
        let record = self.booking.cancel_slot(id).await?;
        Ok(self.queries.project(record))
    }
}
