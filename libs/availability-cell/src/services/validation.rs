use std::ops::RangeInclusive;
use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveTime};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AvailabilityError, ConversionError, FieldError};
use crate::models::{
    AppointmentType, AvailabilityPatch, AvailabilityRecord, AvailabilityStatus, CreateAvailabilityRequest,
    Location, LocationInput, Pricing, PricingInput, RecurrencePattern, UpdateAvailabilityRequest,
};
use crate::services::time::{is_valid_timezone, parse_date, parse_time};

pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const DEFAULT_SLOT_DURATION: u32 = 30;
/// Neither a slot nor a break can outlast a day.
pub const MAX_SLOT_DURATION: u32 = 24 * 60;
pub const MAX_BREAK_DURATION: u32 = 24 * 60;
const MAX_NOTES_LENGTH: usize = 1000;
const MAX_REQUIREMENT_LENGTH: usize = 200;

static CURRENCY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{3}$").expect("static currency regex"));

/// Create request after every field passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedCreate {
    pub provider_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub timezone: String,
    pub recurrence: Option<(RecurrencePattern, NaiveDate)>,
    pub slot_duration: u32,
    pub break_duration: u32,
    pub max_appointments_per_slot: u32,
    pub appointment_type: AppointmentType,
    pub location: Location,
    pub pricing: Pricing,
    pub special_requirements: Vec<String>,
    pub notes: Option<String>,
}

/// Accumulates failures so the caller sees every bad field at once.
#[derive(Default)]
struct Collector {
    errors: Vec<FieldError>,
}

impl Collector {
    fn push(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    fn check<T>(&mut self, field: &str, result: Result<T, ConversionError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.push(field, e.to_string());
                None
            }
        }
    }

    fn bounded(&mut self, field: &str, value: i64, range: RangeInclusive<u32>) -> Option<u32> {
        match u32::try_from(value) {
            Ok(v) if range.contains(&v) => Some(v),
            _ => {
                self.push(
                    field,
                    format!("must be between {} and {}, got {}", range.start(), range.end(), value),
                );
                None
            }
        }
    }

    /// Parses a snake_case enum value through its serde representation.
    fn choice<T: DeserializeOwned>(&mut self, field: &str, raw: &str) -> Option<T> {
        match serde_json::from_value(Value::String(raw.to_string())) {
            Ok(value) => Some(value),
            Err(_) => {
                self.push(field, format!("'{}' is not a recognised value", raw));
                None
            }
        }
    }

    fn uuid(&mut self, field: &str, raw: &str) -> Option<Uuid> {
        match Uuid::parse_str(raw) {
            Ok(id) => Some(id),
            Err(_) => {
                self.push(field, format!("'{}' is not a valid id", raw));
                None
            }
        }
    }

    fn finish<T>(self, value: impl FnOnce() -> Option<T>) -> Result<T, AvailabilityError> {
        if !self.errors.is_empty() {
            return Err(AvailabilityError::Validation(self.errors));
        }
        value().ok_or_else(|| AvailabilityError::field("request", "incomplete request"))
    }
}

fn resolve_pricing(errors: &mut Collector, input: &PricingInput, base: &Pricing) -> Pricing {
    let pricing = Pricing {
        base_fee: input.base_fee.unwrap_or(base.base_fee),
        insurance_accepted: input.insurance_accepted.unwrap_or(base.insurance_accepted),
        currency: input.currency.clone().unwrap_or_else(|| base.currency.clone()),
    };
    if !pricing.base_fee.is_finite() || pricing.base_fee < 0.0 {
        errors.push("pricing.base_fee", "must be a non-negative amount");
    }
    if !CURRENCY_PATTERN.is_match(&pricing.currency) {
        errors.push("pricing.currency", "must be a 3-letter uppercase currency code");
    }
    pricing
}

fn resolve_location(errors: &mut Collector, input: &LocationInput, base: &Location) -> Option<Location> {
    let location_type = match input.location_type.as_deref() {
        Some(raw) => errors.choice("location.type", raw)?,
        None => base.location_type,
    };
    Some(Location {
        location_type,
        address: input.address.clone().or_else(|| base.address.clone()),
        room_number: input.room_number.clone().or_else(|| base.room_number.clone()),
    })
}

fn check_text(errors: &mut Collector, requirements: Option<&Vec<String>>, notes: Option<&String>) {
    if let Some(requirements) = requirements {
        for (index, requirement) in requirements.iter().enumerate() {
            if requirement.trim().is_empty() || requirement.len() > MAX_REQUIREMENT_LENGTH {
                errors.push(
                    &format!("special_requirements[{}]", index),
                    format!("must be 1-{} characters", MAX_REQUIREMENT_LENGTH),
                );
            }
        }
    }
    if notes.is_some_and(|notes| notes.len() > MAX_NOTES_LENGTH) {
        errors.push("notes", format!("must be at most {} characters", MAX_NOTES_LENGTH));
    }
}

pub fn validate_create(
    request: &CreateAvailabilityRequest,
    today: NaiveDate,
    max_recurrence_days: i64,
) -> Result<ValidatedCreate, AvailabilityError> {
    let mut errors = Collector::default();

    let provider_id = match request.provider_id.as_deref() {
        Some(raw) => errors.uuid("provider_id", raw),
        None => {
            errors.push("provider_id", "is required");
            None
        }
    };

    let date = errors.check("date", parse_date(&request.date));
    if let Some(date) = date {
        if date < today {
            errors.push("date", "must not be in the past");
        }
    }

    let start_time = errors.check("start_time", parse_time(&request.start_time));
    let end_time = errors.check("end_time", parse_time(&request.end_time));
    if let (Some(start), Some(end)) = (start_time, end_time) {
        if end <= start {
            errors.push("end_time", "must be after start_time");
        }
    }

    let timezone = request
        .timezone
        .clone()
        .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
    if !is_valid_timezone(&timezone) {
        errors.push("timezone", format!("'{}' is not a supported timezone", timezone));
    }

    let mut recurrence = None;
    if request.is_recurring.unwrap_or(false) {
        let pattern = match request.recurrence_pattern.as_deref() {
            Some(raw) => errors.choice::<RecurrencePattern>("recurrence_pattern", raw),
            None => {
                errors.push("recurrence_pattern", "is required for recurring availability");
                None
            }
        };
        let end_date = match request.recurrence_end_date.as_deref() {
            Some(raw) => errors.check("recurrence_end_date", parse_date(raw)),
            None => {
                errors.push("recurrence_end_date", "is required for recurring availability");
                None
            }
        };
        if let (Some(start), Some(end)) = (date, end_date) {
            if end < start {
                errors.push("recurrence_end_date", "must not be before date");
            } else if (end - start).num_days() > max_recurrence_days {
                errors.push(
                    "recurrence_end_date",
                    format!("must be within {} days of date", max_recurrence_days),
                );
            }
        }
        if let (Some(pattern), Some(end)) = (pattern, end_date) {
            recurrence = Some((pattern, end));
        }
    }

    let slot_duration = match request.slot_duration {
        Some(value) => errors.bounded("slot_duration", value, 1..=MAX_SLOT_DURATION),
        None => Some(DEFAULT_SLOT_DURATION),
    };
    let break_duration = match request.break_duration {
        Some(value) => errors.bounded("break_duration", value, 0..=MAX_BREAK_DURATION),
        None => Some(0),
    };
    let max_appointments = match request.max_appointments_per_slot {
        Some(value) => errors.bounded("max_appointments_per_slot", value, 1..=u32::MAX),
        None => Some(1),
    };

    let appointment_type = match request.appointment_type.as_deref() {
        Some(raw) => errors.choice("appointment_type", raw),
        None => Some(AppointmentType::default()),
    };
    let location = match request.location {
        Some(ref input) => resolve_location(&mut errors, input, &Location::default()),
        None => Some(Location::default()),
    };
    let pricing = match request.pricing {
        Some(ref input) => resolve_pricing(&mut errors, input, &Pricing::default()),
        None => Pricing::default(),
    };
    check_text(&mut errors, request.special_requirements.as_ref(), request.notes.as_ref());

    errors.finish(|| {
        Some(ValidatedCreate {
            provider_id: provider_id?,
            date: date?,
            start_time: start_time?,
            end_time: end_time?,
            timezone,
            recurrence,
            slot_duration: slot_duration?,
            break_duration: break_duration?,
            max_appointments_per_slot: max_appointments?,
            appointment_type: appointment_type?,
            location: location?,
            pricing,
            special_requirements: request.special_requirements.clone().unwrap_or_default(),
            notes: request.notes.clone(),
        })
    })
}

/// Validates an update against the record it modifies. UTC instants are
/// left for the caller to derive from the merged time fields.
pub fn validate_update(
    request: &UpdateAvailabilityRequest,
    existing: &AvailabilityRecord,
    today: NaiveDate,
) -> Result<AvailabilityPatch, AvailabilityError> {
    let mut errors = Collector::default();

    let date = request
        .date
        .as_deref()
        .and_then(|raw| errors.check("date", parse_date(raw)));
    if let Some(date) = date {
        if date < today {
            errors.push("date", "must not be in the past");
        }
    }

    let start_time = request
        .start_time
        .as_deref()
        .and_then(|raw| errors.check("start_time", parse_time(raw)));
    let end_time = request
        .end_time
        .as_deref()
        .and_then(|raw| errors.check("end_time", parse_time(raw)));

    let start_bad = request.start_time.is_some() && start_time.is_none();
    let end_bad = request.end_time.is_some() && end_time.is_none();
    if !start_bad && !end_bad {
        let merged_start = start_time.unwrap_or(existing.start_time);
        let merged_end = end_time.unwrap_or(existing.end_time);
        if merged_end <= merged_start {
            errors.push("end_time", "must be after start_time");
        }
    }

    if let Some(ref timezone) = request.timezone {
        if !is_valid_timezone(timezone) {
            errors.push("timezone", format!("'{}' is not a supported timezone", timezone));
        }
    }

    let status = request
        .status
        .as_deref()
        .and_then(|raw| errors.choice::<AvailabilityStatus>("status", raw));
    if status == Some(AvailabilityStatus::Booked) {
        errors.push("status", "booked is derived from capacity and cannot be set directly");
    }

    let slot_duration = request
        .slot_duration
        .and_then(|value| errors.bounded("slot_duration", value, 1..=MAX_SLOT_DURATION));
    let break_duration = request
        .break_duration
        .and_then(|value| errors.bounded("break_duration", value, 0..=MAX_BREAK_DURATION));
    let max_appointments = request
        .max_appointments_per_slot
        .and_then(|value| errors.bounded("max_appointments_per_slot", value, 1..=u32::MAX));

    let appointment_type = request
        .appointment_type
        .as_deref()
        .and_then(|raw| errors.choice("appointment_type", raw));
    let location = request
        .location
        .as_ref()
        .and_then(|input| resolve_location(&mut errors, input, &existing.location));
    let pricing = request
        .pricing
        .as_ref()
        .map(|input| resolve_pricing(&mut errors, input, &existing.pricing));
    check_text(&mut errors, request.special_requirements.as_ref(), request.notes.as_ref());

    errors.finish(|| {
        Some(AvailabilityPatch {
            date,
            start_time,
            end_time,
            timezone: request.timezone.clone(),
            utc_start_time: None,
            utc_end_time: None,
            slot_duration,
            break_duration,
            status,
            max_appointments_per_slot: max_appointments,
            appointment_type,
            location,
            pricing,
            special_requirements: request.special_requirements.clone(),
            notes: request.notes.clone(),
        })
    })
}
