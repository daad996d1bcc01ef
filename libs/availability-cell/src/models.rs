use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    Available,
    Booked,
    Cancelled,
    Blocked,
    Maintenance,
}

impl AvailabilityStatus {
    /// States set by an administrator, never by booking or cancellation.
    pub fn is_administrative(&self) -> bool {
        matches!(
            self,
            AvailabilityStatus::Cancelled | AvailabilityStatus::Blocked | AvailabilityStatus::Maintenance
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AvailabilityStatus::Available => "available",
            AvailabilityStatus::Booked => "booked",
            AvailabilityStatus::Cancelled => "cancelled",
            AvailabilityStatus::Blocked => "blocked",
            AvailabilityStatus::Maintenance => "maintenance",
        }
    }
}

impl std::fmt::Display for AvailabilityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentType {
    #[default]
    Consultation,
    FollowUp,
    Emergency,
    Telemedicine,
}

impl AppointmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentType::Consultation => "consultation",
            AppointmentType::FollowUp => "follow_up",
            AppointmentType::Emergency => "emergency",
            AppointmentType::Telemedicine => "telemedicine",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrencePattern {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LocationType {
    #[default]
    Clinic,
    Hospital,
    Telemedicine,
    HomeVisit,
}

impl LocationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationType::Clinic => "clinic",
            LocationType::Hospital => "hospital",
            LocationType::Telemedicine => "telemedicine",
            LocationType::HomeVisit => "home_visit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Location {
    #[serde(rename = "type")]
    pub location_type: LocationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub base_fee: f64,
    pub insurance_accepted: bool,
    pub currency: String,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            base_fee: 0.0,
            insurance_accepted: false,
            currency: "USD".to_string(),
        }
    }
}

/// One bookable window for one provider on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityRecord {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub timezone: String,
    pub utc_start_time: DateTime<Utc>,
    pub utc_end_time: DateTime<Utc>,
    #[serde(default)]
    pub is_recurring: bool,
    #[serde(default)]
    pub recurrence_pattern: Option<RecurrencePattern>,
    #[serde(default)]
    pub recurrence_end_date: Option<NaiveDate>,
    /// Shared by every occurrence expanded from the same template.
    #[serde(default)]
    pub recurrence_group_id: Option<Uuid>,
    pub slot_duration: u32,
    pub break_duration: u32,
    pub status: AvailabilityStatus,
    pub max_appointments_per_slot: u32,
    pub current_appointments: u32,
    pub appointment_type: AppointmentType,
    pub location: Location,
    pub pricing: Pricing,
    #[serde(default)]
    pub special_requirements: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AvailabilityRecord {
    pub fn is_available(&self) -> bool {
        self.status == AvailabilityStatus::Available
            && self.current_appointments < self.max_appointments_per_slot
    }

    pub fn can_be_booked(&self, today: NaiveDate) -> bool {
        self.is_available() && self.date >= today
    }

    pub fn remaining_capacity(&self) -> u32 {
        self.max_appointments_per_slot.saturating_sub(self.current_appointments)
    }
}

/// Raw create payload. Anything that can be malformed arrives untyped so
/// every bad field is reported at once instead of failing on the first
/// serde error.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CreateAvailabilityRequest {
    pub provider_id: Option<String>,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub timezone: Option<String>,
    pub is_recurring: Option<bool>,
    pub recurrence_pattern: Option<String>,
    pub recurrence_end_date: Option<String>,
    pub slot_duration: Option<i64>,
    pub break_duration: Option<i64>,
    pub max_appointments_per_slot: Option<i64>,
    pub appointment_type: Option<String>,
    pub location: Option<LocationInput>,
    pub pricing: Option<PricingInput>,
    pub special_requirements: Option<Vec<String>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateAvailabilityRequest {
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub timezone: Option<String>,
    pub slot_duration: Option<i64>,
    pub break_duration: Option<i64>,
    pub status: Option<String>,
    pub max_appointments_per_slot: Option<i64>,
    pub appointment_type: Option<String>,
    pub location: Option<LocationInput>,
    pub pricing: Option<PricingInput>,
    pub special_requirements: Option<Vec<String>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LocationInput {
    #[serde(rename = "type")]
    pub location_type: Option<String>,
    pub address: Option<String>,
    pub room_number: Option<String>,
}

/// Missing pricing fields fall back to [`Pricing::default`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PricingInput {
    pub base_fee: Option<f64>,
    pub insurance_accepted: Option<bool>,
    pub currency: Option<String>,
}

/// Typed field changes handed to the store. Derived UTC instants travel with
/// the time fields they were computed from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AvailabilityPatch {
    pub date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub timezone: Option<String>,
    pub utc_start_time: Option<DateTime<Utc>>,
    pub utc_end_time: Option<DateTime<Utc>>,
    pub slot_duration: Option<u32>,
    pub break_duration: Option<u32>,
    pub status: Option<AvailabilityStatus>,
    pub max_appointments_per_slot: Option<u32>,
    pub appointment_type: Option<AppointmentType>,
    pub location: Option<Location>,
    pub pricing: Option<Pricing>,
    pub special_requirements: Option<Vec<String>>,
    pub notes: Option<String>,
}

impl AvailabilityPatch {
    pub fn touches_time_range(&self) -> bool {
        self.date.is_some() || self.start_time.is_some() || self.end_time.is_some()
    }

    pub fn apply_to(&self, record: &mut AvailabilityRecord, now: DateTime<Utc>) {
        if let Some(date) = self.date {
            record.date = date;
        }
        if let Some(start) = self.start_time {
            record.start_time = start;
        }
        if let Some(end) = self.end_time {
            record.end_time = end;
        }
        if let Some(ref timezone) = self.timezone {
            record.timezone = timezone.clone();
        }
        if let Some(utc_start) = self.utc_start_time {
            record.utc_start_time = utc_start;
        }
        if let Some(utc_end) = self.utc_end_time {
            record.utc_end_time = utc_end;
        }
        if let Some(slot) = self.slot_duration {
            record.slot_duration = slot;
        }
        if let Some(gap) = self.break_duration {
            record.break_duration = gap;
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(max) = self.max_appointments_per_slot {
            record.max_appointments_per_slot = max;
        }
        if let Some(appointment_type) = self.appointment_type {
            record.appointment_type = appointment_type;
        }
        if let Some(ref location) = self.location {
            record.location = location.clone();
        }
        if let Some(ref pricing) = self.pricing {
            record.pricing = pricing.clone();
        }
        if let Some(ref requirements) = self.special_requirements {
            record.special_requirements = requirements.clone();
        }
        if let Some(ref notes) = self.notes {
            record.notes = Some(notes.clone());
        }
        record.updated_at = now;
    }
}

/// Record plus its wall-clock projection in the record's own timezone.
#[derive(Debug, Clone, Serialize)]
pub struct AvailabilityView {
    #[serde(flatten)]
    pub record: AvailabilityRecord,
    pub local_date: String,
    pub local_start_time: String,
    pub local_end_time: String,
    pub is_available: bool,
    pub can_be_booked: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecurrenceSummary {
    pub created_count: usize,
    pub skipped_count: usize,
    pub occurrences: Vec<AvailabilityView>,
    pub date_range: DateRange,
    pub total_capacity: u64,
    pub recurrence_group_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CreateAvailabilityOutcome {
    Single { availability: AvailabilityView },
    Recurring { summary: RecurrenceSummary },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SlotCheck {
    pub is_available: bool,
    pub can_be_booked: bool,
    pub current_appointments: u32,
    pub max_appointments: u32,
    pub remaining_capacity: u32,
    pub status: AvailabilityStatus,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted_count: usize,
    /// Series members left in place because they still hold appointments.
    pub retained_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotSummary {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub local_start_time: String,
    pub local_end_time: String,
    pub timezone: String,
    pub status: AvailabilityStatus,
    pub current_appointments: u32,
    pub max_appointments_per_slot: u32,
    pub is_available: bool,
    pub appointment_type: AppointmentType,
    pub location: Location,
    pub pricing: Pricing,
}

#[derive(Debug, Clone, Serialize)]
pub struct DateBucket {
    pub date: NaiveDate,
    pub slots: Vec<SlotSummary>,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct AvailabilityCounts {
    pub total_slots: usize,
    pub available_slots: usize,
    pub booked_slots: usize,
    pub cancelled_slots: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total_items: usize,
    pub total_pages: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderAvailabilityResponse {
    pub provider_id: Uuid,
    pub availability: Vec<DateBucket>,
    pub summary: AvailabilityCounts,
    pub pagination: Pagination,
}

/// Joined provider data used by public search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSummary {
    pub id: Uuid,
    pub name: String,
    pub specialization: String,
    #[serde(default)]
    pub clinic_name: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub rating: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderGroup {
    pub provider_id: Uuid,
    pub provider: Option<ProviderSummary>,
    pub slots: Vec<SlotSummary>,
    pub total_slots: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub providers: Vec<ProviderGroup>,
    pub total_slots: usize,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderAvailabilityQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub status: Option<AvailabilityStatus>,
    pub appointment_type: Option<AppointmentType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    Date,
    Price,
    Provider,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchCriteria {
    pub date: Option<NaiveDate>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub appointment_type: Option<AppointmentType>,
    pub location_type: Option<LocationType>,
    pub insurance_accepted: Option<bool>,
    pub max_price: Option<f64>,
    pub timezone: Option<String>,
    pub available_only: Option<bool>,
    pub specialization: Option<String>,
    pub location: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort_by: Option<SortBy>,
    pub sort_order: Option<SortOrder>,
}

/// Strict `HH:mm` on the way out; storage may hand back `HH:mm:ss`.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(serde::de::Error::custom)
    }
}
