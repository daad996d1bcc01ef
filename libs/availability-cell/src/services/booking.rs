use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::AvailabilityError;
use crate::models::{AvailabilityRecord, AvailabilityStatus};
use crate::services::clock::Clock;
use crate::store::{AvailabilityStore, CounterOutcome};

/// Status after a counter mutation. Administrative states are sticky;
/// otherwise the record is `booked` exactly when it is at capacity.
pub fn next_status(
    current: AvailabilityStatus,
    current_appointments: u32,
    max_appointments: u32,
) -> AvailabilityStatus {
    if current.is_administrative() {
        return current;
    }
    if current_appointments >= max_appointments {
        AvailabilityStatus::Booked
    } else {
        AvailabilityStatus::Available
    }
}

/// Why a counter mutation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingRejection {
    Full,
    NotBookable(AvailabilityStatus),
    InPast,
    NoAppointments,
}

impl std::fmt::Display for BookingRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingRejection::Full => write!(f, "Slot is fully booked"),
            BookingRejection::NotBookable(status) => write!(f, "Slot is {} and cannot be booked", status),
            BookingRejection::InPast => write!(f, "Slot date is in the past"),
            BookingRejection::NoAppointments => write!(f, "Slot has no appointments to cancel"),
        }
    }
}

pub fn check_bookable(record: &AvailabilityRecord, today: NaiveDate) -> Result<(), BookingRejection> {
    if record.status != AvailabilityStatus::Available {
        return Err(if record.status == AvailabilityStatus::Booked {
            BookingRejection::Full
        } else {
            BookingRejection::NotBookable(record.status)
        });
    }
    if record.current_appointments >= record.max_appointments_per_slot {
        return Err(BookingRejection::Full);
    }
    if record.date < today {
        return Err(BookingRejection::InPast);
    }
    Ok(())
}

/// Increments the counter in place. Stores call this inside their atomic section.
pub fn apply_booking(
    record: &mut AvailabilityRecord,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<(), BookingRejection> {
    check_bookable(record, today)?;
    record.current_appointments += 1;
    record.status = next_status(record.status, record.current_appointments, record.max_appointments_per_slot);
    record.updated_at = now;
    Ok(())
}

/// Decrements the counter in place. Stores call this inside their atomic section.
pub fn apply_cancellation(record: &mut AvailabilityRecord, now: DateTime<Utc>) -> Result<(), BookingRejection> {
    if record.current_appointments == 0 {
        return Err(BookingRejection::NoAppointments);
    }
    record.current_appointments -= 1;
    record.status = next_status(record.status, record.current_appointments, record.max_appointments_per_slot);
    record.updated_at = now;
    Ok(())
}

/// Book/cancel protocol over the store's atomic counter primitive.
#[derive(Clone)]
pub struct BookingStateMachine {
    store: Arc<dyn AvailabilityStore>,
    clock: Arc<dyn Clock>,
}

impl BookingStateMachine {
    pub fn new(store: Arc<dyn AvailabilityStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    #[instrument(skip(self))]
    pub async fn book_slot(&self, id: Uuid) -> Result<AvailabilityRecord, AvailabilityError> {
        match self.store.try_increment(id, self.clock.today(), self.clock.now()).await? {
            CounterOutcome::Applied(record) => {
                info!(
                    "Booked slot {} ({}/{})",
                    id, record.current_appointments, record.max_appointments_per_slot
                );
                Ok(record)
            }
            CounterOutcome::Rejected(reason) => {
                warn!("Booking rejected for slot {}: {}", id, reason);
                Err(AvailabilityError::Conflict(reason.to_string()))
            }
            CounterOutcome::Missing => Err(AvailabilityError::not_found(id)),
        }
    }

    #[instrument(skip(self))]
    pub async fn cancel_slot(&self, id: Uuid) -> Result<AvailabilityRecord, AvailabilityError> {
        match self.store.try_decrement(id, self.clock.now()).await? {
            CounterOutcome::Applied(record) => {
                info!(
                    "Released slot {} ({}/{})",
                    id, record.current_appointments, record.max_appointments_per_slot
                );
                Ok(record)
            }
            CounterOutcome::Rejected(reason) => {
                warn!("Cancellation rejected for slot {}: {}", id, reason);
                Err(AvailabilityError::Conflict(reason.to_string()))
            }
            CounterOutcome::Missing => Err(AvailabilityError::not_found(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::sample_record;

    #[test]
    fn next_status_follows_capacity() {
        use AvailabilityStatus::*;
        assert_eq!(next_status(Available, 0, 1), Available);
        assert_eq!(next_status(Available, 1, 1), Booked);
        assert_eq!(next_status(Booked, 2, 3), Available);
        assert_eq!(next_status(Booked, 3, 3), Booked);
    }

    #[test]
    fn next_status_keeps_administrative_states() {
        use AvailabilityStatus::*;
        for status in [Cancelled, Blocked, Maintenance] {
            assert_eq!(next_status(status, 0, 1), status);
            assert_eq!(next_status(status, 5, 1), status);
        }
    }

    #[test]
    fn book_then_cancel_restores_record() {
        let today = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();
        let now = Utc::now();
        let original = sample_record(2);
        let mut record = original.clone();

        apply_booking(&mut record, today, now).unwrap();
        assert_eq!(record.current_appointments, 1);
        assert_eq!(record.status, AvailabilityStatus::Available);

        apply_cancellation(&mut record, now).unwrap();
        assert_eq!(record.current_appointments, original.current_appointments);
        assert_eq!(record.status, AvailabilityStatus::Available);
    }

    #[test]
    fn single_capacity_flips_to_booked_and_back() {
        let today = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();
        let now = Utc::now();
        let mut record = sample_record(1);

        apply_booking(&mut record, today, now).unwrap();
        assert_eq!(record.status, AvailabilityStatus::Booked);
        assert_eq!(apply_booking(&mut record, today, now), Err(BookingRejection::Full));

        apply_cancellation(&mut record, now).unwrap();
        assert_eq!(record.status, AvailabilityStatus::Available);
        assert_eq!(apply_cancellation(&mut record, now), Err(BookingRejection::NoAppointments));
    }

    #[test]
    fn refuses_past_and_administrative_slots() {
        let now = Utc::now();
        let mut record = sample_record(3);

        let after = record.date.succ_opt().unwrap();
        assert_eq!(apply_booking(&mut record, after, now), Err(BookingRejection::InPast));

        record.status = AvailabilityStatus::Maintenance;
        let date = record.date;
        assert_eq!(
            apply_booking(&mut record, date, now),
            Err(BookingRejection::NotBookable(AvailabilityStatus::Maintenance))
        );
        assert_eq!(record.current_appointments, 0);
    }

    #[test]
    fn cancellation_on_blocked_slot_keeps_status() {
        let now = Utc::now();
        let mut record = sample_record(2);
        record.current_appointments = 1;
        record.status = AvailabilityStatus::Blocked;

        apply_cancellation(&mut record, now).unwrap();
        assert_eq!(record.current_appointments, 0);
        assert_eq!(record.status, AvailabilityStatus::Blocked);
    }
}
