pub mod availability;
pub mod booking;
pub mod clock;
pub mod conflict;
pub mod recurrence;
pub mod search;
pub mod time;
pub mod validation;

pub use availability::{AvailabilityService, TimeSlotPreview};
pub use booking::BookingStateMachine;
pub use clock::{Clock, FixedClock, SystemClock};
pub use conflict::ConflictDetector;
pub use recurrence::RecurrenceExpander;
pub use search::QueryEngine;
pub use time::{StaticOffsetTable, TimeConverter};
