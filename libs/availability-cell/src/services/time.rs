use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::error::ConversionError;

pub const SUPPORTED_TIMEZONES: &[&str] = &[
    "UTC",
    "America/New_York",
    "America/Chicago",
    "America/Denver",
    "America/Phoenix",
    "America/Los_Angeles",
    "America/Anchorage",
    "Pacific/Honolulu",
    "America/Toronto",
    "America/Vancouver",
    "America/Mexico_City",
    "America/Sao_Paulo",
    "Europe/London",
    "Europe/Paris",
    "Europe/Berlin",
    "Europe/Madrid",
    "Europe/Rome",
    "Europe/Amsterdam",
    "Europe/Moscow",
    "Africa/Cairo",
    "Africa/Lagos",
    "Africa/Nairobi",
    "Africa/Johannesburg",
    "Asia/Dubai",
    "Asia/Kolkata",
    "Asia/Singapore",
    "Asia/Shanghai",
    "Asia/Tokyo",
    "Asia/Seoul",
    "Australia/Sydney",
    "Pacific/Auckland",
];

static TIME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([01]\d|2[0-3]):[0-5]\d$").expect("static time regex"));

static DATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("static date regex"));

pub fn is_valid_timezone(tz: &str) -> bool {
    SUPPORTED_TIMEZONES.contains(&tz)
}

/// Parses strict 24-hour `HH:mm`.
pub fn parse_time(value: &str) -> Result<NaiveTime, ConversionError> {
    if !TIME_PATTERN.is_match(value) {
        return Err(ConversionError::InvalidTime(value.to_string()));
    }
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| ConversionError::InvalidTime(value.to_string()))
}

/// Parses strict `YYYY-MM-DD`.
pub fn parse_date(value: &str) -> Result<NaiveDate, ConversionError> {
    if !DATE_PATTERN.is_match(value) {
        return Err(ConversionError::InvalidDate(value.to_string()));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| ConversionError::InvalidDate(value.to_string()))
}

pub fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

pub fn hhmm_to_minutes(value: &str) -> Result<u32, ConversionError> {
    let time = parse_time(value)?;
    Ok(time_to_minutes(time))
}

pub fn time_to_minutes(time: NaiveTime) -> u32 {
    use chrono::Timelike;
    time.hour() * 60 + time.minute()
}

/// `0..=1439` only; `1440` would be midnight of the next day.
pub fn minutes_to_hhmm(minutes: u32) -> Result<String, ConversionError> {
    if minutes >= 24 * 60 {
        return Err(ConversionError::MinutesOutOfRange(minutes));
    }
    Ok(format!("{:02}:{:02}", minutes / 60, minutes % 60))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeSlot {
    pub start: String,
    pub end: String,
}

/// Walks from `start` in steps of `slot + break`, emitting a slot while it
/// still ends at or before `end`.
pub fn generate_time_slots(
    start: &str,
    end: &str,
    slot_duration: u32,
    break_duration: u32,
) -> Result<Vec<TimeSlot>, ConversionError> {
    if slot_duration == 0 {
        return Err(ConversionError::ZeroSlotDuration);
    }

    // Widened so oversized durations end the walk instead of wrapping.
    let end_minutes = u64::from(hhmm_to_minutes(end)?);
    let slot = u64::from(slot_duration);
    let step = slot + u64::from(break_duration);

    let mut slots = Vec::new();
    let mut current = u64::from(hhmm_to_minutes(start)?);

    while current + slot <= end_minutes {
        slots.push(TimeSlot {
            start: minutes_to_hhmm(current as u32)?,
            end: minutes_to_hhmm((current + slot) as u32)?,
        });
        current += step;
    }

    Ok(slots)
}

/// Static UTC offsets in minutes, consulted when the timezone database
/// cannot resolve a zone.
pub trait OffsetTable: Send + Sync {
    fn offset_minutes(&self, timezone: &str) -> Option<i32>;
}

/// Standard-time offsets for every supported zone. Ignores DST.
#[derive(Debug, Clone)]
pub struct StaticOffsetTable {
    offsets: HashMap<String, i32>,
}

impl StaticOffsetTable {
    pub fn empty() -> Self {
        Self { offsets: HashMap::new() }
    }

    pub fn with_offset(mut self, timezone: &str, minutes: i32) -> Self {
        self.offsets.insert(timezone.to_string(), minutes);
        self
    }
}

impl Default for StaticOffsetTable {
    fn default() -> Self {
        let builtin: [(&str, i32); 31] = [
            ("UTC", 0),
            ("America/New_York", -300),
            ("America/Chicago", -360),
            ("America/Denver", -420),
            ("America/Phoenix", -420),
            ("America/Los_Angeles", -480),
            ("America/Anchorage", -540),
            ("Pacific/Honolulu", -600),
            ("America/Toronto", -300),
            ("America/Vancouver", -480),
            ("America/Mexico_City", -360),
            ("America/Sao_Paulo", -180),
            ("Europe/London", 0),
            ("Europe/Paris", 60),
            ("Europe/Berlin", 60),
            ("Europe/Madrid", 60),
            ("Europe/Rome", 60),
            ("Europe/Amsterdam", 60),
            ("Europe/Moscow", 180),
            ("Africa/Cairo", 120),
            ("Africa/Lagos", 60),
            ("Africa/Nairobi", 180),
            ("Africa/Johannesburg", 120),
            ("Asia/Dubai", 240),
            ("Asia/Kolkata", 330),
            ("Asia/Singapore", 480),
            ("Asia/Shanghai", 480),
            ("Asia/Tokyo", 540),
            ("Asia/Seoul", 540),
            ("Australia/Sydney", 600),
            ("Pacific/Auckland", 720),
        ];

        Self {
            offsets: builtin
                .iter()
                .map(|(tz, minutes)| (tz.to_string(), *minutes))
                .collect(),
        }
    }
}

impl OffsetTable for StaticOffsetTable {
    fn offset_minutes(&self, timezone: &str) -> Option<i32> {
        self.offsets.get(timezone).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalDateTime {
    pub date: String,
    pub time: String,
}

/// Local wall-clock ↔ UTC conversion. Uses the IANA database when it knows
/// the zone, the injected offset table otherwise, and zero as a last resort.
#[derive(Clone)]
pub struct TimeConverter {
    offsets: Arc<dyn OffsetTable>,
    dynamic: bool,
}

impl Default for TimeConverter {
    fn default() -> Self {
        Self::new(Arc::new(StaticOffsetTable::default()))
    }
}

impl TimeConverter {
    pub fn new(offsets: Arc<dyn OffsetTable>) -> Self {
        Self { offsets, dynamic: true }
    }

    /// Offset-table only; for hosts without a timezone database.
    pub fn static_only(offsets: Arc<dyn OffsetTable>) -> Self {
        Self { offsets, dynamic: false }
    }

    pub fn local_to_utc(
        &self,
        local_time: &str,
        local_date: &str,
        timezone: &str,
    ) -> Result<DateTime<Utc>, ConversionError> {
        let time = parse_time(local_time)?;
        let date = parse_date(local_date)?;
        Ok(self.to_utc(date, time, timezone))
    }

    pub fn to_utc(&self, date: NaiveDate, time: NaiveTime, timezone: &str) -> DateTime<Utc> {
        let naive = date.and_time(time);

        if let Some(zone) = self.zone(timezone) {
            match zone.from_local_datetime(&naive) {
                LocalResult::Single(dt) => return dt.with_timezone(&Utc),
                LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
                LocalResult::None => {
                    // Spring-forward gap: use the offset in force just before it.
                    let before = naive - Duration::hours(3);
                    if let Some(dt) = zone.from_local_datetime(&before).earliest() {
                        let offset = dt.offset().fix().local_minus_utc();
                        return shift(naive, -(offset as i64));
                    }
                }
            }
        }

        shift(naive, -self.static_offset_seconds(timezone))
    }

    pub fn utc_to_local(&self, instant: DateTime<Utc>, timezone: &str) -> LocalDateTime {
        let local = match self.zone(timezone) {
            Some(zone) => zone.from_utc_datetime(&instant.naive_utc()).naive_local(),
            None => shift(instant.naive_utc(), self.static_offset_seconds(timezone)).naive_utc(),
        };

        LocalDateTime {
            date: local.format("%Y-%m-%d").to_string(),
            time: local.format("%H:%M").to_string(),
        }
    }

    fn zone(&self, timezone: &str) -> Option<Tz> {
        if !self.dynamic {
            return None;
        }
        timezone.parse::<Tz>().ok()
    }

    fn static_offset_seconds(&self, timezone: &str) -> i64 {
        match self.offsets.offset_minutes(timezone) {
            Some(minutes) => minutes as i64 * 60,
            None => {
                warn!("No offset known for timezone '{}', treating as UTC", timezone);
                0
            }
        }
    }
}

fn shift(naive: NaiveDateTime, seconds: i64) -> DateTime<Utc> {
    (naive + Duration::seconds(seconds)).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_only_strict_hhmm() {
        assert!(parse_time("09:00").is_ok());
        assert!(parse_time("23:59").is_ok());
        assert!(parse_time("9:00").is_err());
        assert!(parse_time("24:00").is_err());
        assert!(parse_time("09:00:00").is_err());
        assert!(parse_time("09:60").is_err());
    }

    #[test]
    fn rejects_impossible_dates() {
        assert!(parse_date("2024-02-29").is_ok());
        assert!(parse_date("2023-02-29").is_err());
        assert!(parse_date("2024-2-1").is_err());
    }

    #[test]
    fn minutes_conversion_bounds() {
        assert_eq!(hhmm_to_minutes("13:45").unwrap(), 825);
        assert_eq!(minutes_to_hhmm(825).unwrap(), "13:45");
        assert_eq!(minutes_to_hhmm(1440), Err(ConversionError::MinutesOutOfRange(1440)));
    }

    #[test]
    fn slot_count_matches_step_arithmetic() {
        let cases = [(30, 0, 16), (30, 10, 12), (45, 15, 8), (60, 0, 8), (50, 5, 8)];
        for (slot, gap, expected) in cases {
            let slots = generate_time_slots("09:00", "17:00", slot, gap).unwrap();
            assert_eq!(slots.len(), expected, "slot={} break={}", slot, gap);
            assert_eq!((480 + gap) / (slot + gap), expected as u32);
        }
    }

    #[test]
    fn slots_are_exact_and_separated_by_break() {
        let slots = generate_time_slots("09:00", "11:00", 25, 5).unwrap();
        for pair in slots.windows(2) {
            let prev_end = hhmm_to_minutes(&pair[0].end).unwrap();
            let next_start = hhmm_to_minutes(&pair[1].start).unwrap();
            assert_eq!(next_start - prev_end, 5);
        }
        for slot in &slots {
            let length = hhmm_to_minutes(&slot.end).unwrap() - hhmm_to_minutes(&slot.start).unwrap();
            assert_eq!(length, 25);
        }
    }

    #[test]
    fn slot_generation_edge_inputs() {
        assert!(generate_time_slots("10:00", "09:00", 30, 0).unwrap().is_empty());
        assert_eq!(generate_time_slots("09:00", "10:00", 0, 0), Err(ConversionError::ZeroSlotDuration));
        assert!(generate_time_slots("9am", "10:00", 30, 0).is_err());
    }

    #[test]
    fn oversized_durations_stop_the_walk() {
        assert!(generate_time_slots("09:00", "17:00", u32::MAX, 0).unwrap().is_empty());
        assert!(generate_time_slots("09:00", "17:00", u32::MAX, u32::MAX).unwrap().is_empty());

        let single = generate_time_slots("09:00", "17:00", 30, u32::MAX).unwrap();
        assert_eq!(single, vec![TimeSlot { start: "09:00".to_string(), end: "09:30".to_string() }]);
    }

    #[test]
    fn converts_new_york_winter_and_summer() {
        let converter = TimeConverter::default();

        let winter = converter.local_to_utc("09:00", "2024-12-15", "America/New_York").unwrap();
        assert_eq!(winter.to_rfc3339(), "2024-12-15T14:00:00+00:00");

        let summer = converter.local_to_utc("09:00", "2024-07-15", "America/New_York").unwrap();
        assert_eq!(summer.to_rfc3339(), "2024-07-15T13:00:00+00:00");
    }

    #[test]
    fn round_trips_every_supported_zone() {
        let converter = TimeConverter::default();
        for tz in SUPPORTED_TIMEZONES {
            for (date, time) in [("2024-12-15", "09:00"), ("2024-07-01", "17:30"), ("2025-01-01", "00:00")] {
                let utc = converter.local_to_utc(time, date, tz).unwrap();
                let local = converter.utc_to_local(utc, tz);
                assert_eq!((local.date.as_str(), local.time.as_str()), (date, time), "zone {}", tz);
            }
        }
    }

    #[test]
    fn gap_time_uses_pre_transition_offset() {
        let converter = TimeConverter::default();
        // 02:30 does not exist in New York on 2024-03-10.
        let utc = converter.local_to_utc("02:30", "2024-03-10", "America/New_York").unwrap();
        assert_eq!(utc.to_rfc3339(), "2024-03-10T07:30:00+00:00");
    }

    #[test]
    fn falls_back_to_static_table_then_zero() {
        let table = StaticOffsetTable::empty().with_offset("Clinic/Internal", 120);
        let converter = TimeConverter::static_only(Arc::new(table));

        let known = converter.local_to_utc("10:00", "2024-12-15", "Clinic/Internal").unwrap();
        assert_eq!(known.to_rfc3339(), "2024-12-15T08:00:00+00:00");

        let unknown = converter.local_to_utc("10:00", "2024-12-15", "Mars/Olympus").unwrap();
        assert_eq!(unknown.to_rfc3339(), "2024-12-15T10:00:00+00:00");

        let back = converter.utc_to_local(known, "Clinic/Internal");
        assert_eq!(back.time, "10:00");
    }

    #[test]
    fn static_table_ignores_daylight_saving() {
        let converter = TimeConverter::static_only(Arc::new(StaticOffsetTable::default()));
        let summer = converter.local_to_utc("09:00", "2024-07-15", "America/New_York").unwrap();
        assert_eq!(summer.to_rfc3339(), "2024-07-15T14:00:00+00:00");
    }

    #[test]
    fn every_supported_zone_has_static_offset() {
        let table = StaticOffsetTable::default();
        for tz in SUPPORTED_TIMEZONES {
            assert!(table.offset_minutes(tz).is_some(), "missing {}", tz);
            assert!(is_valid_timezone(tz));
        }
        assert!(!is_valid_timezone("Mars/Olympus"));
    }
}
