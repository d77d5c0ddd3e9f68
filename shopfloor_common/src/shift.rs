//! Shift calendar: current-shift lookup, break detection and shift-change
//! edge detection.
//!
//! The calendar is a pure function of wall-clock time and a static schedule
//! derived from the configured shift model; only the shift-change detector
//! carries memory of the last observed shift. Night shifts span midnight by
//! extending the day boundary on the matching side.

use crate::config::{ConfigError, ShiftModel};
use crate::types::{PlannedBreak, Shift, ShiftStatus};
use chrono::{DateTime, LocalResult, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// A break within a shift schedule, in local wall-clock terms.
#[derive(Debug, Clone, Copy)]
struct BreakDefinition {
    start_hour: u32,
    start_minute: u32,
    end_hour: u32,
    end_minute: u32,
    break_type: &'static str,
}

/// One shift of the static schedule, in local hours.
#[derive(Debug, Clone)]
struct ShiftSchedule {
    name: &'static str,
    /// Start hour 0-23.
    start: u32,
    /// End hour 0-23; smaller than `start` for shifts crossing midnight.
    end: u32,
    breaks: Vec<BreakDefinition>,
}

const fn brk(
    start_hour: u32,
    start_minute: u32,
    end_hour: u32,
    end_minute: u32,
    break_type: &'static str,
) -> BreakDefinition {
    BreakDefinition {
        start_hour,
        start_minute,
        end_hour,
        end_minute,
        break_type,
    }
}

/// Shift calendar over a configured timezone and shift model.
pub struct ShiftCalendar {
    tz: Tz,
    schedules: Vec<ShiftSchedule>,
    work_center_id: String,
    current: Option<Shift>,
}

impl ShiftCalendar {
    /// Create a calendar for the given IANA timezone name and shift model.
    pub fn new(timezone: &str, model: ShiftModel) -> Result<Self, ConfigError> {
        let tz: Tz = timezone.parse().map_err(|_| ConfigError::InvalidValue {
            key: "TIMEZONE",
            value: timezone.to_string(),
            reason: "unknown IANA timezone".to_string(),
        })?;
        Ok(Self {
            tz,
            schedules: schedules_for(model),
            work_center_id: "WC-WELD-01".to_string(),
            current: None,
        })
    }

    /// The shift whose `[start, end)` window covers `now`.
    pub fn current_shift(&self, now: DateTime<Utc>) -> Shift {
        let local = now.with_timezone(&self.tz);
        let hour = local.hour();

        for (i, sched) in self.schedules.iter().enumerate() {
            let in_shift = if sched.end > sched.start {
                hour >= sched.start && hour < sched.end
            } else {
                // Night shift crossing midnight.
                hour >= sched.start || hour < sched.end
            };
            if in_shift {
                return self.build_shift(local.date_naive(), hour, sched, (i + 1) as u8);
            }
        }

        // A 24/7 model always matches; partial models fall back to the first
        // shift of the day outside working hours.
        let sched = &self.schedules[0];
        self.build_shift(local.date_naive(), hour, sched, 1)
    }

    fn build_shift(&self, date: NaiveDate, hour: u32, sched: &ShiftSchedule, number: u8) -> Shift {
        let mut start = self.local_datetime(date, sched.start, 0);
        let mut end = self.local_datetime(date, sched.end, 0);

        if sched.end < sched.start {
            if hour < sched.end {
                // Morning side of the night shift: it started yesterday.
                start = self.local_datetime(date.pred_opt().unwrap_or(date), sched.start, 0);
            } else {
                // Evening side: it ends tomorrow.
                end = self.local_datetime(date.succ_opt().unwrap_or(date), sched.end, 0);
            }
        }

        let mut breaks = Vec::with_capacity(sched.breaks.len());
        for b in &sched.breaks {
            // Night-shift breaks scheduled after midnight land on the next
            // calendar day when seen from the evening side.
            let break_date = if sched.end < sched.start && b.start_hour < sched.end && hour >= sched.start
            {
                date.succ_opt().unwrap_or(date)
            } else {
                date
            };
            breaks.push(PlannedBreak {
                start: self
                    .local_datetime(break_date, b.start_hour, b.start_minute)
                    .with_timezone(&Utc),
                end: self
                    .local_datetime(break_date, b.end_hour, b.end_minute)
                    .with_timezone(&Utc),
                break_type: b.break_type.to_string(),
            });
        }

        let shift_id = format!(
            "SHIFT-{}-{}",
            start.date_naive().format("%Y-%m-%d"),
            &sched.name[..1]
        );

        Shift {
            shift_id,
            shift_name: sched.name.to_string(),
            shift_number: number,
            start_time: start.with_timezone(&Utc),
            end_time: end.with_timezone(&Utc),
            work_center_id: self.work_center_id.clone(),
            planned_breaks: breaks,
            status: ShiftStatus::Active,
        }
    }

    fn local_datetime(&self, date: NaiveDate, hour: u32, minute: u32) -> DateTime<Tz> {
        let time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);
        let naive = date.and_time(time);
        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => t,
            // DST gap: the wall-clock instant does not exist locally.
            LocalResult::None => self.tz.from_utc_datetime(&naive),
        }
    }

    /// True iff `now` falls inside any planned break of `shift`.
    pub fn is_break_time(&self, now: DateTime<Utc>, shift: Option<&Shift>) -> bool {
        let Some(shift) = shift else {
            return false;
        };
        shift
            .planned_breaks
            .iter()
            .any(|b| now > b.start && now < b.end)
    }

    /// Edge detector: returns the new shift when it differs from the last
    /// observed one (including the very first observation).
    pub fn has_shift_changed(&mut self, now: DateTime<Utc>) -> Option<Shift> {
        let new_shift = self.current_shift(now);
        match &mut self.current {
            None => {
                self.current = Some(new_shift.clone());
                Some(new_shift)
            }
            Some(current) if current.shift_id != new_shift.shift_id => {
                current.status = ShiftStatus::Ended;
                self.current = Some(new_shift.clone());
                Some(new_shift)
            }
            Some(_) => None,
        }
    }

    /// The last shift observed by [`Self::has_shift_changed`].
    pub fn current_shift_ref(&self) -> Option<&Shift> {
        self.current.as_ref()
    }
}

fn schedules_for(model: ShiftModel) -> Vec<ShiftSchedule> {
    match model {
        ShiftModel::ThreeShift => vec![
            ShiftSchedule {
                name: "Morning",
                start: 6,
                end: 14,
                breaks: vec![brk(9, 0, 9, 1, "break"), brk(12, 0, 12, 1, "lunch")],
            },
            ShiftSchedule {
                name: "Afternoon",
                start: 14,
                end: 22,
                breaks: vec![brk(17, 0, 17, 1, "break"), brk(19, 0, 19, 1, "lunch")],
            },
            ShiftSchedule {
                name: "Night",
                start: 22,
                end: 6,
                breaks: vec![brk(1, 0, 1, 1, "break"), brk(3, 0, 3, 1, "lunch")],
            },
        ],
        ShiftModel::TwoShift => vec![
            ShiftSchedule {
                name: "Day",
                start: 6,
                end: 14,
                breaks: vec![brk(9, 0, 9, 1, "break"), brk(12, 0, 12, 1, "lunch")],
            },
            ShiftSchedule {
                name: "Late",
                start: 14,
                end: 22,
                breaks: vec![brk(17, 0, 17, 1, "break"), brk(19, 0, 19, 1, "lunch")],
            },
        ],
        ShiftModel::OneShift => vec![ShiftSchedule {
            name: "Day",
            start: 8,
            end: 17,
            breaks: vec![
                brk(10, 0, 10, 1, "break"),
                brk(12, 30, 12, 31, "lunch"),
                brk(15, 0, 15, 1, "break"),
            ],
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_calendar(model: ShiftModel) -> ShiftCalendar {
        ShiftCalendar::new("UTC", model).unwrap()
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 3, h, m, s).unwrap()
    }

    #[test]
    fn test_three_shift_boundaries() {
        let cal = make_calendar(ShiftModel::ThreeShift);
        assert_eq!(cal.current_shift(at(6, 0, 0)).shift_name, "Morning");
        assert_eq!(cal.current_shift(at(13, 59, 59)).shift_name, "Morning");
        assert_eq!(cal.current_shift(at(14, 0, 0)).shift_name, "Afternoon");
        assert_eq!(cal.current_shift(at(21, 59, 59)).shift_name, "Afternoon");
        assert_eq!(cal.current_shift(at(22, 0, 0)).shift_name, "Night");
        assert_eq!(cal.current_shift(at(2, 0, 0)).shift_name, "Night");
    }

    #[test]
    fn test_night_shift_spans_midnight() {
        let cal = make_calendar(ShiftModel::ThreeShift);

        // Evening side: started today at 22, ends tomorrow at 6.
        let evening = cal.current_shift(at(23, 30, 0));
        assert_eq!(evening.start_time, at(22, 0, 0));
        assert_eq!(
            evening.end_time,
            Utc.with_ymd_and_hms(2026, 8, 4, 6, 0, 0).unwrap()
        );

        // Morning side: started yesterday at 22.
        let morning = cal.current_shift(at(2, 0, 0));
        assert_eq!(
            morning.start_time,
            Utc.with_ymd_and_hms(2026, 8, 2, 22, 0, 0).unwrap()
        );
        assert_eq!(morning.end_time, at(6, 0, 0));
        // Identity keyed by the start date.
        assert_eq!(morning.shift_id, "SHIFT-2026-08-02-N");
    }

    #[test]
    fn test_break_detection_is_strict_window() {
        let cal = make_calendar(ShiftModel::ThreeShift);
        let shift = cal.current_shift(at(9, 0, 30));
        assert!(cal.is_break_time(at(9, 0, 30), Some(&shift)));
        // Boundaries are exclusive.
        assert!(!cal.is_break_time(at(9, 0, 0), Some(&shift)));
        assert!(!cal.is_break_time(at(9, 1, 0), Some(&shift)));
        assert!(!cal.is_break_time(at(10, 0, 30), Some(&shift)));
        assert!(!cal.is_break_time(at(9, 0, 30), None));
    }

    #[test]
    fn test_lunch_break_detected() {
        let cal = make_calendar(ShiftModel::OneShift);
        let shift = cal.current_shift(at(12, 30, 30));
        assert!(cal.is_break_time(at(12, 30, 30), Some(&shift)));
        assert_eq!(shift.planned_breaks.len(), 3);
    }

    #[test]
    fn test_shift_change_edge_detection() {
        let mut cal = make_calendar(ShiftModel::ThreeShift);

        // First observation always reports a change.
        let first = cal.has_shift_changed(at(13, 59, 0)).unwrap();
        assert_eq!(first.shift_name, "Morning");

        // Same shift: no edge.
        assert!(cal.has_shift_changed(at(13, 59, 30)).is_none());

        // Crossing 14:00 yields exactly one edge.
        let changed = cal.has_shift_changed(at(14, 0, 0)).unwrap();
        assert_eq!(changed.shift_name, "Afternoon");
        assert!(cal.has_shift_changed(at(14, 0, 1)).is_none());
        assert_eq!(
            cal.current_shift_ref().unwrap().shift_name,
            "Afternoon"
        );
    }

    #[test]
    fn test_timezone_shift_lookup() {
        // 12:00 UTC is 14:00 in Berlin during CEST - already Afternoon there.
        let cal = ShiftCalendar::new("Europe/Berlin", ShiftModel::ThreeShift).unwrap();
        let shift = cal.current_shift(at(12, 0, 0));
        assert_eq!(shift.shift_name, "Afternoon");
    }

    #[test]
    fn test_unknown_timezone_is_config_error() {
        assert!(ShiftCalendar::new("Mars/Olympus", ShiftModel::OneShift).is_err());
    }
}
