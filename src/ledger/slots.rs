use chrono::{DateTime, Local, NaiveDate, Timelike, Utc};

/// Calendar day in the process-local timezone. Daily usage and check-ins key off this.
pub fn local_date(at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&Local).date_naive()
}

/// One `slot_hours`-wide window of a local calendar day (0-4h, 4-8h, ... for 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RefillSlot {
    pub date: NaiveDate,
    pub index: u32,
}

pub fn slot_of(at: DateTime<Utc>, slot_hours: u32) -> RefillSlot {
    let local = at.with_timezone(&Local);
    RefillSlot {
        date: local.date_naive(),
        index: local.hour() / slot_hours.max(1),
    }
}

/// True when the local hour opens a slot (0, 4, 8, 12, 16, 20 for 4-hour slots).
pub fn is_slot_hour(at: DateTime<Utc>, slot_hours: u32) -> bool {
    at.with_timezone(&Local).hour() % slot_hours.max(1) == 0
}

/// Whether `last` already falls inside the slot containing `now`.
pub fn same_slot(last: Option<DateTime<Utc>>, now: DateTime<Utc>, slot_hours: u32) -> bool {
    last.is_some_and(|last| slot_of(last, slot_hours) == slot_of(now, slot_hours))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn local(h: u32, m: u32) -> DateTime<Utc> {
        Local
            .with_ymd_and_hms(2026, 10, 16, h, m, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_slot_boundaries() {
        for h in [0, 4, 8, 12, 16, 20] {
            assert!(is_slot_hour(local(h, 30), 4), "hour {h}");
        }
        for h in [1, 3, 5, 9, 13, 23] {
            assert!(!is_slot_hour(local(h, 0), 4), "hour {h}");
        }
    }

    #[test]
    fn test_slot_index() {
        assert_eq!(slot_of(local(0, 0), 4).index, 0);
        assert_eq!(slot_of(local(3, 59), 4).index, 0);
        assert_eq!(slot_of(local(4, 0), 4).index, 1);
        assert_eq!(slot_of(local(23, 59), 4).index, 5);
    }

    #[test]
    fn test_same_slot_dedup() {
        assert!(!same_slot(None, local(8, 0), 4));
        assert!(same_slot(Some(local(8, 5)), local(11, 59), 4));
        assert!(!same_slot(Some(local(7, 59)), local(8, 0), 4));
        // Same slot index on a different day is a different slot.
        assert!(!same_slot(Some(local(8, 5) - Duration::days(1)), local(8, 5), 4));
    }

    #[test]
    fn test_local_date() {
        assert_eq!(
            local_date(local(12, 0)),
            NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
        );
    }
}
