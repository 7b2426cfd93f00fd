//! DOS date/time conversion.
//!
//! DOS date/time format:
//! - Time: bits 0-4 = seconds/2, bits 5-10 = minutes, bits 11-15 = hours
//! - Date: bits 16-20 = day, bits 21-24 = month, bits 25-31 = year-1980
//!
//! Times are interpreted as UTC. The format has two second resolution and
//! covers 1980-01-01 to 2107-12-31.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// 1980-01-01 00:00:00
pub const MIN_DOS_TIME: u32 = (1 << 21) | (1 << 16);
/// 2107-12-31 23:59:58
pub const MAX_DOS_TIME: u32 =
    (127 << 25) | (12 << 21) | (31 << 16) | (23 << 11) | (59 << 5) | (58 >> 1);

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Convert a DOS date/time to milliseconds since the Unix epoch.
///
/// Returns None for out-of-range fields.
pub fn dos_to_millis(datetime: u32) -> Option<i64> {
    let year = 1980 + ((datetime >> 25) & 0x7F) as i64;
    let month = ((datetime >> 21) & 0x0F) as i64;
    let day = ((datetime >> 16) & 0x1F) as i64;
    let hour = ((datetime >> 11) & 0x1F) as i64;
    let minute = ((datetime >> 5) & 0x3F) as i64;
    let second = ((datetime & 0x1F) * 2) as i64;

    if !(1..=12).contains(&month) || day < 1 || hour > 23 || minute > 59 || second > 59 {
        return None;
    }

    let days = days_from_civil(year, month, day);
    Some(days * MILLIS_PER_DAY + ((hour * 60 + minute) * 60 + second) * 1000)
}

/// Convert milliseconds since the Unix epoch to a DOS date/time.
///
/// Rounds up to the next even second and clamps to the DOS range.
pub fn millis_to_dos(millis: i64) -> u32 {
    let millis = millis.saturating_add(1999).div_euclid(2000).saturating_mul(2000);
    let min = dos_to_millis(MIN_DOS_TIME).unwrap_or_default();
    let max = dos_to_millis(MAX_DOS_TIME).unwrap_or(i64::MAX);
    if millis <= min {
        return MIN_DOS_TIME;
    }
    if millis >= max {
        return MAX_DOS_TIME;
    }

    let days = millis.div_euclid(MILLIS_PER_DAY);
    let secs = millis.rem_euclid(MILLIS_PER_DAY) / 1000;
    let (year, month, day) = civil_from_days(days);

    ((year - 1980) as u32) << 25
        | (month as u32) << 21
        | (day as u32) << 16
        | ((secs / 3600) as u32) << 11
        | ((secs / 60 % 60) as u32) << 5
        | ((secs % 60) / 2) as u32
}

/// Convert a DOS date/time to a SystemTime.
pub fn dos_to_system_time(datetime: u32) -> Option<SystemTime> {
    let millis = dos_to_millis(datetime)?;
    UNIX_EPOCH.checked_add(Duration::from_millis(u64::try_from(millis).ok()?))
}

/// Current time as milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Days since 1970-01-01 for a proleptic Gregorian date.
fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = year.div_euclid(400);
    let yoe = year - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn civil_from_days(days: i64) -> (i64, i64, i64) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_of_dos() {
        assert_eq!(dos_to_millis(MIN_DOS_TIME), Some(315_532_800_000));
        assert_eq!(millis_to_dos(315_532_800_000), MIN_DOS_TIME);
    }

    #[test]
    fn test_known_date() {
        // 2024-02-29 13:45:30
        let dos = (44 << 25) | (2 << 21) | (29 << 16) | (13 << 11) | (45 << 5) | 15;
        assert_eq!(dos_to_millis(dos), Some(1_709_214_330_000));
        assert_eq!(millis_to_dos(1_709_214_330_000), dos);
    }

    #[test]
    fn test_rounds_up_to_even_second() {
        let base = 1_709_214_330_000;
        assert_eq!(dos_to_millis(millis_to_dos(base + 1)), Some(base + 2000));
        assert_eq!(dos_to_millis(millis_to_dos(base + 1000)), Some(base + 2000));
    }

    #[test]
    fn test_clamps_to_range() {
        assert_eq!(millis_to_dos(0), MIN_DOS_TIME);
        assert_eq!(millis_to_dos(i64::MIN), MIN_DOS_TIME);
        assert_eq!(millis_to_dos(i64::MAX), MAX_DOS_TIME);
        assert!(dos_to_millis(MAX_DOS_TIME).is_some());
    }

    #[test]
    fn test_invalid_fields() {
        assert_eq!(dos_to_millis(0), None);
        assert_eq!(dos_to_millis((13 << 21) | (1 << 16)), None);
    }
}
