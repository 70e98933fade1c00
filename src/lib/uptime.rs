use std::time::Duration;

const YEAR: u64 = 31_557_600;
const MONTH: u64 = 2_629_800;
const WEEK: u64 = 604_800;
const DAY: u64 = 86_400;
const HOUR: u64 = 3_600;
const MINUTE: u64 = 60;

/// Formats `elapsed` as an ISO-8601 duration such as `P1DT2H5S`, dropping
/// zero components. Years and months use average lengths (365.25 and
/// 30.4375 days). Sub-second precision is discarded.
pub fn iso8601_duration(elapsed: Duration) -> String {
    let mut left = elapsed.as_secs();
    if left == 0 {
        return "PT0S".to_string();
    }

    let mut take = |unit: u64| {
        let count = left / unit;
        left -= count * unit;
        count
    };
    let years = take(YEAR);
    let months = take(MONTH);
    let weeks = take(WEEK);
    let days = take(DAY);
    let hours = take(HOUR);
    let minutes = take(MINUTE);
    let seconds = left;

    let mut out = String::from("P");
    for (value, suffix) in [(years, 'Y'), (months, 'M'), (weeks, 'W'), (days, 'D')] {
        if value != 0 {
            out.push_str(&format!("{value}{suffix}"));
        }
    }
    if hours != 0 || minutes != 0 || seconds != 0 {
        out.push('T');
        for (value, suffix) in [(hours, 'H'), (minutes, 'M'), (seconds, 'S')] {
            if value != 0 {
                out.push_str(&format!("{value}{suffix}"));
            }
        }
    }
    out
}

/// Whole milliseconds in `elapsed`, saturating at `u64::MAX`.
pub fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
