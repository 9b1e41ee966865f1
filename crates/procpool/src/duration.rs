//! Human-friendly duration formatting for job trace lines.

use std::time::Duration;

/// Unit suffix style for [`format_duration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurationStyle {
    /// `1 day 2 hr 3 min 4.500 sec`
    #[default]
    Standard,
    /// `1d 2h 3m 4.500s`
    Short,
    /// `1 days 2 hours 3 minutes 4.500 seconds`
    Long,
}

impl DurationStyle {
    fn units(self) -> [&'static str; 4] {
        match self {
            DurationStyle::Standard => [" day", " hr", " min", " sec"],
            DurationStyle::Short => ["d", "h", "m", "s"],
            DurationStyle::Long => [" days", " hours", " minutes", " seconds"],
        }
    }
}

/// Format a duration starting at its largest nonzero unit.
///
/// Seconds always appear, with millisecond precision: `format_duration`
/// of 3700 seconds renders as `1 hr 1 min 40.000 sec`.
pub fn format_duration(duration: Duration, style: DurationStyle) -> String {
    let total = duration.as_secs_f64();
    let days = (total / 86_400.0).floor() as u64;
    let hours = (total % 86_400.0 / 3_600.0).floor() as u64;
    let minutes = (total % 3_600.0 / 60.0).floor() as u64;
    let seconds = total % 60.0;

    let units = style.units();
    let whole = [days, hours, minutes];
    let first = whole.iter().position(|v| *v > 0).unwrap_or(whole.len());

    let mut parts: Vec<String> = whole[first..]
        .iter()
        .zip(&units[first..3])
        .map(|(value, unit)| format!("{value}{unit}"))
        .collect();
    parts.push(format!("{seconds:.3}{}", units[3]));
    parts.join(" ")
}
