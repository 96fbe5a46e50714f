//! Timestamp-window filtering of log lines.
//!
//! Three leading timestamp layouts are recognized:
//!
//! | layout  | example                          | year          |
//! |---------|----------------------------------|---------------|
//! | syslog  | `2020-08-20 18:58:27,123 INFO …` | from the line |
//! | journal | `Jul 24 11:35:19.017949 cvp1 …`  | current       |
//! | runtime | `E0820 18:58:27.964890 …`        | current       |

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime};
use tracing::{debug, trace, Span};

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Lower bound of the log lines a unit is interested in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: NaiveDateTime,
    year: i32,
}

impl TimeWindow {
    /// Window starting at `start` (inclusive). Year-less timestamps are
    /// assumed to be from the current year.
    #[must_use]
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            start,
            year: Local::now().year(),
        }
    }

    /// Assume `year` for journal and runtime timestamps
    #[must_use]
    pub const fn with_year(mut self, year: i32) -> Self {
        self.year = year;
        self
    }

    /// Start of the window
    #[must_use]
    pub const fn start(&self) -> NaiveDateTime {
        self.start
    }

    /// Keep the lines that fall inside the window.
    ///
    /// A line without a recognizable timestamp takes the classification of
    /// the closest timestamped line above it. Lines before the first
    /// timestamp and blank lines are dropped.
    #[must_use]
    pub fn filter(&self, lines: Vec<String>, span: &Span) -> Vec<String> {
        let total = lines.len();
        let mut inside: Option<bool> = None;
        let mut output = Vec::new();

        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            match parse_timestamp(&line, self.year) {
                Some(stamp) => {
                    let keep = stamp >= self.start;
                    inside = Some(keep);
                    if keep {
                        output.push(line);
                    } else {
                        trace!(parent: span, line = %line, "skipping line outside time window");
                    }
                }
                None if inside == Some(true) => output.push(line),
                None => trace!(parent: span, line = %line, "no timestamp to inherit"),
            }
        }

        debug!(
            parent: span,
            from = %self.start,
            kept = output.len(),
            removed = total - output.len(),
            "filtered lines by date"
        );
        output
    }
}

/// Parse the leading timestamp of a log line
pub(crate) fn parse_timestamp(line: &str, year: i32) -> Option<NaiveDateTime> {
    let mut fields = line.split_whitespace();
    let first = fields.next()?;
    let second = fields.next()?;

    if let Some(stamp) = syslog(first, second) {
        return Some(stamp);
    }
    if let Some(stamp) = fields.next().and_then(|third| journal(first, second, third, year)) {
        return Some(stamp);
    }
    runtime(first, second, year)
}

/// `YYYY-MM-DD HH:MM:SS[,.]…`
fn syslog(date: &str, time: &str) -> Option<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(date.get(..10)?, "%Y-%m-%d").ok()?;
    Some(date.and_time(clock(time)?))
}

/// `Mon D[D] HH:MM:SS[.…]`
fn journal(month: &str, day: &str, time: &str, year: i32) -> Option<NaiveDateTime> {
    let month = month_number(month)?;
    if day.is_empty() || day.len() > 2 {
        return None;
    }
    let day = day.parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(date.and_time(clock(time)?))
}

/// `Lmmdd HH:MM:SS[.…]`, as written by Go's klog/glog
fn runtime(head: &str, time: &str, year: i32) -> Option<NaiveDateTime> {
    let bytes = head.as_bytes();
    if bytes.len() < 5 || !bytes[0].is_ascii_uppercase() || !bytes[1..5].iter().all(u8::is_ascii_digit) {
        return None;
    }
    let month = head[1..3].parse().ok()?;
    let day = head[3..5].parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(date.and_time(clock(time)?))
}

fn clock(field: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(field.get(..8)?, "%H:%M:%S").ok()
}

fn month_number(name: &str) -> Option<u32> {
    let name = name.to_ascii_lowercase();
    // "ago" is the Spanish/Italian abbreviation some hosts log for August
    let name = if name == "ago" { "aug" } else { name.as_str() };
    MONTHS
        .iter()
        .position(|m| *m == name)
        .and_then(|i| u32::try_from(i + 1).ok())
}
