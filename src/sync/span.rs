//! The shared `[start, end]` window of a refresh cycle.

use chrono::{
    DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike,
    Utc,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::chart::{ChartConfig, SpanUnit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Compute the chart window at `now`.
///
/// Calendar units are resolved in the time zone of `now`.
pub fn compute_window<Tz: TimeZone>(chart: &ChartConfig, now: &DateTime<Tz>) -> Window {
    let span = chart.graph_span_ms;
    let now_utc = now.with_timezone(&Utc);

    let (start, end) = if let Some(unit) = chart.span_start {
        let start = start_of(now, unit).unwrap_or(now_utc);
        (start, shift(start, span))
    } else if let Some(unit) = chart.span_end {
        let end = start_of_next(now, unit).unwrap_or(now_utc);
        (shift(end, 1i64.saturating_sub(span)), end)
    } else {
        (shift(now_utc, 1i64.saturating_sub(span)), now_utc)
    };

    Window {
        start: shift(start, chart.span_offset_ms),
        end: shift(end, chart.span_offset_ms),
    }
}

/// Move `t` by `ms`, clamping at the representable range.
fn shift(t: DateTime<Utc>, ms: i64) -> DateTime<Utc> {
    let clamp = if ms < 0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    };
    Duration::try_milliseconds(ms)
        .and_then(|delta| t.checked_add_signed(delta))
        .unwrap_or(clamp)
}

fn floor_local(local: NaiveDateTime, unit: SpanUnit) -> Option<NaiveDateTime> {
    let date = local.date();
    let midnight = |d: NaiveDate| d.and_time(NaiveTime::MIN);
    match unit {
        SpanUnit::Minute => date.and_hms_opt(local.hour(), local.minute(), 0),
        SpanUnit::Hour => date.and_hms_opt(local.hour(), 0, 0),
        SpanUnit::Day => Some(midnight(date)),
        SpanUnit::Week => {
            let back = i64::from(date.weekday().num_days_from_sunday());
            Some(midnight(date - Duration::days(back)))
        }
        SpanUnit::IsoWeek => {
            let back = i64::from(date.weekday().num_days_from_monday());
            Some(midnight(date - Duration::days(back)))
        }
        SpanUnit::Month => date.with_day(1).map(midnight),
        SpanUnit::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1).map(midnight),
    }
}

fn advance(start: NaiveDateTime, unit: SpanUnit) -> Option<NaiveDateTime> {
    match unit {
        SpanUnit::Minute => Some(start + Duration::minutes(1)),
        SpanUnit::Hour => Some(start + Duration::hours(1)),
        SpanUnit::Day => Some(start + Duration::days(1)),
        SpanUnit::Week | SpanUnit::IsoWeek => Some(start + Duration::weeks(1)),
        SpanUnit::Month => start.checked_add_months(Months::new(1)),
        SpanUnit::Year => start.checked_add_months(Months::new(12)),
    }
}

fn localize<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&local)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

fn start_of<Tz: TimeZone>(now: &DateTime<Tz>, unit: SpanUnit) -> Option<DateTime<Utc>> {
    let local = floor_local(now.naive_local(), unit)?;
    localize(&now.timezone(), local)
}

fn start_of_next<Tz: TimeZone>(now: &DateTime<Tz>, unit: SpanUnit) -> Option<DateTime<Utc>> {
    let local = advance(floor_local(now.naive_local(), unit)?, unit)?;
    localize(&now.timezone(), local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use serde_json::{Value, json};

    fn chart(span: Value) -> ChartConfig {
        ChartConfig::from_json(json!({
            "graph_span": "1d",
            "span": span,
            "series": [{ "entity": "sensor.a" }]
        }))
        .unwrap()
    }

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    // a Wednesday
    fn now() -> DateTime<Utc> {
        utc("2024-05-15T10:23:45Z")
    }

    #[test]
    fn default_window_ends_now() {
        let w = compute_window(&chart(json!({})), &now());
        assert_eq!(w.end, now());
        assert_eq!(w.start, utc("2024-05-14T10:23:45.001Z"));
    }

    #[test]
    fn oversized_spans_clamp_to_the_calendar() {
        let mut wide = chart(json!({ "start": "day" }));
        wide.graph_span_ms = i64::MAX;
        wide.span_offset_ms = i64::MIN;
        let w = compute_window(&wide, &now());
        assert!(w.start <= w.end);

        let mut back = chart(json!({}));
        back.graph_span_ms = i64::MAX;
        let w = compute_window(&back, &now());
        assert_eq!(w.start, DateTime::<Utc>::MIN_UTC);
        assert_eq!(w.end, now());
    }

    #[test]
    fn start_aligned_windows() {
        let day = compute_window(&chart(json!({ "start": "day" })), &now());
        assert_eq!(day.start, utc("2024-05-15T00:00:00Z"));
        assert_eq!(day.end, utc("2024-05-16T00:00:00Z"));

        let week = compute_window(&chart(json!({ "start": "week" })), &now());
        assert_eq!(week.start, utc("2024-05-12T00:00:00Z"));

        let iso = compute_window(&chart(json!({ "start": "isoWeek" })), &now());
        assert_eq!(iso.start, utc("2024-05-13T00:00:00Z"));

        let month = compute_window(&chart(json!({ "start": "month" })), &now());
        assert_eq!(month.start, utc("2024-05-01T00:00:00Z"));

        let hour = compute_window(&chart(json!({ "start": "hour" })), &now());
        assert_eq!(hour.start, utc("2024-05-15T10:00:00Z"));
    }

    #[test]
    fn end_aligned_window() {
        let w = compute_window(&chart(json!({ "end": "day" })), &now());
        assert_eq!(w.end, utc("2024-05-16T00:00:00Z"));
        assert_eq!(w.start, utc("2024-05-15T00:00:00.001Z"));

        let year = compute_window(&chart(json!({ "end": "year" })), &now());
        assert_eq!(year.end, utc("2025-01-01T00:00:00Z"));
    }

    #[test]
    fn offset_shifts_both_ends() {
        let w = compute_window(&chart(json!({ "start": "day", "offset": "-1d" })), &now());
        assert_eq!(w.start, utc("2024-05-14T00:00:00Z"));
        assert_eq!(w.end, utc("2024-05-15T00:00:00Z"));
    }

    #[test]
    fn units_follow_the_local_time_zone() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let local_now = utc("2024-05-15T23:30:00Z").with_timezone(&tz);
        let w = compute_window(&chart(json!({ "start": "day" })), &local_now);
        assert_eq!(w.start, utc("2024-05-15T22:00:00Z"));
    }
}
