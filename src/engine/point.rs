use serde::{Deserialize, Serialize};

/// One observation: `[timestamp_ms, value|null]` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawPoint", into = "RawPoint")]
pub struct ObservationPoint {
    pub timestamp_ms: i64,
    pub value: Option<f64>,
}

impl ObservationPoint {
    #[must_use]
    pub const fn new(timestamp_ms: i64, value: Option<f64>) -> Self {
        Self {
            timestamp_ms,
            value,
        }
    }
}

/// Tuple representation used for (de)serializing `[number, number|null]` pairs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawPoint(i64, Option<f64>);

impl From<RawPoint> for ObservationPoint {
    fn from(raw: RawPoint) -> Self {
        Self::new(raw.0, raw.1)
    }
}

impl From<ObservationPoint> for RawPoint {
    fn from(point: ObservationPoint) -> Self {
        Self(point.timestamp_ms, point.value)
    }
}

/// Replacement policy for missing values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillPolicy {
    /// Keep the gap.
    #[default]
    Null,
    /// Repeat the last known value.
    Last,
    Zero,
}

impl FillPolicy {
    /// Fill `value` if missing, given the last known non-null value.
    #[must_use]
    pub fn fill(self, value: Option<f64>, last_known: Option<f64>) -> Option<f64> {
        match (value, self) {
            (Some(v), _) => Some(v),
            (None, Self::Null) => None,
            (None, Self::Last) => last_known,
            (None, Self::Zero) => Some(0.0),
        }
    }
}

/// Merge freshly fetched points into previously cached ones.
///
/// Cached points at or after the first fresh timestamp are superseded. The
/// result is sorted and holds one point per timestamp, the last one seen.
#[must_use]
pub fn merge_history(
    cached: &[ObservationPoint],
    fresh: &[ObservationPoint],
) -> Vec<ObservationPoint> {
    let Some(first_fresh) = fresh.first() else {
        return cached.to_vec();
    };

    let mut merged: Vec<ObservationPoint> = cached
        .iter()
        .filter(|p| p.timestamp_ms < first_fresh.timestamp_ms)
        .copied()
        .collect();
    merged.extend_from_slice(fresh);
    normalize(&mut merged);
    merged
}

/// Stable sort by timestamp, then keep the last point of every timestamp.
pub fn normalize(points: &mut Vec<ObservationPoint>) {
    points.sort_by_key(|p| p.timestamp_ms);
    let mut out: Vec<ObservationPoint> = Vec::with_capacity(points.len());
    for point in points.drain(..) {
        match out.last_mut() {
            Some(last) if last.timestamp_ms == point.timestamp_ms => *last = point,
            _ => out.push(point),
        }
    }
    *points = out;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(t: i64, v: f64) -> ObservationPoint {
        ObservationPoint::new(t, Some(v))
    }

    #[test]
    fn merge_keeps_older_cached_and_all_fresh() {
        let cached = [p(0, 1.0), p(10, 2.0), p(20, 3.0), p(30, 4.0)];
        let fresh = [p(20, 30.0), p(25, 35.0), p(40, 50.0)];
        let merged = merge_history(&cached, &fresh);
        assert_eq!(merged, vec![p(0, 1.0), p(10, 2.0), p(20, 30.0), p(25, 35.0), p(40, 50.0)]);
    }

    #[test]
    fn merge_dedups_fresh_last_wins() {
        let merged = merge_history(&[], &[p(5, 1.0), p(5, 2.0), p(3, 0.5)]);
        assert_eq!(merged, vec![p(3, 0.5), p(5, 2.0)]);
    }

    #[test]
    fn merge_with_nothing_fresh_returns_cache() {
        let cached = [p(0, 1.0)];
        assert_eq!(merge_history(&cached, &[]), cached.to_vec());
    }

    #[test]
    fn serializes_as_pair() {
        let json = serde_json::to_string(&ObservationPoint::new(5, None)).unwrap();
        assert_eq!(json, "[5,null]");
        let back: ObservationPoint = serde_json::from_str("[7,1.5]").unwrap();
        assert_eq!(back, p(7, 1.5));
    }

    #[test]
    fn fill_policies() {
        assert_eq!(FillPolicy::Null.fill(None, Some(3.0)), None);
        assert_eq!(FillPolicy::Last.fill(None, Some(3.0)), Some(3.0));
        assert_eq!(FillPolicy::Zero.fill(None, Some(3.0)), Some(0.0));
        assert_eq!(FillPolicy::Zero.fill(Some(1.0), None), Some(1.0));
    }
}
