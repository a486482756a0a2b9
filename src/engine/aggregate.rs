use serde::{Deserialize, Serialize};

use crate::engine::bucket::Bucket;
use crate::engine::point::{FillPolicy, ObservationPoint};

/// Reduction applied to every bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunc {
    /// No bucketing at all.
    #[default]
    Raw,
    Avg,
    Min,
    Max,
    First,
    Last,
    Sum,
    Median,
    Delta,
    Diff,
}

impl AggregateFunc {
    /// Reduce the members of one bucket. An empty bucket is always `None`.
    #[must_use]
    pub fn reduce(self, members: &[ObservationPoint]) -> Option<f64> {
        if members.is_empty() {
            return None;
        }
        match self {
            Self::Raw | Self::Last => members.last().and_then(|p| p.value),
            Self::First => members.first().and_then(|p| p.value),
            Self::Avg => average(members),
            Self::Min => non_null(members).reduce(f64::min),
            Self::Max => non_null(members).reduce(f64::max),
            Self::Sum => sum(members),
            Self::Median => median(members),
            Self::Delta => {
                let min = non_null(members).reduce(f64::min)?;
                let max = non_null(members).reduce(f64::max)?;
                Some(max - min)
            }
            Self::Diff => {
                let first = non_null(members).next()?;
                let last = non_null(members).last()?;
                Some(last - first)
            }
        }
    }
}

fn non_null(members: &[ObservationPoint]) -> impl Iterator<Item = f64> + '_ {
    members.iter().filter_map(|p| p.value)
}

fn average(members: &[ObservationPoint]) -> Option<f64> {
    let (total, count) = non_null(members).fold((0.0, 0_u32), |(s, n), v| (s + v, n + 1));
    (count > 0).then(|| total / f64::from(count))
}

/// Nulls count as the last non-null value seen before them in the bucket.
fn sum(members: &[ObservationPoint]) -> Option<f64> {
    let mut last = None;
    let mut total = None;
    for point in members {
        if point.value.is_some() {
            last = point.value;
        }
        if let Some(v) = last {
            total = Some(total.unwrap_or(0.0) + v);
        }
    }
    total
}

fn median(members: &[ObservationPoint]) -> Option<f64> {
    let mut values: Vec<f64> = non_null(members).collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = (values.len() - 1) / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid] + values[mid + 1]) / 2.0)
    }
}

/// Reduce every bucket, fill `None` reductions, optionally trim leading gaps.
#[must_use]
pub fn reduce_buckets(
    buckets: &[Bucket],
    func: AggregateFunc,
    fill: FillPolicy,
    trim_leading_nulls: bool,
) -> Vec<ObservationPoint> {
    let mut previous = None;
    let mut out: Vec<ObservationPoint> = buckets
        .iter()
        .map(|bucket| {
            let value = fill.fill(func.reduce(&bucket.members), previous);
            if value.is_some() {
                previous = value;
            }
            ObservationPoint::new(bucket.window_end_ms, value)
        })
        .collect();

    if trim_leading_nulls {
        let first = out.iter().position(|p| p.value.is_some()).unwrap_or(out.len());
        out.drain(..first);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(values: &[Option<f64>]) -> Vec<ObservationPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| ObservationPoint::new(i as i64, *v))
            .collect()
    }

    #[test]
    fn empty_bucket_is_null_for_every_function() {
        for func in [
            AggregateFunc::Avg,
            AggregateFunc::Median,
            AggregateFunc::Sum,
            AggregateFunc::Min,
            AggregateFunc::Diff,
        ] {
            assert_eq!(func.reduce(&[]), None, "{func:?}");
        }
    }

    #[test]
    fn sum_carries_last_value_over_nulls() {
        assert_eq!(AggregateFunc::Sum.reduce(&pts(&[Some(5.0), None])), Some(10.0));
        assert_eq!(AggregateFunc::Sum.reduce(&pts(&[None, Some(2.0), None])), Some(4.0));
        assert_eq!(AggregateFunc::Sum.reduce(&pts(&[None, None])), None);
    }

    #[test]
    fn reductions() {
        let members = pts(&[Some(4.0), None, Some(1.0), Some(3.0), Some(2.0)]);
        assert_eq!(AggregateFunc::Avg.reduce(&members), Some(2.5));
        assert_eq!(AggregateFunc::Median.reduce(&members), Some(2.5));
        assert_eq!(AggregateFunc::Min.reduce(&members), Some(1.0));
        assert_eq!(AggregateFunc::Max.reduce(&members), Some(4.0));
        assert_eq!(AggregateFunc::Delta.reduce(&members), Some(3.0));
        assert_eq!(AggregateFunc::Diff.reduce(&members), Some(-2.0));
        assert_eq!(AggregateFunc::First.reduce(&members), Some(4.0));
        assert_eq!(AggregateFunc::Last.reduce(&members), Some(2.0));
        assert_eq!(AggregateFunc::Median.reduce(&pts(&[Some(7.0), Some(1.0), Some(3.0)])), Some(3.0));
    }

    #[test]
    fn first_and_last_keep_null_members() {
        let members = pts(&[None, Some(1.0), None]);
        assert_eq!(AggregateFunc::First.reduce(&members), None);
        assert_eq!(AggregateFunc::Last.reduce(&members), None);
    }

    #[test]
    fn fill_and_trim() {
        let buckets: Vec<Bucket> = [vec![], vec![ObservationPoint::new(1, Some(2.0))], vec![]]
            .into_iter()
            .enumerate()
            .map(|(i, members)| Bucket {
                window_end_ms: i as i64 * 10,
                members,
            })
            .collect();

        let filled = reduce_buckets(&buckets, AggregateFunc::Avg, FillPolicy::Last, true);
        assert_eq!(
            filled,
            vec![ObservationPoint::new(10, Some(2.0)), ObservationPoint::new(20, Some(2.0))]
        );

        let zeroed = reduce_buckets(&buckets, AggregateFunc::Avg, FillPolicy::Zero, false);
        assert_eq!(zeroed.len(), 3);
        assert_eq!(zeroed[0].value, Some(0.0));

        let gaps = reduce_buckets(&buckets, AggregateFunc::Avg, FillPolicy::Null, false);
        assert_eq!(gaps[2].value, None);
    }
}
