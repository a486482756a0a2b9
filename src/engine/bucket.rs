//! Fixed-width time windows anchored on the end of the requested range.

use crate::engine::point::ObservationPoint;

/// Which edge of a bucket window is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// `(right - d, right]`: a point on a boundary belongs to the bucket ending there.
    ClosedRight,
    /// `[right - d, right)`: a point on a boundary opens the next bucket.
    ClosedLeft,
}

/// Boundary rule used by the history engine.
pub const BUCKET_BOUNDARY: Boundary = Boundary::ClosedRight;

#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    /// Right edge of the window, also the bucket's representative timestamp.
    pub window_end_ms: i64,
    pub members: Vec<ObservationPoint>,
}

/// Number of whole buckets needed to cover `[start, end]`.
fn bucket_count(start_ms: i64, end_ms: i64, duration_ms: i64) -> i64 {
    let range = end_ms.saturating_sub(start_ms).max(0);
    range / duration_ms + i64::from(range % duration_ms != 0)
}

/// Left edge of the lowest window, i.e. where fetching has to begin so the
/// first rendered bucket is fully populated.
#[must_use]
pub fn fetch_start(start_ms: i64, end_ms: i64, duration_ms: i64) -> i64 {
    if duration_ms <= 0 {
        return start_ms;
    }
    let span = bucket_count(start_ms, end_ms, duration_ms)
        .saturating_add(1)
        .saturating_mul(duration_ms);
    end_ms.saturating_sub(span)
}

/// Partition `points` (sorted by timestamp) into windows whose right edges
/// are `end, end - d, ...` down to the first edge at or before `start`.
///
/// Buckets come back in ascending order and include empty windows. Points
/// outside every window are dropped.
#[must_use]
pub fn bucketize(
    points: &[ObservationPoint],
    start_ms: i64,
    end_ms: i64,
    duration_ms: i64,
    boundary: Boundary,
) -> Vec<Bucket> {
    if duration_ms <= 0 {
        return Vec::new();
    }

    let count = bucket_count(start_ms, end_ms, duration_ms).saturating_add(1);
    let lowest_left = end_ms.saturating_sub(count.saturating_mul(duration_ms));

    let mut buckets: Vec<Bucket> = (1..=count)
        .map(|i| Bucket {
            window_end_ms: lowest_left.saturating_add(i.saturating_mul(duration_ms)),
            members: Vec::new(),
        })
        .collect();

    for point in points {
        let offset = point.timestamp_ms.saturating_sub(lowest_left);
        let index = match boundary {
            Boundary::ClosedRight if offset > 0 => {
                offset / duration_ms + i64::from(offset % duration_ms != 0) - 1
            }
            Boundary::ClosedLeft if offset >= 0 => offset / duration_ms,
            _ => continue,
        };
        if let Some(bucket) = usize::try_from(index).ok().and_then(|i| buckets.get_mut(i)) {
            bucket.members.push(*point);
        }
    }

    buckets
}
