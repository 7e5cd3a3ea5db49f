//! Deterministic partitioning of the user-id space into per-minute buckets.
//!
//! The full 128-bit id space is cut once into 1440 contiguous buckets, one per
//! minute of a UTC day. A tenant refreshing `f` times per day is assigned `f`
//! consecutive buckets each minute, so every user id comes up exactly `f` times
//! a day, evenly spaced `1440 / f` minutes apart, with no stored schedule.
//!
//! Ids are ordered as unsigned big-endian integers ([`Uuid::as_u128`]), which
//! is also how Postgres orders the `uuid` type.

use std::fmt;

use chrono::{DateTime, Timelike, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::flywheel::errors::PartitionError;

/// Number of buckets, one per minute of a UTC day.
pub const MINUTES_PER_DAY: u32 = 1440;

/// Regulatory ceiling on unattended refreshes per day.
pub const MAX_REFRESHES_PER_DAY: u32 = 4;

/// A minute of the UTC day, `0..1440`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MinuteOfDay(u32);

impl MinuteOfDay {
    pub fn new(minute: u32) -> Result<Self, PartitionError> {
        if minute >= MINUTES_PER_DAY {
            return Err(PartitionError::MinuteOutOfRange(minute));
        }
        Ok(Self(minute))
    }

    /// The minute of day that `at` falls into.
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.hour() * 60 + at.minute())
    }

    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for MinuteOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

/// One slice of the id space. `upper` equals the next bucket's `lower`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    pub lower: u128,
    pub upper: u128,
}

/// An inclusive id range `[left, right]`.
///
/// When `left > right` the range wraps past the top of the id space and covers
/// `[left, MAX] ∪ [0, right]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdRange {
    pub left: Uuid,
    pub right: Uuid,
}

impl IdRange {
    pub fn wraps(&self) -> bool {
        self.left.as_u128() > self.right.as_u128()
    }

    /// The non-wrapping inclusive sub-ranges this range is made of, in id order
    /// of the wrap (tail of the space first).
    pub fn segments(&self) -> Vec<(Uuid, Uuid)> {
        if self.wraps() {
            vec![
                (self.left, Uuid::from_u128(u128::MAX)),
                (Uuid::nil(), self.right),
            ]
        } else {
            vec![(self.left, self.right)]
        }
    }

    pub fn contains(&self, id: Uuid) -> bool {
        let id = id.as_u128();
        let (left, right) = (self.left.as_u128(), self.right.as_u128());
        if self.wraps() {
            id >= left || id <= right
        } else {
            (left..=right).contains(&id)
        }
    }
}

impl fmt::Display for IdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.left, self.right)
    }
}

/// Precomputed bucket table. Built once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct UuidRangePartitioner {
    buckets: Vec<Bucket>,
}

impl Default for UuidRangePartitioner {
    fn default() -> Self {
        Self::new()
    }
}

impl UuidRangePartitioner {
    pub fn new() -> Self {
        let step = u128::MAX / u128::from(MINUTES_PER_DAY);
        let last = MINUTES_PER_DAY as usize - 1;

        // The last bucket absorbs the division remainder.
        let buckets = (0..MINUTES_PER_DAY as usize)
            .map(|i| {
                let lower = i as u128 * step;
                let upper = if i == last {
                    u128::MAX
                } else {
                    (i as u128 + 1) * step
                };
                Bucket { lower, upper }
            })
            .collect();

        Self { buckets }
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    /// Returns the id range due for refresh at `minute` for a tenant refreshing
    /// `frequency` times per day.
    ///
    /// A frequency of zero means the tenant opted out; callers must filter those
    /// tenants before asking, so it is reported as an error. Frequencies above
    /// [`MAX_REFRESHES_PER_DAY`] are clamped.
    pub fn get_range(
        &self,
        frequency: u32,
        minute: MinuteOfDay,
    ) -> Result<IdRange, PartitionError> {
        if frequency == 0 {
            return Err(PartitionError::InvalidFrequency(frequency));
        }

        let frequency = if frequency > MAX_REFRESHES_PER_DAY {
            warn!(
                frequency,
                ceiling = MAX_REFRESHES_PER_DAY,
                "Refresh frequency above ceiling, clamping"
            );
            MAX_REFRESHES_PER_DAY
        } else {
            frequency
        };

        let lower_bucket = (frequency * minute.get()) % MINUTES_PER_DAY;
        Ok(self.span(lower_bucket as usize, frequency as usize))
    }

    /// Range covering `count` consecutive buckets starting at `lower_bucket`,
    /// wrapping from the last bucket back to the first.
    fn span(&self, lower_bucket: usize, count: usize) -> IdRange {
        let len = self.buckets.len();
        let upper_bucket = (lower_bucket + count - 1) % len;
        IdRange {
            left: Uuid::from_u128(self.buckets[lower_bucket].lower),
            right: Uuid::from_u128(self.buckets[upper_bucket].upper),
        }
    }
}
