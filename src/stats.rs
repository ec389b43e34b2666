//! Channel statistics for contrast auto-scaling.
//!
//! Everything here is synchronous and CPU-bound. The functions reorder the
//! buffer they are given: order statistics come from in-place partial
//! selection (expected linear time), not from a full sort.

use std::cmp::Ordering;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::StatsError;
use crate::pixel::TypedBuffer;

/// Fraction of the positive samples clipped at each end of the auto window.
pub const AUTO_WINDOW_CUTOFF: f64 = 0.0005;

/// Summary of one channel plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Population standard deviation
    pub sd: f64,
    pub median: f64,
    pub q1: f64,
    pub q3: f64,
    /// Suggested display range: the 0.05th and 99.95th percentile of the
    /// strictly positive samples
    pub auto_window: [f64; 2],
}

/// Numeric sample types the engine accepts.
pub trait Sample: Copy + Send + Sync {
    fn to_f64(self) -> f64;

    /// Total order; floats order NaN after every number.
    fn total_cmp(&self, other: &Self) -> Ordering;
}

macro_rules! impl_int_sample {
    ($($t:ty),*) => {$(
        impl Sample for $t {
            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn total_cmp(&self, other: &Self) -> Ordering {
                self.cmp(other)
            }
        }
    )*};
}

macro_rules! impl_float_sample {
    ($($t:ty),*) => {$(
        impl Sample for $t {
            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn total_cmp(&self, other: &Self) -> Ordering {
                <$t>::total_cmp(self, other)
            }
        }
    )*};
}

impl_int_sample!(u8, u16, u32, i8, i16, i32);
impl_float_sample!(f32, f64);

/// Compute [`ChannelStats`] over `data`, reordering it.
pub fn channel_stats<T: Sample>(data: &mut [T]) -> Result<ChannelStats, StatsError> {
    let n = data.len();
    if n == 0 {
        return Err(StatsError::Empty);
    }

    let mut min = data[0];
    let mut max = data[0];
    let mut sum = 0.0;
    for &value in data.iter() {
        if value.total_cmp(&min) == Ordering::Less {
            min = value;
        }
        if value.total_cmp(&max) == Ordering::Greater {
            max = value;
        }
        sum += value.to_f64();
    }
    let mean = sum / n as f64;

    let variance = data
        .iter()
        .map(|&v| {
            let d = v.to_f64() - mean;
            d * d
        })
        .sum::<f64>()
        / n as f64;

    let (median, q1, q3) = quartiles(data);
    let auto_window = auto_window(data);

    Ok(ChannelStats {
        min: min.to_f64(),
        max: max.to_f64(),
        mean,
        sd: variance.sqrt(),
        median,
        q1,
        q3,
        auto_window,
    })
}

/// Median and quartiles at ranks `n/2`, `n/4` and `3 * (n/4)`.
///
/// The median partition bounds the two quartile searches: Q1 is selected in
/// `[0, mid]` and Q3 in `[mid, n)`.
fn quartiles<T: Sample>(data: &mut [T]) -> (f64, f64, f64) {
    let n = data.len();
    let mid = n / 2;
    let q1_loc = n / 4;
    let q3_loc = 3 * q1_loc;

    select(data, mid);
    let median = data[mid].to_f64();

    select(&mut data[..=mid], q1_loc);
    let q1 = data[q1_loc].to_f64();

    // Below four samples q3_loc collapses onto q1_loc, already in place
    if q3_loc >= mid {
        select(&mut data[mid..], q3_loc - mid);
    }
    let q3 = data[q3_loc].to_f64();

    (median, q1, q3)
}

/// Percentile window over the strictly positive samples; `[0, 0]` if none.
fn auto_window<T: Sample>(data: &[T]) -> [f64; 2] {
    let mut positive: Vec<f64> = data
        .iter()
        .map(|v| v.to_f64())
        .filter(|&v| v > 0.0)
        .collect();
    if positive.is_empty() {
        return [0.0, 0.0];
    }

    let len = positive.len() as f64;
    let top = (len * (1.0 - AUTO_WINDOW_CUTOFF)).floor() as usize;
    let bottom = (len * AUTO_WINDOW_CUTOFF).floor() as usize;

    select(&mut positive, top);
    select(&mut positive[..=top], bottom);

    [positive[bottom], positive[top]]
}

#[inline]
fn select<T: Sample>(data: &mut [T], k: usize) {
    data.select_nth_unstable_by(k, T::total_cmp);
}

/// Dispatch [`channel_stats`] on the buffer's element type.
pub fn buffer_stats(buffer: &mut TypedBuffer) -> Result<ChannelStats, StatsError> {
    crate::with_typed_buffer!(buffer, v => channel_stats(v.as_mut_slice()))
}

/// Statistics for several channels at once, one rayon task per channel.
pub fn buffer_stats_parallel(
    buffers: &mut [TypedBuffer],
) -> Vec<Result<ChannelStats, StatsError>> {
    buffers.par_iter_mut().map(buffer_stats).collect()
}
