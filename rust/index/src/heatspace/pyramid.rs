use super::types::PointId;
use crate::widening_array::{UnsignedWideningArray, WideningArrayError};
use std::collections::HashMap;

/// Each level quantizes 4 bits finer than the one above it (16-way fanout).
pub const BITS_PER_LEVEL: u32 = 4;

/// Picks how many pyramid levels are needed for the finest level to hold
/// about `target_points_per_bucket` rotated copies per bucket, erring toward
/// fewer per bucket. Never less than one level, never more than `max_levels`.
pub fn num_resolution_levels(
    num_points: usize,
    qz_per_point: u32,
    target_points_per_bucket: f32,
    max_levels: u32,
) -> u32 {
    let slots_needed = num_points as f64 * qz_per_point as f64 / target_points_per_bucket as f64;
    let bits_needed = (slots_needed + 1.0).log2().floor() as u32 + 1;
    let levels = bits_needed.div_ceil(BITS_PER_LEVEL).max(1);
    if levels > max_levels {
        tracing::warn!(
            levels_needed = levels,
            max_levels,
            num_points,
            "Clamping heatspace pyramid depth; buckets will be denser than targeted"
        );
        return max_levels;
    }
    levels
}

/// One resolution step of the pyramid: a density histogram over
/// `16^(level + 1)` quantization buckets plus, for every occupied bucket, the
/// points whose rotated copies landed there.
#[derive(Clone, Debug)]
pub struct PyramidLevel {
    level: u32,
    counts: UnsignedWideningArray,
    ids_per_qz: HashMap<u32, Vec<PointId>>,
}

impl PyramidLevel {
    pub fn new(level: u32) -> Result<Self, WideningArrayError> {
        let num_buckets = 1usize << (BITS_PER_LEVEL * (level + 1));
        Ok(Self {
            level,
            counts: UnsignedWideningArray::new(num_buckets, 1)?,
            ids_per_qz: HashMap::new(),
        })
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    /// Width of the quantization codes addressing this level.
    pub fn num_bits(&self) -> u32 {
        BITS_PER_LEVEL * (self.level + 1)
    }

    pub fn num_buckets(&self) -> usize {
        self.counts.len()
    }

    pub fn counts(&self) -> &UnsignedWideningArray {
        &self.counts
    }

    /// Recorded occurrences in bucket `code`. Codes past the last bucket hold
    /// nothing.
    pub fn count(&self, code: u32) -> u64 {
        self.counts.get(code as usize).unwrap_or(0)
    }

    /// Distinct points with at least one occurrence in bucket `code`, in
    /// ascending ID order.
    pub fn points(&self, code: u32) -> &[PointId] {
        self.ids_per_qz
            .get(&code)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn num_occupied_buckets(&self) -> usize {
        self.ids_per_qz.len()
    }

    /// Bytes held by the histogram and the inverted lists.
    pub fn memory_bytes(&self) -> usize {
        self.counts.memory_bytes()
            + self
                .ids_per_qz
                .values()
                .map(|ids| ids.capacity() * std::mem::size_of::<PointId>())
                .sum::<usize>()
    }

    /// Records one occurrence of `point` in bucket `code`.
    ///
    /// Points must be recorded in non-decreasing ID order; that keeps each
    /// inverted list sorted and lets repeated copies of a point dedupe
    /// against the list's tail.
    pub(crate) fn record(&mut self, code: u32, point: PointId) -> Result<(), WideningArrayError> {
        self.counts.incr(code as usize, 1)?;
        let ids = self.ids_per_qz.entry(code).or_default();
        if ids.last() != Some(&point) {
            ids.push(point);
        }
        Ok(())
    }
}
