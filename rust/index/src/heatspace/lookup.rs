use super::{
    gaussian_rotate_unit_vector, rng_from_seed, CloudId, CloudType, EmbeddingHeatspace, ItemId,
    PointId, WeightedItem, FINE_CODE_BITS,
};
use crate::config::{LookupParams, ResultOrder, ResultsType};
use crate::embedding::EmbeddingMatrix;
use crate::quantization::{quantize_embedding, QuantizationError};
use heatspace_distance::bits_in_common;
use heatspace_error::{ErrorCodes, HeatspaceError, HeatspaceValidationError};
use rand::distributions::{Distribution, WeightedError, WeightedIndex};
use rand::rngs::StdRng;
use rand::Rng;
use rayon::prelude::*;
use rayon::{ThreadPoolBuildError, ThreadPoolBuilder};
use std::cmp::Ordering;
use std::collections::HashMap;
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("No items to look up")]
    NoItemsToLookUp,
    #[error("Query has `{got}` dimensions, index has `{expected}`")]
    BadDim { expected: usize, got: usize },
    #[error("Point `{0}` does not exist")]
    BadPointId(PointId),
    #[error("Weight `{0}` must be finite and at least 1")]
    BadWeight(f32),
    #[error("Cloud type `{0}` does not exist")]
    BadCloudType(CloudType),
    #[error("Cloud `{cloud_id}` of type `{cloud_type}` does not exist")]
    BadCloudId {
        cloud_type: CloudType,
        cloud_id: CloudId,
    },
    #[error("Got `{weights}` weights for `{locations}` locations")]
    PointsWeightsMismatch { locations: usize, weights: usize },
    #[error(transparent)]
    InvalidParams(#[from] HeatspaceValidationError),
    #[error("Error quantizing query: {0}")]
    Quantization(#[from] QuantizationError),
    #[error("Error sampling locations: {0}")]
    Sampling(#[from] WeightedError),
    #[error("Error building lookup thread pool: {0}")]
    ThreadPool(#[from] ThreadPoolBuildError),
}

impl HeatspaceError for LookupError {
    fn code(&self) -> ErrorCodes {
        match self {
            LookupError::NoItemsToLookUp => ErrorCodes::InvalidArgument,
            LookupError::BadDim { .. } => ErrorCodes::InvalidArgument,
            LookupError::BadPointId(_) => ErrorCodes::OutOfRange,
            LookupError::BadWeight(_) => ErrorCodes::InvalidArgument,
            LookupError::BadCloudType(_) => ErrorCodes::NotFound,
            LookupError::BadCloudId { .. } => ErrorCodes::NotFound,
            LookupError::PointsWeightsMismatch { .. } => ErrorCodes::InvalidArgument,
            LookupError::InvalidParams(e) => e.code(),
            LookupError::Quantization(e) => e.code(),
            LookupError::Sampling(_) => ErrorCodes::Internal,
            LookupError::ThreadPool(_) => ErrorCodes::Internal,
        }
    }
}

impl EmbeddingHeatspace {
    /// Items near an arbitrary query vector.
    #[instrument(skip_all, fields(dim = location.len()))]
    pub fn lookup_location(
        &self,
        location: &[f32],
        params: &LookupParams,
    ) -> Result<Vec<WeightedItem>, LookupError> {
        self.check_dim(location.len())?;
        self.lookup_weighted(&[location], &[1.0], params)
    }

    /// Items near a weighted batch of query vectors. Each location is sampled
    /// in proportion to the integer part of its weight.
    #[instrument(skip_all, fields(num_locations = locations.num_rows()))]
    pub fn lookup_locations(
        &self,
        locations: &EmbeddingMatrix,
        weights: &[f32],
        params: &LookupParams,
    ) -> Result<Vec<WeightedItem>, LookupError> {
        if locations.is_empty() {
            return Err(LookupError::NoItemsToLookUp);
        }
        self.check_dim(locations.dim())?;
        if locations.num_rows() != weights.len() {
            return Err(LookupError::PointsWeightsMismatch {
                locations: locations.num_rows(),
                weights: weights.len(),
            });
        }
        let rows: Vec<&[f32]> = locations.rows().collect();
        self.lookup_weighted(&rows, weights, params)
    }

    /// Items near an indexed point.
    #[instrument(skip(self, params))]
    pub fn lookup_point(
        &self,
        point_id: PointId,
        params: &LookupParams,
    ) -> Result<Vec<WeightedItem>, LookupError> {
        let point = self
            .point(point_id)
            .ok_or(LookupError::BadPointId(point_id))?;
        self.lookup_weighted(&[point], &[1.0], params)
    }

    /// Items near a weighted subset of indexed points, given as
    /// `(weight, point ID)` pairs.
    #[instrument(skip_all, fields(num_points = weights_points.len()))]
    pub fn lookup_points(
        &self,
        weights_points: &[(f32, PointId)],
        params: &LookupParams,
    ) -> Result<Vec<WeightedItem>, LookupError> {
        if weights_points.is_empty() {
            return Err(LookupError::NoItemsToLookUp);
        }
        let mut locations = Vec::with_capacity(weights_points.len());
        let mut weights = Vec::with_capacity(weights_points.len());
        for &(weight, point_id) in weights_points {
            check_weight(weight)?;
            let point = self
                .point(point_id)
                .ok_or(LookupError::BadPointId(point_id))?;
            locations.push(point);
            weights.push(weight);
        }
        self.lookup_weighted(&locations, &weights, params)
    }

    /// Items near the members of a cloud, sampled by membership weight.
    #[instrument(skip(self, params))]
    pub fn lookup_cloud(
        &self,
        cloud_type: CloudType,
        cloud_id: CloudId,
        params: &LookupParams,
    ) -> Result<Vec<WeightedItem>, LookupError> {
        if cloud_type as usize >= self.num_cloud_types() {
            return Err(LookupError::BadCloudType(cloud_type));
        }
        let members = self
            .cloud_points(cloud_type, cloud_id)
            .ok_or(LookupError::BadCloudId {
                cloud_type,
                cloud_id,
            })?;
        self.lookup_points(members, params)
    }

    /// One sample of the lookup: rotates and quantizes `location` once and
    /// returns the weighted items it selects, unmerged and unsorted.
    pub fn simple_lookup_location<R: Rng>(
        &self,
        location: &[f32],
        params: &LookupParams,
        rng: &mut R,
    ) -> Result<Vec<WeightedItem>, LookupError> {
        self.check_dim(location.len())?;
        self.check_params(params)?;
        let mut weights_ids = Vec::new();
        self.sample_location(location, params, rng, &mut weights_ids)?;
        Ok(weights_ids)
    }

    fn check_dim(&self, dim: usize) -> Result<(), LookupError> {
        if dim != self.dim() {
            return Err(LookupError::BadDim {
                expected: self.dim(),
                got: dim,
            });
        }
        Ok(())
    }

    fn check_params(&self, params: &LookupParams) -> Result<(), LookupError> {
        params.validate()?;
        if let ResultsType::Clouds(cloud_type) = params.results_type {
            if cloud_type as usize >= self.num_cloud_types() {
                return Err(LookupError::BadCloudType(cloud_type));
            }
        }
        Ok(())
    }

    /// Fans a fixed number of samples out over a worker pool, then merges.
    ///
    /// `locations` and `weights` have equal length.
    fn lookup_weighted(
        &self,
        locations: &[&[f32]],
        weights: &[f32],
        params: &LookupParams,
    ) -> Result<Vec<WeightedItem>, LookupError> {
        self.check_params(params)?;
        for weight in weights {
            check_weight(*weight)?;
        }
        // Sampling by the integer part of each weight is the same as drawing
        // uniformly from a list holding each location floor(weight) times.
        // Repetition counts saturate at u32::MAX.
        let sampler = WeightedIndex::<u64>::new(
            weights
                .iter()
                .map(|weight| weight.floor().min(u32::MAX as f32) as u64),
        )?;

        let num_threads = params.num_threads();
        tracing::debug!(
            num_locations = locations.len(),
            num_threads,
            lookups_per_thread = params.lookups_per_thread,
            "Fanning out heatspace lookups"
        );
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("heatspace-lookup-{i}"))
            .build()?;
        let weights_ids_per_thread = pool.install(|| {
            (0..num_threads)
                .into_par_iter()
                .map(|worker| -> Result<Vec<WeightedItem>, LookupError> {
                    let mut rng = worker_rng(params.seed, worker);
                    let mut weights_ids = Vec::new();
                    for _ in 0..params.lookups_per_thread {
                        let location = locations[sampler.sample(&mut rng)];
                        self.sample_location(location, params, &mut rng, &mut weights_ids)?;
                    }
                    Ok(weights_ids)
                })
                .collect::<Result<Vec<_>, _>>()
        })?;

        Ok(merge_results(
            weights_ids_per_thread,
            params.num_results as usize,
            params.result_order,
        ))
    }

    /// Selects candidates for one rotated copy of `location` and appends them
    /// to `weights_ids`.
    fn sample_location<R: Rng>(
        &self,
        location: &[f32],
        params: &LookupParams,
        rng: &mut R,
        weights_ids: &mut Vec<WeightedItem>,
    ) -> Result<(), LookupError> {
        let rotated = gaussian_rotate_unit_vector(location, params.rotation_sigma, rng);
        let query_code: u128 =
            quantize_embedding(&rotated, FINE_CODE_BITS, params.quantization_noise, rng)?;

        let Some((level, code)) = self.select_bucket(&rotated, params, rng)? else {
            tracing::trace!("Query landed in an empty region of the pyramid");
            return Ok(());
        };
        let candidates = self.pyramid[level].points(code);

        let mut scored: Vec<(u32, PointId)> = candidates
            .iter()
            .map(|&point_id| (self.similarity(query_code, point_id), point_id))
            .collect();
        scored.sort_unstable_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        scored.truncate(params.points_per_lookup as usize);
        tracing::trace!(
            level,
            code,
            num_candidates = candidates.len(),
            num_kept = scored.len(),
            "Scored lookup candidates"
        );

        for (common_bits, point_id) in scored {
            let weight = common_bits as f32 / FINE_CODE_BITS as f32
                * self.point_weights[point_id as usize];
            match params.results_type {
                ResultsType::Points => weights_ids.push(WeightedItem::new(weight, point_id)),
                ResultsType::Clouds(cloud_type) => {
                    for &(membership, cloud_id) in
                        &self.point_clouds[cloud_type as usize][point_id as usize]
                    {
                        weights_ids.push(WeightedItem::new(weight * membership, cloud_id));
                    }
                }
            }
        }
        Ok(())
    }

    /// Descends the pyramid until the query's bucket is empty. Returns the
    /// deepest bucket holding at least `points_per_lookup` occurrences, or
    /// the deepest occupied bucket when none holds that many. `None` when the
    /// query's coarsest bucket is already empty.
    fn select_bucket<R: Rng>(
        &self,
        rotated: &[f32],
        params: &LookupParams,
        rng: &mut R,
    ) -> Result<Option<(usize, u32)>, LookupError> {
        let wanted = params.points_per_lookup as u64;
        let mut deepest = None;
        let mut deepest_full = None;
        for (level, pyramid_level) in self.pyramid.iter().enumerate() {
            let code: u32 = quantize_embedding(
                rotated,
                pyramid_level.num_bits(),
                params.quantization_noise,
                rng,
            )?;
            let count = pyramid_level.count(code);
            if count == 0 {
                break;
            }
            deepest = Some((level, code));
            if count >= wanted {
                deepest_full = Some((level, code));
            }
        }
        Ok(deepest_full.or(deepest))
    }

    /// Best agreement between `query_code` and any retained code of the point.
    fn similarity(&self, query_code: u128, point_id: PointId) -> u32 {
        self.fine_codes[point_id as usize]
            .iter()
            .map(|code| bits_in_common(query_code, *code))
            .max()
            .unwrap_or(0)
    }
}

fn check_weight(weight: f32) -> Result<(), LookupError> {
    if !weight.is_finite() || weight < 1.0 {
        return Err(LookupError::BadWeight(weight));
    }
    Ok(())
}

fn worker_rng(seed: Option<u64>, worker: usize) -> StdRng {
    rng_from_seed(seed.map(|seed| seed.wrapping_add(worker as u64)))
}

/// Sums weights per ID across worker buffers, orders by `order` with ties
/// broken by ascending ID, and keeps the first `num_results`.
pub fn merge_results(
    weights_ids_per_thread: Vec<Vec<WeightedItem>>,
    num_results: usize,
    order: ResultOrder,
) -> Vec<WeightedItem> {
    let mut id2weight: HashMap<ItemId, f32> = HashMap::new();
    for weights_ids in weights_ids_per_thread {
        for item in weights_ids {
            *id2weight.entry(item.id).or_default() += item.weight;
        }
    }

    let mut merged: Vec<WeightedItem> = id2weight
        .into_iter()
        .map(|(id, weight)| WeightedItem::new(weight, id))
        .collect();
    merged.sort_unstable_by(|a, b| {
        let by_weight = match order {
            ResultOrder::Descending => b.weight.total_cmp(&a.weight),
            ResultOrder::Ascending => a.weight.total_cmp(&b.weight),
        };
        match by_weight {
            Ordering::Equal => a.id.cmp(&b.id),
            unequal => unequal,
        }
    });
    merged.truncate(num_results);
    merged
}
